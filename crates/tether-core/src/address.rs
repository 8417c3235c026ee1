//! Address conventions: how files, chunks and control signals map onto
//! slash-separated pub/sub topics.
//!
//! ```text
//! <prefix>/<rel>            raw file (or fallback)
//! <prefix>/<rel>.chunk<N>   chunk N of a chunked file
//! <prefix>/<rel>.end        end marker for a chunked file
//! <prefix>/done             completion signal
//! ack/<any of the above>    acknowledgment
//! ```

/// Root segment of every acknowledgment address.
pub const ACK_ROOT: &str = "ack";

/// Last segment of the completion address.
pub const DONE_SEGMENT: &str = "done";

pub const END_SUFFIX: &str = ".end";
pub const CHUNK_MARKER: &str = ".chunk";

/// Opaque payloads for the control messages.
pub const ACK_PAYLOAD: &[u8] = b"ACK";
pub const END_PAYLOAD: &[u8] = b"EOF";
pub const DONE_PAYLOAD: &[u8] = b"ALL_FILES_SENT";

/// Classification of an inbound address on the receiving side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `<prefix>/done`: the whole transfer is finished.
    Completion,
    /// A file under the verbatim subtree, carried whole.
    Raw(String),
    /// No more chunks for this base file.
    EndMarker(String),
    /// One chunk of a chunked file.
    Chunk { base: String, index: u64 },
    /// Anything else under the prefix; written as a raw file.
    Fallback(String),
    /// Under the prefix but unusable.
    Malformed {
        address: String,
        reason: &'static str,
    },
    /// Outside the namespace entirely.
    Foreign,
}

/// A sender/receiver namespace: the topic prefix plus the verbatim subtree
/// that is always carried raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
    verbatim_subtree: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>, verbatim_subtree: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            verbatim_subtree: verbatim_subtree.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn verbatim_subtree(&self) -> &str {
        &self.verbatim_subtree
    }

    pub fn raw_address(&self, rel: &str) -> String {
        format!("{}/{}", self.prefix, rel)
    }

    pub fn chunk_address(&self, rel: &str, index: u64) -> String {
        format!("{}/{}{}{}", self.prefix, rel, CHUNK_MARKER, index)
    }

    pub fn end_address(&self, rel: &str) -> String {
        format!("{}/{}{}", self.prefix, rel, END_SUFFIX)
    }

    pub fn completion_address(&self) -> String {
        format!("{}/{}", self.prefix, DONE_SEGMENT)
    }

    /// Pattern covering the whole destination namespace.
    pub fn subscribe_pattern(&self) -> String {
        format!("{}/**", self.prefix)
    }

    /// Classify an inbound address. Checks run in a fixed order: completion,
    /// verbatim subtree, end marker, chunk, fallback. A verbatim file whose
    /// name happens to end in `.end` is therefore still raw.
    pub fn classify(&self, address: &str) -> Inbound {
        if address == self.completion_address() {
            return Inbound::Completion;
        }

        let rel = match address
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        {
            Some(rel) => rel,
            None => return Inbound::Foreign,
        };

        if rel.is_empty() {
            return Inbound::Malformed {
                address: address.to_string(),
                reason: "empty relative path",
            };
        }

        if under_subtree(rel, &self.verbatim_subtree) {
            return Inbound::Raw(rel.to_string());
        }

        if let Some(base) = rel.strip_suffix(END_SUFFIX) {
            if base.is_empty() {
                return Inbound::Malformed {
                    address: address.to_string(),
                    reason: "end marker without base file",
                };
            }
            return Inbound::EndMarker(base.to_string());
        }

        if let Some((base, index)) = rel.rsplit_once(CHUNK_MARKER) {
            return match index.parse::<u64>() {
                Ok(index) if !base.is_empty() => Inbound::Chunk {
                    base: base.to_string(),
                    index,
                },
                Ok(_) => Inbound::Malformed {
                    address: address.to_string(),
                    reason: "chunk without base file",
                },
                Err(_) => Inbound::Malformed {
                    address: address.to_string(),
                    reason: "unparseable chunk index",
                },
            };
        }

        Inbound::Fallback(rel.to_string())
    }
}

/// `true` if `rel` lies strictly below the directory `subtree`.
pub fn under_subtree(rel: &str, subtree: &str) -> bool {
    rel.strip_prefix(subtree)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

pub fn ack_address(address: &str) -> String {
    format!("{}/{}", ACK_ROOT, address)
}

pub fn ack_pattern() -> String {
    format!("{}/**", ACK_ROOT)
}

/// The address an acknowledgment refers to, or None if `ack_addr` is not
/// an acknowledgment.
pub fn ack_target(ack_addr: &str) -> Option<&str> {
    ack_addr
        .strip_prefix(ACK_ROOT)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|target| !target.is_empty())
}

/// Match an address against a subscribe pattern.
///
/// `*` matches exactly one segment, `**` matches zero or more.
pub fn matches(pattern: &str, address: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('/').collect();
    let address: Vec<&str> = address.split('/').collect();
    match_segments(&pattern, &address)
}

fn match_segments(pattern: &[&str], address: &[&str]) -> bool {
    match pattern.split_first() {
        None => address.is_empty(),
        Some((&"**", rest)) => (0..=address.len()).any(|i| match_segments(rest, &address[i..])),
        Some((&"*", rest)) => !address.is_empty() && match_segments(rest, &address[1..]),
        Some((segment, rest)) => {
            address.first() == Some(segment) && match_segments(rest, &address[1..])
        }
    }
}
