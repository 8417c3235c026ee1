//! Transfer policy: which files are sent, and how.
//!
//! Selection is path-based, never size-based: the verbatim subtree is
//! carried raw, a fixed allow-list is chunked, everything else is skipped.

use std::collections::BTreeSet;

use crate::address::under_subtree;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Whole file in one message.
    Raw,
    /// Split into chunks, followed by an end marker.
    Chunked,
}

/// One file being moved. Immutable once chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferUnit {
    /// POSIX-style, relative to the shared root.
    pub relative_path: String,
    pub policy: Policy,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct TransferPolicy {
    verbatim_subtree: String,
    chunked_paths: BTreeSet<String>,
}

impl TransferPolicy {
    pub fn new<I, S>(verbatim_subtree: impl Into<String>, chunked_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            verbatim_subtree: verbatim_subtree.into(),
            chunked_paths: chunked_paths.into_iter().map(Into::into).collect(),
        }
    }

    /// Policy for `rel`, or None if the file is not part of the transfer.
    pub fn classify(&self, rel: &str) -> Option<Policy> {
        if under_subtree(rel, &self.verbatim_subtree) {
            Some(Policy::Raw)
        } else if self.chunked_paths.contains(rel) {
            Some(Policy::Chunked)
        } else {
            None
        }
    }
}
