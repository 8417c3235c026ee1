//! Chunk codec: fixed-size splitting and verbatim reassembly.
//!
//! `split` never pads and never reads ahead of the chunk it yields.
//! `join` trusts its caller completely: chunks are concatenated in the
//! order given, with no index validation and no gap detection. A chunk
//! set with holes produces a short file, not an error.

use std::io::{self, Read};
use std::num::NonZeroUsize;

use bytes::Bytes;

/// Default chunk payload size.
pub const DEFAULT_CHUNK_SIZE: usize = 128 * 1024; // 128KB

/// One slice of a file, in file-read order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u64,
    pub bytes: Bytes,
}

/// Lazy chunk sequence over a reader. See [`split`].
pub struct Chunks<R> {
    reader: R,
    chunk_size: usize,
    next_index: u64,
    done: bool,
}

/// Split a reader into ordered chunks of `chunk_size` bytes; the last one
/// may be shorter. An empty reader yields nothing.
pub fn split<R: Read>(reader: R, chunk_size: NonZeroUsize) -> Chunks<R> {
    Chunks {
        reader,
        chunk_size: chunk_size.get(),
        next_index: 0,
        done: false,
    }
}

impl<R: Read> Iterator for Chunks<R> {
    type Item = io::Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = Vec::with_capacity(self.chunk_size);
        match (&mut self.reader)
            .take(self.chunk_size as u64)
            .read_to_end(&mut buf)
        {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                // A short read through `take` means the reader hit EOF.
                if n < self.chunk_size {
                    self.done = true;
                }
                let chunk = Chunk {
                    index: self.next_index,
                    bytes: Bytes::from(buf),
                };
                self.next_index += 1;
                Some(Ok(chunk))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Split an in-memory buffer.
pub fn split_bytes(data: &[u8], chunk_size: NonZeroUsize) -> impl Iterator<Item = Chunk> + '_ {
    data.chunks(chunk_size.get())
        .enumerate()
        .map(|(index, bytes)| Chunk {
            index: index as u64,
            bytes: Bytes::copy_from_slice(bytes),
        })
}

/// Concatenate chunks verbatim, in the order given.
pub fn join<I, C>(chunks: I) -> Vec<u8>
where
    I: IntoIterator<Item = C>,
    C: AsRef<[u8]>,
{
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend_from_slice(chunk.as_ref());
    }
    out
}
