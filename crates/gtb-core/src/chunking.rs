//! Reply chunking.
//!
//! Chat platforms cap the size of a single message, so a model reply is sent as
//! an ordered series of chunks. Splitting is a pure positional cut measured in
//! Unicode scalar values: it ignores word, sentence and markup boundaries.
//!
//! A cut never lands inside a UTF-8 sequence, but it can land inside a grapheme
//! cluster (emoji ZWJ sequences, a letter followed by a combining mark). The two
//! halves then render differently from the original text. Platforms that count
//! UTF-16 code units (Telegram does) may also measure a chunk slightly longer
//! than its `char` count; the default bound leaves enough headroom for that.

use std::num::NonZeroUsize;

use crate::config::DEFAULT_CHUNK_SIZE;

/// Splits replies into chunks of at most `max_chunk_size` chars.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResponseChunker {
    max_chunk_size: NonZeroUsize,
}

impl ResponseChunker {
    pub fn new(max_chunk_size: NonZeroUsize) -> Self {
        Self { max_chunk_size }
    }

    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size.get()
    }

    /// Same chunker with its bound lowered to `limit` if it was larger.
    pub fn clamped(self, limit: NonZeroUsize) -> Self {
        Self {
            max_chunk_size: self.max_chunk_size.min(limit),
        }
    }

    /// Lazily split `text`. Empty input yields no chunks at all.
    ///
    /// The returned iterator is `Clone`, so a caller can replay the split
    /// without re-running it from the original text.
    pub fn split<'a>(&self, text: &'a str) -> Chunks<'a> {
        Chunks {
            rest: text,
            max: self.max_chunk_size.get(),
        }
    }
}

impl Default for ResponseChunker {
    fn default() -> Self {
        Self {
            max_chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Iterator over the chunks of one reply.
#[derive(Clone, Debug)]
pub struct Chunks<'a> {
    rest: &'a str,
    max: usize,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        let cut = self
            .rest
            .char_indices()
            .nth(self.max)
            .map(|(idx, _)| idx)
            .unwrap_or(self.rest.len());
        let (chunk, rest) = self.rest.split_at(cut);
        self.rest = rest;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.rest.is_empty() {
            return (0, Some(0));
        }
        // Every char is at least one byte and at most four.
        let lower = self.rest.len().div_ceil(4).div_ceil(self.max);
        let upper = self.rest.len().div_ceil(self.max);
        (lower, Some(upper))
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}
