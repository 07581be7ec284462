// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity text buffers with explicit length tracking.
//!
//! Resolution results live in caller-owned storage and must not allocate, so
//! names are copied into inline arrays. Copies silently truncate at capacity;
//! the recorded length is the only reliable end marker since a truncated
//! buffer carries no terminator.

use std::fmt;

/// Outcome of a bounded copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Copied {
    /// Number of bytes actually written.
    pub written: usize,
    /// Whether the source was longer than the capacity.
    pub truncated: bool,
}

/// Text buffer holding at most `N` bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BoundedStr<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> BoundedStr<N> {
    /// Maximum number of bytes this buffer can hold.
    pub const CAPACITY: usize = N;

    /// Creates an empty buffer.
    pub const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    /// Creates a buffer holding (a prefix of) `src`.
    pub fn from_bytes(src: &[u8]) -> Self {
        let mut this = Self::new();
        this.copy_from(src);
        this
    }

    /// Replaces the contents with `src`, truncating at capacity.
    pub fn copy_from(&mut self, src: &[u8]) -> Copied {
        let written = src.len().min(N);
        self.buf[..written].copy_from_slice(&src[..written]);
        self.buf[written..].fill(0);
        self.len = written;
        Copied {
            written,
            truncated: written < src.len(),
        }
    }

    /// Contents as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    /// Whole backing array, including the zeroed tail past [`Self::len`].
    pub fn raw(&self) -> &[u8; N] {
        &self.buf
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> Default for BoundedStr<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PartialEq<[u8]> for BoundedStr<N> {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl<const N: usize> PartialEq<&str> for BoundedStr<N> {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

/// Renders the contents lossily: truncation may split a UTF-8 sequence.
impl<const N: usize> fmt::Display for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in self.as_bytes().utf8_chunks() {
            f.write_str(chunk.valid())?;
            if !chunk.invalid().is_empty() {
                f.write_str("\u{FFFD}")?;
            }
        }
        Ok(())
    }
}

impl<const N: usize> fmt::Debug for BoundedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
