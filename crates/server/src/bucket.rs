//! Scatter-gather output buffers.
//!
//! Everything a protocol wants to send is queued as a [`BucketChain`]: an
//! ordered list of byte ranges that are either borrowed static data or
//! owned buffers. Header bytes, payloads handed in by the application and
//! framing produced on the fly are chained without being copied into one
//! buffer; the chain is flushed with a single vectored write per writable
//! event (see [`crate::net::send_chain`]).
//!
//! Each [`Bucket`] remembers how much of it has already been written, so a
//! partial write resumes exactly where it stopped.

use bytes::Bytes;
use std::collections::VecDeque;
use std::io::IoSlice;

/// One contiguous range of pending output.
///
/// Invariant: `sent <= data.len()`.
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    data: Bytes,
    sent: usize,
}

impl Bucket {
    /// Borrows static data without copying.
    pub fn borrowed(data: &'static [u8]) -> Self {
        Self { data: Bytes::from_static(data), sent: 0 }
    }

    /// Copies `data` into a new owned buffer.
    pub fn copy(data: &[u8]) -> Self {
        Self { data: Bytes::copy_from_slice(data), sent: 0 }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self { data: data.into(), sent: 0 }
    }

    /// Total length, sent or not.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn sent(&self) -> usize {
        self.sent
    }

    /// The part still waiting to be written.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.sent..]
    }

    pub fn remaining_len(&self) -> usize {
        self.data.len() - self.sent
    }

    fn advance(&mut self, n: usize) {
        debug_assert!(self.sent + n <= self.data.len());
        self.sent += n;
    }
}

impl From<Bytes> for Bucket {
    fn from(data: Bytes) -> Self {
        Self::from_bytes(data)
    }
}

impl From<&'static [u8]> for Bucket {
    fn from(data: &'static [u8]) -> Self {
        Self::borrowed(data)
    }
}

/// An ordered chain of buckets.
#[derive(Debug, Default)]
pub struct BucketChain {
    buckets: VecDeque<Bucket>,
}

impl BucketChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bucket: impl Into<Bucket>) {
        self.buckets.push_back(bucket.into());
    }

    /// Queues `bucket` in front of everything else.
    pub fn push_front(&mut self, bucket: impl Into<Bucket>) {
        self.buckets.push_front(bucket.into());
    }

    /// Moves every bucket of `other` to the end of this chain, leaving
    /// `other` empty.
    pub fn append(&mut self, other: &mut BucketChain) {
        if self.buckets.is_empty() {
            std::mem::swap(&mut self.buckets, &mut other.buckets);
        } else {
            self.buckets.append(&mut other.buckets);
        }
    }

    /// Bytes not yet written, summed over all buckets.
    pub fn total_length(&self) -> usize {
        self.buckets.iter().map(Bucket::remaining_len).sum()
    }

    /// Number of buckets, including zero length ones.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    /// Fills `slices` with the unsent part of up to `max` leading buckets.
    ///
    /// Zero length ranges don't take up a slot.
    pub fn io_slices<'a>(&'a self, slices: &mut Vec<IoSlice<'a>>, max: usize) {
        slices.extend(
            self.buckets.iter().map(Bucket::remaining).filter(|rest| !rest.is_empty()).take(max).map(IoSlice::new),
        );
    }

    /// Records that `n` bytes from the front of the chain were written.
    ///
    /// Fully written buckets are dropped; a partially written one stays at
    /// the head with its offset advanced. Returns the bytes left over if `n`
    /// exceeded the chain.
    pub fn consume(&mut self, mut n: usize) -> usize {
        while let Some(head) = self.buckets.front_mut() {
            let rest = head.remaining_len();
            if n < rest {
                head.advance(n);
                return 0;
            }
            n -= rest;
            self.buckets.pop_front();
        }
        n
    }

    /// Copies the unsent bytes out, for logs and tests.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_length());
        for bucket in &self.buckets {
            out.extend_from_slice(bucket.remaining());
        }
        out
    }
}

impl<B: Into<Bucket>> FromIterator<B> for BucketChain {
    fn from_iter<T: IntoIterator<Item = B>>(iter: T) -> Self {
        Self { buckets: iter.into_iter().map(Into::into).collect() }
    }
}
