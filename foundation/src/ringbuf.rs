//! Single-producer/single-consumer byte ring buffer.
//!
//! The buffer is a power-of-two byte region addressed by two monotonically
//! increasing cursors. Only the cursor value modulo the capacity is ever used
//! for addressing, so the cursors are free to wrap around the integer range;
//! the distance `head - tail` (in wrapping arithmetic) is always the number
//! of unread bytes. Because the capacity is a power of two, the modulo is a
//! bit-mask.
//!
//! The storage is anything that dereferences to a byte slice: a borrowed
//! `&mut [u8]`, an inline `[u8; N]`, or (with the `alloc` feature) a boxed
//! slice. A storage whose length is not a power of two is usable; the
//! capacity is rounded down to the largest power of two that fits.
//!
//! # Usage
//!
//! ```
//! use ember_foundation::ringbuf::RingBuf;
//!
//! let mut rb = RingBuf::new([0u8; 64]).unwrap();
//! assert_eq!(rb.write(b"hello"), 5);
//! let mut out = [0u8; 5];
//! assert_eq!(rb.read(0, &mut out), 5);
//! assert_eq!(&out, b"hello");
//! ```
//!
//! # Concurrency
//!
//! The buffer itself takes no locks and spawns no threads. All methods take
//! `&mut self`; a single producer and a single consumer on different threads
//! must split access externally (e.g. behind a mutex), and multi-producer
//! callers must serialise among themselves.

use core::fmt;

/// Error returned by [`RingBuf::new`] for unusable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "ring buffer construction errors must be handled"]
pub enum RingBufError {
    /// The storage holds less than one byte.
    ZeroCapacity,
}

impl fmt::Display for RingBufError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroCapacity => write!(f, "storage too small for a ring buffer"),
        }
    }
}

/// Power-of-two byte FIFO with non-destructive peek and cancellable writes.
pub struct RingBuf<S> {
    storage: S,
    /// Usable capacity: the largest power of two <= storage length.
    capacity: usize,
    /// Write cursor. Monotonically increasing, wrapping.
    head: usize,
    /// Read cursor. Monotonically increasing, wrapping; `head - tail` is the
    /// number of unread bytes.
    tail: usize,
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> RingBuf<S> {
    /// Wrap `storage` in a ring buffer.
    ///
    /// The capacity is the largest power of two that fits in the storage;
    /// any excess bytes are never touched. Fails with
    /// [`RingBufError::ZeroCapacity`] on empty storage.
    pub fn new(storage: S) -> Result<Self, RingBufError> {
        let len = storage.as_ref().len();
        if len == 0 {
            return Err(RingBufError::ZeroCapacity);
        }
        // Largest power of two <= len.
        let capacity = 1usize << (usize::BITS - 1 - len.leading_zeros());
        Ok(Self {
            storage,
            capacity,
            head: 0,
            tail: 0,
        })
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.head.wrapping_sub(self.tail)
    }

    /// True when no unread bytes remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Usable capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free space in bytes.
    pub fn available(&self) -> usize {
        self.capacity - self.len()
    }

    fn index(&self, cursor: usize) -> usize {
        cursor & (self.capacity - 1)
    }

    /// Append up to `data.len()` bytes, bounded by the free space.
    ///
    /// Returns the number of bytes actually written. The write wraps at the
    /// capacity boundary; from the reader's perspective the bytes are
    /// contiguous.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let n = self.available().min(data.len());
        let index = self.index(self.head);
        let contiguous = self.capacity - index;
        let cut = n.min(contiguous);

        let buf = self.storage.as_mut();
        buf[index..index + cut].copy_from_slice(&data[..cut]);
        buf[..n - cut].copy_from_slice(&data[cut..n]);

        self.head = self.head.wrapping_add(n);
        n
    }

    /// Roll the write cursor back by `size` bytes.
    ///
    /// Undoes the tail end of previous writes that have not been consumed
    /// yet. Returns `size` on success, 0 when fewer than `size` unread bytes
    /// exist.
    pub fn write_cancel(&mut self, size: usize) -> usize {
        if self.len() < size {
            return 0;
        }
        self.head = self.head.wrapping_sub(size);
        size
    }

    /// Copy unread bytes starting at `offset` into `buf` without consuming.
    ///
    /// Returns the number of bytes copied: `min(buf.len(), len() - offset)`,
    /// or 0 when `offset` is past the unread region.
    pub fn peek(&self, offset: usize, buf: &mut [u8]) -> usize {
        let readable = self.len().saturating_sub(offset);
        let n = readable.min(buf.len());
        if n == 0 {
            return 0;
        }

        let index = self.index(self.tail.wrapping_add(offset));
        let contiguous = self.capacity - index;
        let cut = n.min(contiguous);

        let storage = self.storage.as_ref();
        buf[..cut].copy_from_slice(&storage[index..index + cut]);
        buf[cut..n].copy_from_slice(&storage[..n - cut]);

        n
    }

    /// Advance the read cursor by `size` bytes.
    ///
    /// Returns false (and consumes nothing) when fewer than `size` unread
    /// bytes exist.
    pub fn consume(&mut self, size: usize) -> bool {
        if self.len() < size {
            return false;
        }
        self.tail = self.tail.wrapping_add(size);
        true
    }

    /// Peek at `offset` then consume the bytes read, as one operation.
    ///
    /// The consumed bytes are taken from the front of the unread region
    /// regardless of `offset`.
    pub fn read(&mut self, offset: usize, buf: &mut [u8]) -> usize {
        let n = self.peek(offset, buf);
        if n > 0 {
            self.consume(n);
        }
        n
    }
}

#[cfg(feature = "alloc")]
mod boxed {
    extern crate alloc;

    use alloc::{boxed::Box, vec};

    use super::{RingBuf, RingBufError};

    impl RingBuf<Box<[u8]>> {
        /// Allocate a heap-backed ring buffer of (at least) `capacity` bytes.
        pub fn boxed(capacity: usize) -> Result<Self, RingBufError> {
            Self::new(vec![0u8; capacity].into_boxed_slice())
        }
    }
}
