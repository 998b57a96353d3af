//! Fixed-capacity read buffer with compaction.
//!
//! Bytes arrive from the transport into [`ReadBuffer::mutable_region`] and are
//! made visible with [`ReadBuffer::commit`]. Consumed bytes are dropped from
//! the front and whatever is left is moved back to offset 0, so a partial
//! frame that was over-read survives until the next read on the same stream.

use crate::error::{Error, Result};
use crate::types::MAX_FIXED_HEADER_LEN;

/// Default read buffer capacity.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 1024;

/// A fixed-size byte region with a readable prefix.
#[derive(Debug)]
pub struct ReadBuffer {
    storage: Box<[u8]>,
    readable_len: usize,
}

impl ReadBuffer {
    /// Create a buffer with the given capacity.
    ///
    /// The capacity must hold at least one full fixed header.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < MAX_FIXED_HEADER_LEN {
            return Err(Error::InvalidConfig(format!(
                "read buffer size {capacity} is smaller than {MAX_FIXED_HEADER_LEN}"
            )));
        }

        Ok(Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            readable_len: 0,
        })
    }

    /// Bytes received but not yet consumed.
    pub fn readable_region(&self) -> &[u8] {
        &self.storage[..self.readable_len]
    }

    /// Free space after the readable bytes.
    ///
    /// Reading into a full buffer is a caller bug and reported as
    /// [`Error::ReadBufferFull`].
    pub fn mutable_region(&mut self) -> Result<&mut [u8]> {
        if self.is_full() {
            return Err(Error::ReadBufferFull);
        }
        Ok(&mut self.storage[self.readable_len..])
    }

    /// Mark `n` bytes of the mutable region as readable.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.readable_len + n <= self.storage.len());
        self.readable_len = (self.readable_len + n).min(self.storage.len());
    }

    /// Drop `n` bytes from the front and compact the rest to offset 0.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.readable_len);
        let n = n.min(self.readable_len);
        self.storage.copy_within(n..self.readable_len, 0);
        self.readable_len -= n;
    }

    /// Forget all readable bytes.
    pub fn reset(&mut self) {
        self.readable_len = 0;
    }

    pub fn len(&self) -> usize {
        self.readable_len
    }

    pub fn is_empty(&self) -> bool {
        self.readable_len == 0
    }

    pub fn is_full(&self) -> bool {
        self.readable_len == self.storage.len()
    }

    pub fn capacity(&self) -> usize {
        self.storage.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(buf: &mut ReadBuffer, data: &[u8]) {
        let region = buf.mutable_region().unwrap();
        region[..data.len()].copy_from_slice(data);
        buf.commit(data.len());
    }

    #[test]
    fn test_rejects_small_capacity() {
        assert!(matches!(ReadBuffer::new(4), Err(Error::InvalidConfig(_))));
        assert_eq!(ReadBuffer::new(5).unwrap().capacity(), 5);
    }

    #[test]
    fn test_commit_and_consume_compacts() {
        let mut buf = ReadBuffer::new(8).unwrap();
        fill(&mut buf, &[1, 2, 3, 4, 5]);
        assert_eq!(buf.readable_region(), &[1, 2, 3, 4, 5]);
        assert_eq!(buf.mutable_region().unwrap().len(), 3);

        buf.consume(2);
        assert_eq!(buf.readable_region(), &[3, 4, 5]);
        assert_eq!(buf.mutable_region().unwrap().len(), 5);

        fill(&mut buf, &[6, 7]);
        assert_eq!(buf.readable_region(), &[3, 4, 5, 6, 7]);

        buf.consume(5);
        assert!(buf.is_empty());
        assert_eq!(buf.mutable_region().unwrap().len(), 8);
    }

    #[test]
    fn test_full_buffer() {
        let mut buf = ReadBuffer::new(5).unwrap();
        fill(&mut buf, &[0; 5]);
        assert!(buf.is_full());
        assert!(matches!(buf.mutable_region(), Err(Error::ReadBufferFull)));

        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.mutable_region().unwrap().len(), 5);
    }
}
