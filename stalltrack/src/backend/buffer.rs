use std::{borrow::Cow, io::Read};

use log::info;

/// Free space that must remain after a read; below it the next read gets a
/// doubled capacity.
pub const BUFFER_HEADROOM: usize = 100;

/// Sample text captured from a data source.
///
/// `capacity` bounds a single read and never shrinks.
#[derive(Debug, Default)]
pub struct RawBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl RawBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    /// Raise the capacity to at least `capacity`.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.capacity = capacity;
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Replace the contents with at most `capacity` bytes from `reader`.
    ///
    /// On error the buffer is left empty.
    pub fn fill_from<R: Read>(&mut self, reader: R) -> std::io::Result<usize> {
        self.data.clear();
        match reader.take(self.capacity as u64).read_to_end(&mut self.data) {
            Ok(n) => Ok(n),
            Err(e) => {
                self.data.clear();
                Err(e)
            }
        }
    }

    /// Double the capacity when the last read left less than
    /// [`BUFFER_HEADROOM`] bytes unused. Returns true if it grew.
    pub fn grow_if_tight(&mut self) -> bool {
        if self.data.len() + BUFFER_HEADROOM <= self.capacity {
            return false;
        }
        self.capacity = (self.capacity * 2).max(BUFFER_HEADROOM * 2);
        info!(
            "sched_debug is getting larger, increasing the buffer to {}",
            self.capacity
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_is_bounded_by_capacity() {
        let mut buffer = RawBuffer::with_capacity(8);
        let n = buffer.fill_from(&b"0123456789abcdef"[..]).unwrap();
        assert_eq!(n, 8);
        assert_eq!(buffer.as_bytes(), b"01234567");
    }

    #[test]
    fn test_refill_replaces_contents() {
        let mut buffer = RawBuffer::with_capacity(64);
        buffer.fill_from(&b"first sample"[..]).unwrap();
        buffer.fill_from(&b"second"[..]).unwrap();
        assert_eq!(buffer.text(), "second");
    }

    #[test]
    fn test_grow_when_headroom_is_low() {
        let mut buffer = RawBuffer::with_capacity(150);
        buffer.fill_from(&[b'x'; 60][..]).unwrap();
        assert!(buffer.grow_if_tight());
        assert_eq!(buffer.capacity(), 300);

        // 60 + 100 fits in 300
        assert!(!buffer.grow_if_tight());
        assert_eq!(buffer.capacity(), 300);
    }

    #[test]
    fn test_ensure_capacity_never_shrinks() {
        let mut buffer = RawBuffer::with_capacity(4096);
        buffer.ensure_capacity(1024);
        assert_eq!(buffer.capacity(), 4096);
        buffer.ensure_capacity(8192);
        assert_eq!(buffer.capacity(), 8192);
    }
}
