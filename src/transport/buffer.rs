//! Reusable datagram buffer.

/// Fixed-capacity byte buffer reused across sends or receives.
#[derive(Debug)]
pub struct PacketBuffer {
    data: Vec<u8>,
    len: usize,
}

impl PacketBuffer {
    /// Create a zeroed buffer of `capacity` bytes.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            len: 0,
        }
    }

    /// Reset the logical length of the buffer.
    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Expose the whole buffer as a mutable slice for writes.
    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    /// Expose the filled portion of the buffer as an immutable slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Current logical length of the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check whether the buffer contains no data.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Set the length of meaningful data within the buffer, clamped to the capacity.
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(len <= self.capacity(), "buffer length exceeds capacity");
        self.len = len.min(self.capacity());
    }

    /// Return the configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}
