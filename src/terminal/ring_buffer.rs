use std::collections::VecDeque;

/// Default capacity of a per-direction capture buffer (100 KiB).
pub const DEFAULT_CAPACITY: usize = 100 * 1024;

/// Fixed-capacity byte buffer that drops the oldest bytes once full.
#[derive(Debug, Clone)]
pub struct RingTextBuffer {
    data: VecDeque<u8>,
    capacity: usize,
}

impl RingTextBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends `bytes`, overwriting the oldest content when the buffer is full.
    pub fn write(&mut self, bytes: &[u8]) {
        // only the tail can survive when a single write exceeds the capacity
        let bytes = if bytes.len() > self.capacity {
            &bytes[bytes.len() - self.capacity..]
        } else {
            bytes
        };
        let overflow = (self.data.len() + bytes.len()).saturating_sub(self.capacity);
        self.data.drain(..overflow);
        self.data.extend(bytes);
    }

    /// Returns the buffered bytes, oldest first.
    pub fn to_vec(&self) -> Vec<u8> {
        let (head, tail) = self.data.as_slices();
        let mut out = Vec::with_capacity(self.data.len());
        out.extend_from_slice(head);
        out.extend_from_slice(tail);
        out
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RingTextBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
