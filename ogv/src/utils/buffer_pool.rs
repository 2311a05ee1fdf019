use std::collections::VecDeque;

/// A free-list of reusable byte buffers for packet reassembly.
///
/// A decode session is single-threaded and owns its demultiplexer
/// exclusively, so the pool hands out plain `Vec<u8>` with no locking.
#[derive(Debug)]
pub struct BufferPool {
    free: VecDeque<Vec<u8>>,
    max_buffers: usize,
    buffer_capacity: usize,
}

impl BufferPool {
    /// `max_buffers` bounds the free list; `buffer_capacity` is the initial
    /// capacity of freshly created buffers.
    pub fn new(max_buffers: usize, buffer_capacity: usize) -> Self {
        Self {
            free: VecDeque::with_capacity(max_buffers),
            max_buffers,
            buffer_capacity,
        }
    }

    /// Takes a buffer from the free list, or allocates one.
    pub fn acquire(&mut self) -> Vec<u8> {
        self.free
            .pop_front()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_capacity))
    }

    /// Returns a buffer for reuse. Dropped if the free list is full.
    pub fn release(&mut self, mut buffer: Vec<u8>) {
        buffer.clear();

        if self.free.len() < self.max_buffers {
            self.free.push_back(buffer);
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(16, 64 * 1024)
    }
}
