use std::sync::{Arc, Mutex, MutexGuard};

use tracing::trace;

use crate::utils::error::BufferError;

#[derive(Debug)]
struct Slots {
    /// `None` marks a slot whose buffer is checked out.
    free: Vec<Option<Vec<u8>>>,
}

/// Fixed set of reusable byte buffers shared between the inbound dispatch
/// path and the update agent.
///
/// `acquire` never blocks: an empty pool is backpressure the caller must
/// handle (usually by dropping the message).
#[derive(Clone, Debug)]
pub struct BufferPool {
    slots: Arc<Mutex<Slots>>,
    capacity: usize,
}

/// A buffer checked out of a [`BufferPool`].
///
/// Exactly one owner at a time; the slot returns to the pool on
/// [`PooledBuffer::release`] or when the handle is dropped.
#[derive(Debug)]
pub struct PooledBuffer {
    slot: usize,
    data: Vec<u8>,
    topic: String,
    pool: BufferPool,
}

impl BufferPool {
    /// Create `count` buffers of `capacity` bytes each.
    pub fn new(count: usize, capacity: usize) -> Self {
        let free = (0..count).map(|_| Some(Vec::with_capacity(capacity))).collect();
        Self {
            slots: Arc::new(Mutex::new(Slots { free })),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check out a free buffer, or `None` when every buffer is in use.
    pub fn acquire(&self) -> Option<PooledBuffer> {
        let mut slots = self.lock();
        let (slot, data) = slots
            .free
            .iter_mut()
            .enumerate()
            .find_map(|(idx, s)| s.take().map(|data| (idx, data)))?;
        drop(slots);

        trace!("Acquired buffer {slot}");
        Some(PooledBuffer {
            slot,
            data,
            topic: String::new(),
            pool: self.clone(),
        })
    }

    /// Return a buffer to the pool.
    pub fn release(&self, buffer: PooledBuffer) {
        drop(buffer);
    }

    fn put_back(&self, slot: usize, mut data: Vec<u8>) {
        data.clear();
        let mut slots = self.lock();
        if let Some(entry) = slots.free.get_mut(slot) {
            *entry = Some(data);
        }
        trace!("Released buffer {slot}");
    }

    /// Number of buffers currently free.
    pub fn available(&self) -> usize {
        self.lock().free.iter().filter(|s| s.is_some()).count()
    }

    /// Total number of buffers.
    pub fn size(&self) -> usize {
        self.lock().free.len()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.capacity
    }
}

impl PooledBuffer {
    /// Copy an inbound publish into the buffer.
    pub fn fill(&mut self, topic: &str, payload: &[u8]) -> Result<(), BufferError> {
        let capacity = self.pool.capacity;
        if payload.len() > capacity {
            return Err(BufferError::TooLarge {
                len: payload.len(),
                capacity,
            });
        }
        self.data.clear();
        self.data.extend_from_slice(payload);
        self.topic.clear();
        self.topic.push_str(topic);
        Ok(())
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Hand the buffer back to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        self.pool.put_back(self.slot, data);
    }
}
