use ringbuf::{
    traits::{Consumer, Observer, RingBuffer as _},
    HeapRb,
};

use super::Sample;

/// Fixed-capacity store of the most recent samples.
///
/// Pushing past capacity evicts the oldest samples first. Readers only ever get
/// copies via [`RingBuffer::snapshot`]. Shared access goes through a `Mutex`
/// held by the stream controller, so one push or one snapshot is the whole
/// critical section.
pub struct RingBuffer {
    inner: HeapRb<Sample>,
}

impl RingBuffer {
    /// Creates an empty buffer holding at most `capacity` samples (minimum 1)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: HeapRb::new(capacity.max(1)),
        }
    }

    /// Appends `samples`, overwriting the oldest data on overflow
    pub fn push(&mut self, samples: &[Sample]) {
        self.inner.push_slice_overwrite(samples);
    }

    /// Copy of the current contents, oldest first
    #[must_use]
    pub fn snapshot(&self) -> Vec<Sample> {
        self.inner.iter().copied().collect()
    }

    /// Drops all samples; capacity is unchanged
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Number of samples currently held
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Whether nothing has been pushed since creation or the last clear
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Maximum number of samples retained
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}
