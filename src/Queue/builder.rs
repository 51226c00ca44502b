use super::bounded::BoundedQueue;
use super::layout::MAX_CAPACITY;

pub struct QueueBuilder {
    name: String,
    capacity: usize,
}

impl Default for QueueBuilder {
    fn default() -> Self {
        Self {
            name: String::from("/LIBPD_QUEUE"),
            capacity: 50,
        }
    }
}

impl QueueBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn build<T>(self) -> std::io::Result<BoundedQueue<T>> {
        if self.capacity == 0 || self.capacity > MAX_CAPACITY {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "Queue {}: capacity must be between 1 and {} (got {})",
                    self.name, MAX_CAPACITY, self.capacity
                ),
            ));
        }
        tracing::debug!(queue = %self.name, capacity = self.capacity, "queue created");
        Ok(BoundedQueue::new(self.name, self.capacity))
    }
}
