use super::bounded::BoundedQueue;
use std::fmt;

impl<T> fmt::Debug for BoundedQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_bounded_queue(self, f)
    }
}
