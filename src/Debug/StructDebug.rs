use std::fmt;

use crate::session::Instance;
use crate::Queue::BoundedQueue;

/// Debug function for BoundedQueue
///
/// Shows the queue name, fill level and whether it has been closed. Entries
/// themselves are never printed.
pub fn debug_bounded_queue<T>(queue: &BoundedQueue<T>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BoundedQueue")
        .field("name", &queue.name())
        .field("len", &queue.len())
        .field("capacity", &queue.capacity())
        .field("closed", &queue.is_closed())
        .finish()
}

/// Debug function for Instance
///
/// Shows:
/// - Service name and lifecycle state
/// - Receiver URL (if bound) and monitor state
/// - Keepalive/reconnect counters
pub fn debug_instance(instance: &Instance, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Instance")
        .field("service", &instance.service_name())
        .field("state", &instance.state())
        .field("receiver_url", &instance.receiver_url())
        .field("monitor", &instance.monitor_state())
        .field("keepalive_count", &instance.keepalive_count())
        .field("reconnect_count", &instance.reconnect_count())
        .field("auth_received", &instance.is_auth_received())
        .finish_non_exhaustive()
}
