use super::*;
use std::sync::atomic::Ordering;

/// Read-only views of an instance for monitoring and tests.
impl Instance {
    pub fn state(&self) -> InstanceState {
        self.shared.state()
    }

    /// Where the keepalive monitor is in its cycle. `Idle` when there is no
    /// monitor.
    pub fn monitor_state(&self) -> MonitorState {
        MonitorState::from_u8(self.shared.monitor_state.load(Ordering::Acquire))
    }

    /// Keepalive probes successfully sent to parodus
    pub fn keepalive_count(&self) -> u64 {
        self.shared.keepalive_count.load(Ordering::Relaxed)
    }

    /// Silences that triggered a reconnect
    pub fn reconnect_count(&self) -> u64 {
        self.shared.reconnect_count.load(Ordering::Relaxed)
    }

    /// Whether parodus has accepted the registration
    pub fn is_auth_received(&self) -> bool {
        self.shared.auth_received.load(Ordering::Acquire)
    }

    /// The URL the receiver is bound to, with any `:0` port resolved.
    /// `None` for a send-only instance or after the receiver is closed.
    pub fn receiver_url(&self) -> Option<String> {
        if self.shared.receiver.lock().is_none() {
            return None;
        }
        self.shared.receiver_url.lock().clone()
    }

    pub fn service_name(&self) -> &str {
        self.shared.service()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Messages waiting to be received
    pub fn pending(&self) -> usize {
        self.queue.as_ref().map_or(0, |q| q.len())
    }
}
