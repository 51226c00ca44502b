//! Keepalive and reconnect monitor.
//!
//! Probes parodus every quarter of the keepalive window. When nothing has
//! arrived for `keepalive_timeout * keepalive_max_missed`, the connection is
//! rebuilt: receiver rebound, sender reset, service re-registered. One such
//! silence counts as one reconnect however many rebuilds it takes.

use std::sync::atomic::Ordering::{AcqRel, Acquire, Release};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::Shared;
use crate::config::Config;
use crate::wrp::Frame;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No monitor (receive or keepalive disabled)
    Idle = 0,
    Connected = 1,
    Reconnecting = 2,
    /// Rebuilding keeps failing; still retrying
    Failed = 3,
}

impl MonitorState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => MonitorState::Connected,
            2 => MonitorState::Reconnecting,
            3 => MonitorState::Failed,
            _ => MonitorState::Idle,
        }
    }
}

struct Cycle {
    failures: u32,
    /// `now_ms` when the last successful rebuild in this cycle started
    rebuilt_at: Option<u64>,
}

pub(crate) fn run(shared: Arc<Shared>) {
    let timeout = shared.config.keepalive_timeout;
    let interval = (timeout / 4).max(Duration::from_millis(1));
    let threshold = silence_threshold(&shared.config);

    set_state(&shared, MonitorState::Connected);
    shared.touch();
    debug!(service = %shared.service(), ?interval, ?threshold, "keepalive monitor started");

    let mut cycle = Cycle {
        failures: 0,
        rebuilt_at: None,
    };

    while !shared.wait_stop(interval) {
        match state(&shared) {
            MonitorState::Connected | MonitorState::Idle => {
                if shared.silence() < threshold {
                    probe(&shared);
                    continue;
                }
                let count = shared.reconnect_count.fetch_add(1, AcqRel) + 1;
                warn!(
                    service = %shared.service(),
                    silence = ?shared.silence(),
                    count,
                    "no traffic from parodus, reconnecting"
                );
                set_state(&shared, MonitorState::Reconnecting);
                cycle.failures = 0;
                cycle.rebuilt_at = None;
                attempt(&shared, &mut cycle);
            }
            MonitorState::Reconnecting | MonitorState::Failed => {
                if let Some(at) = cycle.rebuilt_at {
                    if shared.last_activity_ms() > at {
                        info!(service = %shared.service(), "connection to parodus restored");
                        set_state(&shared, MonitorState::Connected);
                        continue;
                    }
                }
                let due = match cycle.rebuilt_at {
                    Some(at) => Duration::from_millis(shared.now_ms().saturating_sub(at)) >= threshold,
                    None => true,
                };
                if due {
                    attempt(&shared, &mut cycle);
                }
            }
        }
    }

    debug!(service = %shared.service(), "keepalive monitor stopped");
}

/// How long parodus may stay quiet before the connection is rebuilt.
/// Saturates rather than overflowing for huge settings.
pub(crate) fn silence_threshold(config: &Config) -> Duration {
    config
        .keepalive_timeout
        .saturating_mul(config.keepalive_max_missed)
}

fn probe(shared: &Shared) {
    match shared.send_control(&Frame::ServiceAlive) {
        Ok(()) => {
            shared.keepalive_count.fetch_add(1, AcqRel);
        }
        Err(e) => debug!(service = %shared.service(), error = %e, "keepalive probe failed"),
    }
}

fn attempt(shared: &Shared, cycle: &mut Cycle) {
    let started = shared.now_ms();
    match shared.rebuild() {
        Ok(()) => {
            cycle.failures = 0;
            cycle.rebuilt_at = Some(started);
            if state(shared) == MonitorState::Failed {
                set_state(shared, MonitorState::Reconnecting);
            }
            debug!(service = %shared.service(), "connection rebuilt, waiting for parodus");
        }
        Err(e) => {
            cycle.failures += 1;
            cycle.rebuilt_at = None;
            warn!(
                service = %shared.service(),
                attempt = cycle.failures,
                error = %e,
                "reconnect attempt failed"
            );
            if cycle.failures >= shared.config.max_reconnect_attempts
                && state(shared) != MonitorState::Failed
            {
                error!(
                    service = %shared.service(),
                    attempts = cycle.failures,
                    "cannot reconnect to parodus, still retrying"
                );
                set_state(shared, MonitorState::Failed);
            }
        }
    }
}

fn state(shared: &Shared) -> MonitorState {
    MonitorState::from_u8(shared.monitor_state.load(Acquire))
}

fn set_state(shared: &Shared, state: MonitorState) {
    shared.monitor_state.store(state as u8, Release);
}
