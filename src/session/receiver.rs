// Receive thread: pulls frames off the receiver socket, answers the control
// frames and queues requests and events for the application.

use std::sync::atomic::Ordering::Release;
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};

use super::{Shared, WrpQueue};
use crate::wrp::{classify_inbound, Inbound, MessageKind, AUTH_OK};
use crate::Core::transport::Polled;
use crate::Queue::SendOutcome;

pub(crate) fn run(shared: Arc<Shared>, queue: Arc<WrpQueue>) {
    let poll = shared.config.poll_interval;
    debug!(service = %shared.service(), "receive thread started");

    while !shared.stopping() {
        // the lock is held for at most one poll interval
        let polled = {
            let mut slot = shared.receiver.lock();
            match slot.as_mut() {
                Some(socket) => socket.poll_frame(poll),
                None => Ok(Polled::NoPeer),
            }
        };

        match polled {
            Ok(Polled::Frame(bytes)) => {
                shared.touch();
                if !handle_frame(&shared, &queue, bytes) {
                    break;
                }
            }
            Ok(Polled::Idle) => {}
            Ok(Polled::NoPeer) => thread::sleep(poll),
            Ok(Polled::PeerClosed) => {
                debug!(service = %shared.service(), "parodus closed its connection");
                thread::sleep(poll);
            }
            Err(e) => {
                warn!(service = %shared.service(), error = %e, "receive failed");
                thread::sleep(poll);
            }
        }
    }

    debug!(service = %shared.service(), "receive thread stopped");
}

/// Returns false once the queue is closed.
fn handle_frame(shared: &Shared, queue: &WrpQueue, bytes: Vec<u8>) -> bool {
    match classify_inbound(&bytes) {
        Ok(Inbound::Deliver(kind)) => deliver(shared, queue, bytes, kind),
        Ok(Inbound::Auth { status }) => {
            if status == AUTH_OK {
                shared.auth_received.store(true, Release);
                info!(service = %shared.service(), "auth received");
            } else {
                warn!(service = %shared.service(), status, "parodus refused registration");
            }
            true
        }
        Ok(Inbound::KeepAlive) => {
            debug!(service = %shared.service(), "keepalive from parodus");
            true
        }
        Ok(Inbound::Ignored) => true,
        Err(e) => {
            warn!(service = %shared.service(), error = %e, "dropping undecodable frame");
            true
        }
    }
}

fn deliver(shared: &Shared, queue: &WrpQueue, bytes: Vec<u8>, kind: MessageKind) -> bool {
    let wait = shared.config.poll_interval;
    let mut bytes = bytes;
    loop {
        match queue.send(bytes, wait) {
            SendOutcome::Sent => {
                debug!(service = %shared.service(), ?kind, "message queued");
                return true;
            }
            SendOutcome::Timeout(back) => {
                if shared.stopping() {
                    return false;
                }
                // a full queue is the application's doing, not parodus going quiet
                shared.touch();
                bytes = back;
            }
            SendOutcome::Closed(_) => return false,
        }
    }
}
