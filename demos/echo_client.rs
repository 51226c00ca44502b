//! Registers with parodus, prints every event, and answers every request by
//! echoing its payload lowercased with source and dest swapped.
//!
//! Configure with a JSON file given as the first argument, or run with the
//! defaults under the service name "iot". Ctrl-C closes the receiver and
//! exits.

use libparodus::{Config, Instance, Received, Request, WrpMessage};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_json(&std::fs::read_to_string(path)?)?,
        None => Config::new("iot").receive(true).keepalive_timeout_secs(20),
    };

    let instance = Arc::new(Instance::init(config)?);
    {
        let instance = Arc::downgrade(&instance);
        ctrlc::set_handler(move || {
            if let Some(instance) = instance.upgrade() {
                let _ = instance.close_receiver();
            }
        })?;
    }

    loop {
        match instance.receive(Duration::from_secs(2)) {
            Ok(Received::Message(WrpMessage::Request(req))) => {
                println!("request {} from {}", req.transaction_uuid, req.source);
                let reply = Request {
                    source: req.dest.clone(),
                    dest: req.source.clone(),
                    payload: req.payload.to_ascii_lowercase(),
                    ..req
                };
                if let Err(e) = instance.send(&reply.into()) {
                    eprintln!("reply failed: {e}");
                }
            }
            Ok(Received::Message(WrpMessage::Event(ev))) => {
                println!(
                    "event from {} to {}: {}",
                    ev.source,
                    ev.dest,
                    String::from_utf8_lossy(&ev.payload)
                );
            }
            Ok(Received::Timeout) => {}
            Ok(Received::Closed) => break,
            Err(e) => eprintln!("receive: {e} (code {:#x})", e.code()),
        }
    }

    println!(
        "keepalives sent: {}, reconnects: {}",
        instance.keepalive_count(),
        instance.reconnect_count()
    );
    if let Ok(instance) = Arc::try_unwrap(instance) {
        let discarded = instance.shutdown();
        println!("discarded {discarded} undelivered messages");
    }
    Ok(())
}
