//! Signal handling for long-running commands.
//!
//! SIGINT, SIGTERM and SIGHUP end the run. SIGUSR1 asks the coordinator to
//! flush its in-memory record to storage, the same as a suspend.

use anyhow::{Context, Result};
use signal_hook::{
    consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGUSR1},
    iterator::Signals,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, channel};
use std::thread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalMessage {
    /// SIGTERM, SIGINT or SIGHUP
    Shutdown,
    /// SIGUSR1
    Persist,
}

/// Signal handling state shared between threads
pub struct SignalState {
    /// Cleared once a shutdown signal arrives
    pub running: Arc<AtomicBool>,
    pub signal_receiver: Receiver<SignalMessage>,
}

impl SignalState {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Register the handlers and start the listener thread.
pub fn setup_signal_handler() -> Result<SignalState> {
    let running = Arc::new(AtomicBool::new(true));
    let (signal_sender, signal_receiver) = channel::<SignalMessage>();

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP, SIGUSR1])
        .context("failed to register signal handlers")?;

    let running_clone = running.clone();
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                let message = match sig {
                    SIGUSR1 => SignalMessage::Persist,
                    _ => {
                        log_pipe!();
                        log_info!("Received shutdown signal ({sig})");
                        running_clone.store(false, Ordering::SeqCst);
                        SignalMessage::Shutdown
                    }
                };
                if signal_sender.send(message).is_err() || message == SignalMessage::Shutdown {
                    break;
                }
            }
        })
        .context("failed to spawn signal listener")?;

    Ok(SignalState {
        running,
        signal_receiver,
    })
}
