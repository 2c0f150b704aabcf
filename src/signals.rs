//! Translation of POSIX signals into control events.

use std::thread;

use anyhow::{Context, Result};
use log::{error, info};
use signal_hook::{
    consts::{SIGHUP, SIGINT, SIGTERM},
    iterator::{Handle, Signals},
};

use crate::event::{Event, EventBus};

/// Maps a delivered signal to the event it requests.
pub fn event_for(signal: i32) -> Option<Event> {
    match signal {
        SIGINT | SIGTERM => Some(Event::Shutdown),
        SIGHUP => Some(Event::Reload),
        _ => None,
    }
}

/// Background thread forwarding SIGINT/SIGTERM/SIGHUP onto an [`EventBus`].
pub struct SignalListener {
    handle: Handle,
    thread: Option<thread::JoinHandle<()>>,
}

impl SignalListener {
    /// Installs the handlers and starts forwarding.
    pub fn spawn(bus: EventBus) -> Result<Self> {
        let mut signals =
            Signals::new([SIGINT, SIGTERM, SIGHUP]).context("Failed to register signal handlers")?;
        let handle = signals.handle();

        let thread = thread::Builder::new()
            .name("signals".into())
            .spawn(move || {
                for signal in signals.forever() {
                    let Some(event) = event_for(signal) else {
                        continue;
                    };
                    info!("Signal {signal} received, requesting {event:?}");
                    if let Err(e) = bus.publish(event) {
                        error!("Failed to forward signal {signal}: {e}");
                        break;
                    }
                }
            })
            .context("Failed to spawn signal thread")?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn termination_signals_share_one_event() {
        assert_eq!(event_for(SIGINT), Some(Event::Shutdown));
        assert_eq!(event_for(SIGTERM), Some(Event::Shutdown));
        assert_eq!(event_for(SIGHUP), Some(Event::Reload));
        assert_eq!(event_for(signal_hook::consts::SIGUSR1), None);
    }
}
