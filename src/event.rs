//! Control events delivered to the monitoring loop.

use anyhow::Result;
use tokio::sync::mpsc;

/// Requests the lifecycle controller handles between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Re-read the policy file.
    Reload,
    /// Restore safe defaults and exit.
    Shutdown,
}

/// Buffered, cloneable sender side of the control-event queue.
///
/// Events queue up while a tick runs and are consumed by the loop only once
/// the tick finished, so handlers never see half-updated control state.
///
/// # Example
///
/// ```
/// use gpu_thermald::event::{Event, EventBus};
///
/// let (bus, mut events) = EventBus::new();
/// bus.publish(Event::Reload).unwrap();
/// assert_eq!(events.try_recv().ok(), Some(Event::Reload));
/// ```
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: mpsc::UnboundedSender<Event>,
}

impl EventBus {
    /// Creates the bus together with its single receiver.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queues an event. Fails once the receiver is gone.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let (bus, mut rx) = EventBus::new();
        let clone = bus.clone();

        bus.publish(Event::Reload).unwrap();
        clone.publish(Event::Shutdown).unwrap();

        assert_eq!(rx.recv().await, Some(Event::Reload));
        assert_eq!(rx.recv().await, Some(Event::Shutdown));
    }

    #[test]
    fn publish_fails_without_receiver() {
        let (bus, rx) = EventBus::new();
        drop(rx);
        assert!(bus.publish(Event::Shutdown).is_err());
    }
}
