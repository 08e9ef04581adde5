use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{SyncCommand, SyncEvent};

/// Broadcast event stream type used by UI subscribers.
pub type EventStream = broadcast::Receiver<SyncEvent>;

/// Errors returned by channel operations.
#[derive(Debug, Error)]
pub enum SyncChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
}

/// Fan-out of engine events to any number of subscribers.
#[derive(Clone, Debug)]
pub struct EventBus {
    event_tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new(buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(buffer.max(1));
        Self { event_tx }
    }

    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }
}

/// Bounded command queue feeding the runtime loop.
pub fn command_channel(buffer: usize) -> (mpsc::Sender<SyncCommand>, mpsc::Receiver<SyncCommand>) {
    mpsc::channel(buffer.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RealtimeState;

    #[tokio::test]
    async fn sends_commands_to_receiver() {
        let (tx, mut rx) = command_channel(8);
        tx.send(SyncCommand::SelectThread { thread_id: 7 })
            .await
            .expect("command send should work");

        let cmd = rx.recv().await.expect("receiver should have a command");
        assert_eq!(cmd, SyncCommand::SelectThread { thread_id: 7 });
    }

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.emit(SyncEvent::RealtimeChanged {
            state: RealtimeState::Connected,
        });

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        EventBus::new(0).emit(SyncEvent::SignInRequired);
    }
}
