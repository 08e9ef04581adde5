use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    channel::{EventStream, SyncChannelError, command_channel},
    engine::SyncEngine,
    error::ChatError,
    transport::ChatTransport,
    types::{SyncCommand, ThreadId},
};

const COMMAND_BUFFER: usize = 128;

/// Command/event front door to a running [`SyncEngine`].
pub struct SyncHandle<T> {
    command_tx: mpsc::Sender<SyncCommand>,
    engine: SyncEngine<T>,
}

impl<T> Clone for SyncHandle<T> {
    fn clone(&self) -> Self {
        Self {
            command_tx: self.command_tx.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<T: ChatTransport> SyncHandle<T> {
    /// Send one command to the runtime.
    pub async fn send(&self, command: SyncCommand) -> Result<(), SyncChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| SyncChannelError::CommandChannelClosed)
    }

    /// Subscribe to emitted engine events.
    pub fn subscribe(&self) -> EventStream {
        self.engine.subscribe()
    }

    pub fn engine(&self) -> &SyncEngine<T> {
        &self.engine
    }
}

/// Start `engine` and drive it from a command queue.
///
/// Selection and the pending row of a send take effect in command order;
/// the network work behind them runs on its own task so a slow fetch never
/// blocks a thread switch. Failures are broadcast as `SyncEvent::Error`.
pub fn spawn_runtime<T: ChatTransport>(engine: SyncEngine<T>) -> Result<SyncHandle<T>, ChatError> {
    engine.start()?;
    let (command_tx, command_rx) = command_channel(COMMAND_BUFFER);
    let runtime = SyncRuntime {
        engine: engine.clone(),
        command_rx,
    };
    tokio::spawn(async move {
        runtime.run().await;
    });

    Ok(SyncHandle { command_tx, engine })
}

struct SyncRuntime<T> {
    engine: SyncEngine<T>,
    command_rx: mpsc::Receiver<SyncCommand>,
}

impl<T: ChatTransport> SyncRuntime<T> {
    async fn run(mut self) {
        while let Some(command) = self.command_rx.recv().await {
            debug!(?command, "sync command");
            match command {
                SyncCommand::SetVisibility { visible } => self.engine.set_visibility(visible),
                SyncCommand::RecordScroll { distance_to_bottom } => {
                    self.engine.record_scroll(distance_to_bottom)
                }
                SyncCommand::Dispose => {
                    self.engine.dispose();
                    break;
                }
                SyncCommand::SelectThread { thread_id } => self.select(thread_id),
                SyncCommand::SendMessage { content } => self.send(&content),
                command => {
                    let engine = self.engine.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_command(&engine, command).await {
                            engine.report_error(&err);
                        }
                    });
                }
            }
        }
    }

    fn select(&self, thread_id: ThreadId) {
        match self.engine.switch_to(thread_id) {
            Ok(true) => {}
            Ok(false) => {
                let engine = self.engine.clone();
                tokio::spawn(async move {
                    if let Err(err) = engine.load_initial(thread_id).await {
                        engine.report_error(&err);
                    }
                });
            }
            Err(err) => self.engine.report_error(&err),
        }
    }

    /// Bind the message to the thread open when the command is dequeued.
    fn send(&self, content: &str) {
        let queued = self
            .engine
            .selected_thread()
            .ok_or_else(ChatError::no_thread_selected)
            .and_then(|thread_id| self.engine.queue_send(thread_id, content));
        let outgoing = match queued {
            Ok(outgoing) => outgoing,
            Err(err) => {
                self.engine.report_error(&err);
                return;
            }
        };
        let engine = self.engine.clone();
        tokio::spawn(async move {
            // Delivery failures are reported through SendAck.
            let _ = engine.deliver(outgoing).await;
        });
    }
}

async fn handle_command<T: ChatTransport>(
    engine: &SyncEngine<T>,
    command: SyncCommand,
) -> Result<(), ChatError> {
    match command {
        SyncCommand::RefreshThreads => engine.refresh_thread_list().await.map(|_| ()),
        SyncCommand::CreateThread { target_user_id } => {
            engine.create_thread(target_user_id).await.map(|_| ())
        }
        SyncCommand::OpenConversationWith { target_user_id } => engine
            .open_conversation_with(target_user_id)
            .await
            .map(|_| ()),
        SyncCommand::LoadOlder => engine.load_older().await.map(|_| ()),
        SyncCommand::Backfill => engine.backfill_if_no_scrollbar().await.map(|_| ()),
        SyncCommand::RefreshLatest => engine.refresh_latest().await.map(|_| ()),
        // Applied in order by the command loop.
        SyncCommand::SelectThread { .. }
        | SyncCommand::SendMessage { .. }
        | SyncCommand::SetVisibility { .. }
        | SyncCommand::RecordScroll { .. }
        | SyncCommand::Dispose => Ok(()),
    }
}
