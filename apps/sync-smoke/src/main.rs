mod config;
mod logging;

use std::process::ExitCode;

use sync_core::{SyncCommand, SyncEngine, SyncEvent, spawn_runtime};
use sync_http::HttpTransport;
use sync_platform::InMemoryTokenStore;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::config::SmokeConfig;

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let auth = match config.token.as_deref() {
        Some(token) => InMemoryTokenStore::with_token(token),
        None => {
            warn!("SYNC_TOKEN is not set; requests will be rejected until sign-in");
            InMemoryTokenStore::default()
        }
    };
    let transport = match HttpTransport::new(&config.base_url, auth) {
        Ok(transport) => transport,
        Err(err) => {
            error!(code = %err.code, error = %err.message, "failed to build transport");
            return ExitCode::FAILURE;
        }
    };
    info!(base_url = %transport.base_url(), "starting sync smoke run");

    let engine = SyncEngine::new(transport, config.sync.clone());
    let mut events = engine.subscribe();
    let handle = match spawn_runtime(engine) {
        Ok(handle) => handle,
        Err(err) => {
            error!(code = %err.code, "failed to start sync runtime");
            return ExitCode::FAILURE;
        }
    };

    let mut opened = false;
    let mut pending_text = config.send_text.clone();
    let deadline = tokio::time::sleep(config.run_for);
    tokio::pin!(deadline);
    let run_forever = config.run_for.is_zero();

    let status = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break ExitCode::SUCCESS;
            }
            _ = &mut deadline, if !run_forever => {
                info!("run time elapsed");
                break ExitCode::SUCCESS;
            }
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event subscriber lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break ExitCode::SUCCESS,
                };

                let command = match &event {
                    SyncEvent::ThreadListUpdated { threads } => {
                        info!(count = threads.len(), "thread list updated");
                        next_open_command(&config, &mut opened)
                    }
                    SyncEvent::MessagesUpdated { thread_id, messages } => {
                        info!(thread_id, count = messages.len(), "messages updated");
                        pending_text
                            .take()
                            .map(|content| SyncCommand::SendMessage { content })
                    }
                    SyncEvent::SendAck(ack) => {
                        match &ack.error_text {
                            Some(text) => warn!(request_id = %ack.local_request_id, error = %text, "send failed"),
                            None => info!(request_id = %ack.local_request_id, message_id = ?ack.message_id, "send confirmed"),
                        }
                        None
                    }
                    SyncEvent::RealtimeChanged { state } => {
                        info!(?state, "realtime state changed");
                        None
                    }
                    SyncEvent::MessagesViewed { thread_id } => {
                        info!(thread_id, "thread marked viewed");
                        None
                    }
                    SyncEvent::SignInRequired => {
                        error!("server rejected the token; set SYNC_TOKEN and retry");
                        break ExitCode::FAILURE;
                    }
                    SyncEvent::Error { code, message, .. } => {
                        warn!(%code, %message, "background operation failed");
                        None
                    }
                };

                if let Some(command) = command
                    && let Err(err) = handle.send(command).await
                {
                    error!(error = %err, "runtime stopped accepting commands");
                    break ExitCode::FAILURE;
                }
            }
        }
    };

    let _ = handle.send(SyncCommand::Dispose).await;
    status
}

/// First list update opens the configured thread or conversation.
fn next_open_command(config: &SmokeConfig, opened: &mut bool) -> Option<SyncCommand> {
    if *opened {
        return None;
    }
    let command = match (config.open_thread, config.open_with_user) {
        (Some(thread_id), _) => SyncCommand::SelectThread { thread_id },
        (None, Some(target_user_id)) => SyncCommand::OpenConversationWith { target_user_id },
        (None, None) => return None,
    };
    *opened = true;
    Some(command)
}
