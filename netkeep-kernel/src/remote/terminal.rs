//! Persistent tmux sessions for interactive commands
//!
//! Each host gets at most one named session (create-if-absent, reuse,
//! explicit teardown). A command runs as: clear → send-keys → fixed settle
//! delay → capture-pane. The settle delay is not a completion signal:
//! long-running commands are captured mid-flight.

use super::{quote, RemoteExecutor};
use crate::error::{Error, ExecError};
use crate::models::{Host, HostId};
use crate::state::{new_state, Shared};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// Output of a timing-based capture.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalCapture {
    pub session: String,
    pub output: String,
    pub settled_after_ms: u128,
    /// Always true: the pane was captured after a fixed delay, not on command completion.
    pub best_effort: bool,
}

#[derive(Debug)]
struct SessionSlot {
    name: String,
    created: bool,
}

#[derive(Clone)]
pub struct TerminalSessions {
    executor: Arc<dyn RemoteExecutor>,
    sessions: Shared<HashMap<HostId, Arc<AsyncMutex<SessionSlot>>>>,
    settle: Duration,
}

impl TerminalSessions {
    pub fn new(executor: Arc<dyn RemoteExecutor>, settle: Duration) -> Self {
        Self {
            executor,
            sessions: new_state(HashMap::new()),
            settle,
        }
    }

    pub fn session_name(host_id: &str) -> String {
        let safe: String = host_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("netkeep-{safe}")
    }

    pub fn active_sessions(&self) -> Vec<HostId> {
        let mut ids: Vec<HostId> = self.sessions.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn slot(&self, host_id: &str) -> Arc<AsyncMutex<SessionSlot>> {
        self.sessions
            .lock()
            .entry(host_id.to_string())
            .or_insert_with(|| {
                Arc::new(AsyncMutex::new(SessionSlot {
                    name: Self::session_name(host_id),
                    created: false,
                }))
            })
            .clone()
    }

    async fn ensure_session(&self, host: &Host, slot: &mut SessionSlot) -> Result<(), Error> {
        if slot.created {
            return Ok(());
        }
        match self.executor.execute(host, "command -v tmux").await {
            Ok(path) if !path.trim().is_empty() => {}
            Ok(_) | Err(ExecError::Command { .. }) => {
                return Err(Error::ServiceUnavailable(format!("tmux is not installed on {}", host.id)));
            }
            Err(e) => return Err(e.into()),
        }

        let name = quote(&slot.name);
        if self.executor.execute(host, &format!("tmux has-session -t {name}")).await.is_err() {
            self.executor
                .execute(host, &format!("tmux new-session -d -s {name}"))
                .await?;
            info!("[{}] created terminal session {}", host.id, slot.name);
        }
        slot.created = true;
        Ok(())
    }

    /// Run a command in the host's session and capture the pane after the settle delay.
    pub async fn run(&self, host: &Host, command: &str) -> Result<TerminalCapture, Error> {
        let slot = self.slot(&host.id);
        // Un seul send/capture à la fois par host
        let mut slot = slot.lock().await;
        self.ensure_session(host, &mut slot).await?;

        let name = quote(&slot.name);
        self.executor
            .execute(host, &format!("tmux send-keys -t {name} clear Enter && tmux clear-history -t {name}"))
            .await?;
        self.executor
            .execute(host, &format!("tmux send-keys -t {name} {} Enter", quote(command)))
            .await?;

        let started = std::time::Instant::now();
        tokio::time::sleep(self.settle).await;
        let settled_after_ms = started.elapsed().as_millis();

        let output = self
            .executor
            .execute(host, &format!("tmux capture-pane -p -t {name}"))
            .await?;
        debug!("[{}] captured {} bytes after {}ms", host.id, output.len(), settled_after_ms);

        Ok(TerminalCapture {
            session: slot.name.clone(),
            output,
            settled_after_ms,
            best_effort: true,
        })
    }

    /// Kill the host's session and forget it. Returns false when none was open.
    pub async fn close(&self, host: &Host) -> Result<bool, Error> {
        let slot = self.sessions.lock().remove(&host.id);
        let Some(slot) = slot else {
            return Ok(false);
        };
        let slot = slot.lock().await;
        if slot.created {
            self.executor
                .execute(host, &format!("tmux kill-session -t {}", quote(&slot.name)))
                .await?;
            info!("[{}] closed terminal session {}", host.id, slot.name);
        }
        Ok(slot.created)
    }
}
