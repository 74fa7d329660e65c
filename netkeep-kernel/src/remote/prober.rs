use super::RemoteExecutor;
use crate::error::ExecError;
use crate::models::Host;
use std::sync::Arc;
use tracing::debug;

/// Tries candidate commands in order and keeps the first non-empty output.
#[derive(Clone)]
pub struct Prober {
    executor: Arc<dyn RemoteExecutor>,
}

impl Prober {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self { executor }
    }

    /// Single command passthrough.
    pub async fn run(&self, host: &Host, command: &str) -> Result<String, ExecError> {
        self.executor.execute(host, command).await
    }

    /// First non-empty success, or `None` when every candidate failed or was empty.
    pub async fn probe(&self, host: &Host, candidates: &[&str]) -> Option<String> {
        match self.probe_strict(host, candidates).await {
            Ok(found) => found,
            Err(e) => {
                debug!("[{}] probe aborted: {}", host.id, e);
                None
            }
        }
    }

    /// Like `probe`, but a connection failure stops the search and is returned.
    pub async fn probe_strict(&self, host: &Host, candidates: &[&str]) -> Result<Option<String>, ExecError> {
        for command in candidates {
            match self.executor.execute(host, command).await {
                Ok(output) if !output.trim().is_empty() => return Ok(Some(output)),
                Ok(_) => debug!("[{}] `{}` returned nothing", host.id, command),
                Err(e) if e.is_connection() => return Err(e),
                Err(e) => debug!("[{}] `{}` failed: {}", host.id, command, e),
            }
        }
        Ok(None)
    }
}
