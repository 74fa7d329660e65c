//! Remote command execution over SSH
//!
//! - `RemoteExecutor`: one session, one command, typed failure
//! - `Prober`: ordered fallback across OS-specific command variants
//! - `TerminalSessions`: tmux-backed persistent sessions per host

mod prober;
mod ssh;
mod terminal;

pub use prober::Prober;
pub use ssh::SshExecutor;
pub use terminal::{TerminalCapture, TerminalSessions};

use crate::error::ExecError;
use crate::models::Host;
use async_trait::async_trait;

/// Runs exactly one command on a host and returns its trimmed stdout.
///
/// Implementations never retry; callers express fallbacks through `Prober`.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    async fn execute(&self, host: &Host, command: &str) -> Result<String, ExecError>;
}

#[async_trait]
impl<T: RemoteExecutor + ?Sized> RemoteExecutor for std::sync::Arc<T> {
    async fn execute(&self, host: &Host, command: &str) -> Result<String, ExecError> {
        (**self).execute(host, command).await
    }
}

/// Quote one argument for a POSIX shell.
pub fn quote(arg: &str) -> String {
    shell_words::quote(arg).into_owned()
}
