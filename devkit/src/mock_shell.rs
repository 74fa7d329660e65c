/*!
Mock shell pour développement sans SSH

Implémente `RemoteExecutor` avec des réponses scriptées par host et par
commande. Enregistre tous les appels et permet de simuler des hosts injoignables
ou lents.
*/

use async_trait::async_trait;
use netkeep_kernel::{ConnectFailure, ExecError, Host, RemoteExecutor};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Output(String),
    Fail { exit_code: u32, stderr: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub host_id: String,
    pub command: String,
}

#[derive(Default)]
struct ShellState {
    exact: HashMap<(String, String), Reply>,
    prefixes: Vec<(String, String, Reply)>,
    down: HashMap<String, ConnectFailure>,
    delays: HashMap<String, Duration>,
    calls: Vec<MockCall>,
}

/// Scripted executor; clones share the same script and call log.
#[derive(Clone, Default)]
pub struct MockShell {
    state: Arc<Mutex<ShellState>>,
}

impl MockShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executor(&self) -> Arc<dyn RemoteExecutor> {
        Arc::new(self.clone())
    }

    /// Réponse exacte pour une commande sur un host
    pub fn reply(&self, host_id: &str, command: &str, output: &str) -> &Self {
        self.state
            .lock()
            .exact
            .insert((host_id.to_string(), command.to_string()), Reply::Output(output.to_string()));
        self
    }

    /// Échec (exit code non nul) pour une commande sur un host
    pub fn fail(&self, host_id: &str, command: &str, exit_code: u32, stderr: &str) -> &Self {
        self.state.lock().exact.insert(
            (host_id.to_string(), command.to_string()),
            Reply::Fail {
                exit_code,
                stderr: stderr.to_string(),
            },
        );
        self
    }

    /// Réponse pour toute commande commençant par `prefix`
    pub fn reply_prefix(&self, host_id: &str, prefix: &str, output: &str) -> &Self {
        self.state
            .lock()
            .prefixes
            .push((host_id.to_string(), prefix.to_string(), Reply::Output(output.to_string())));
        self
    }

    pub fn fail_prefix(&self, host_id: &str, prefix: &str, exit_code: u32) -> &Self {
        self.state.lock().prefixes.push((
            host_id.to_string(),
            prefix.to_string(),
            Reply::Fail {
                exit_code,
                stderr: String::new(),
            },
        ));
        self
    }

    /// Toute connexion vers ce host échoue
    pub fn host_down(&self, host_id: &str, reason: ConnectFailure) -> &Self {
        self.state.lock().down.insert(host_id.to_string(), reason);
        self
    }

    /// Chaque commande sur ce host attend `delay` avant de répondre
    pub fn slow_host(&self, host_id: &str, delay: Duration) -> &Self {
        self.state.lock().delays.insert(host_id.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn commands_for(&self, host_id: &str) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.host_id == host_id)
            .map(|c| c.command.clone())
            .collect()
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn lookup(&self, host: &Host, command: &str) -> Result<Option<Reply>, ConnectFailure> {
        let mut state = self.state.lock();
        state.calls.push(MockCall {
            host_id: host.id.clone(),
            command: command.to_string(),
        });
        if let Some(reason) = state.down.get(&host.id) {
            return Err(reason.clone());
        }
        if let Some(reply) = state.exact.get(&(host.id.clone(), command.to_string())) {
            return Ok(Some(reply.clone()));
        }
        Ok(state
            .prefixes
            .iter()
            .find(|(h, prefix, _)| *h == host.id && command.starts_with(prefix.as_str()))
            .map(|(_, _, reply)| reply.clone()))
    }
}

#[async_trait]
impl RemoteExecutor for MockShell {
    async fn execute(&self, host: &Host, command: &str) -> Result<String, ExecError> {
        let delay = self.state.lock().delays.get(&host.id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match self.lookup(host, command) {
            Err(reason) => Err(ExecError::Connection {
                host: host.address.clone(),
                reason,
            }),
            Ok(Some(Reply::Output(out))) => Ok(out.trim_end().to_string()),
            Ok(Some(Reply::Fail { exit_code, stderr })) => Err(ExecError::Command {
                command: command.to_string(),
                exit_code: Some(exit_code),
                stderr,
            }),
            Ok(None) => Err(ExecError::Command {
                command: command.to_string(),
                exit_code: Some(127),
                stderr: format!("sh: {}: command not found", command.split_whitespace().next().unwrap_or("")),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exact_before_prefix_and_unknown_is_127() {
        let shell = MockShell::new();
        shell
            .reply("pve1", "hostname", "pve1\n")
            .reply_prefix("pve1", "tmux ", "")
            .reply_prefix("pve1", "host", "wrong");
        let host = Host::new("pve1", "10.0.0.2");

        assert_eq!(shell.execute(&host, "hostname").await.unwrap(), "pve1");
        assert_eq!(shell.execute(&host, "tmux ls").await.unwrap(), "");
        let err = shell.execute(&host, "virsh list").await.unwrap_err();
        assert!(matches!(err, ExecError::Command { exit_code: Some(127), .. }));
        assert_eq!(shell.commands_for("pve1").len(), 3);
    }

    #[tokio::test]
    async fn test_host_down_is_connection_error() {
        let shell = MockShell::new();
        shell.host_down("nas", ConnectFailure::Refused);
        let err = shell.execute(&Host::new("nas", "10.0.0.3"), "uptime").await.unwrap_err();
        assert_eq!(err.connect_failure(), Some(&ConnectFailure::Refused));
    }
}
