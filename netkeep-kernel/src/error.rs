//! Error kinds surfaced by the engine
//!
//! Connection failures carry a typed reason so callers can branch on cause
//! (auth vs. refused vs. timeout) without inspecting message text.

/// Why an SSH session could not be established.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectFailure {
    #[error("authentication failed")]
    Authentication,
    #[error("connection refused")]
    Refused,
    #[error("connection timed out")]
    Timeout,
    #[error("host unreachable")]
    Unreachable,
    #[error("{0}")]
    Other(String),
}

/// Failure of a single remote execution.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("connection to {host} failed: {reason}")]
    Connection { host: String, reason: ConnectFailure },
    #[error("command `{command}` failed (exit {exit_code:?}): {stderr}")]
    Command {
        command: String,
        exit_code: Option<u32>,
        stderr: String,
    },
}

impl ExecError {
    pub fn is_connection(&self) -> bool {
        matches!(self, ExecError::Connection { .. })
    }

    pub fn connect_failure(&self) -> Option<&ConnectFailure> {
        match self {
            ExecError::Connection { reason, .. } => Some(reason),
            ExecError::Command { .. } => None,
        }
    }
}

/// Erreurs de persistance du registre de devices
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Device not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Operation-level errors returned by the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection failed: {0}")]
    ConnectionFailed(ExecError),
    #[error("command failed: {0}")]
    CommandFailed(ExecError),
    #[error("could not parse {what}: {detail}")]
    ParseFailed { what: String, detail: String },
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("invalid IP range: {0}")]
    InvalidRange(String),
    #[error("host {0} is still referenced by registry entries")]
    HostInUse(String),
    #[error("registry error: {0}")]
    Store(#[from] StoreError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<ExecError> for Error {
    fn from(e: ExecError) -> Self {
        if e.is_connection() {
            Error::ConnectionFailed(e)
        } else {
            Error::CommandFailed(e)
        }
    }
}

impl Error {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound { kind, id: id.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_error_routes_to_kind() {
        let conn = ExecError::Connection {
            host: "nas".into(),
            reason: ConnectFailure::Timeout,
        };
        assert!(matches!(Error::from(conn), Error::ConnectionFailed(_)));

        let cmd = ExecError::Command {
            command: "tmux ls".into(),
            exit_code: Some(127),
            stderr: "tmux: command not found".into(),
        };
        assert!(matches!(Error::from(cmd), Error::CommandFailed(_)));
    }

    #[test]
    fn test_connect_failure_message() {
        let e = ExecError::Connection {
            host: "10.0.0.2".into(),
            reason: ConnectFailure::Refused,
        };
        assert_eq!(e.to_string(), "connection to 10.0.0.2 failed: connection refused");
        assert_eq!(e.connect_failure(), Some(&ConnectFailure::Refused));
        assert_eq!(ConnectFailure::Other("kex failed".into()).to_string(), "kex failed");
        assert_eq!(ConnectFailure::Authentication.to_string(), "authentication failed");
    }
}
