//! SSH executor built on russh
//!
//! Opens a fresh session per command: connect (bounded timeout),
//! authenticate, exec, collect output, disconnect.

use super::RemoteExecutor;
use crate::credentials::{CredentialStore, SshAuth};
use crate::error::{ConnectFailure, ExecError};
use crate::models::Host;
use async_trait::async_trait;
use russh::client;
use russh_keys::key::PublicKey;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

struct SshHandler;

#[async_trait]
impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        // TODO: verify against a known_hosts file once hosts carry a pinned fingerprint
        Ok(true)
    }
}

pub struct SshExecutor {
    credentials: Arc<dyn CredentialStore>,
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            credentials,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn connection_error(host: &Host, reason: ConnectFailure) -> ExecError {
        ExecError::Connection {
            host: host.address.clone(),
            reason,
        }
    }

    async fn connect(&self, host: &Host) -> Result<client::Handle<SshHandler>, ExecError> {
        let auth = self
            .credentials
            .resolve(host)
            .await
            .map_err(|e| Self::connection_error(host, ConnectFailure::Other(e.to_string())))?;

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.connect_timeout),
            ..Default::default()
        });

        let addr = (host.address.as_str(), host.port);
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Self::connection_error(host, ConnectFailure::Timeout))?
            .map_err(|e| Self::connection_error(host, classify_io(&e)))?;

        let mut session = tokio::time::timeout(
            self.connect_timeout,
            client::connect_stream(config, stream, SshHandler),
        )
        .await
        .map_err(|_| Self::connection_error(host, ConnectFailure::Timeout))?
        .map_err(|e| Self::connection_error(host, classify_russh(&e)))?;

        let authenticated = match auth {
            SshAuth::Password(password) => session
                .authenticate_password(&host.username, password)
                .await
                .map_err(|e| Self::connection_error(host, classify_russh(&e)))?,
            SshAuth::PrivateKey(path) => try_key(&mut session, &host.username, &path).await,
            SshAuth::KeyCandidates(paths) => {
                let mut ok = false;
                for path in &paths {
                    if try_key(&mut session, &host.username, path).await {
                        ok = true;
                        break;
                    }
                }
                ok
            }
        };

        if !authenticated {
            return Err(Self::connection_error(host, ConnectFailure::Authentication));
        }
        Ok(session)
    }
}

async fn try_key(session: &mut client::Handle<SshHandler>, user: &str, path: &Path) -> bool {
    let key = match russh_keys::load_secret_key(path, None) {
        Ok(key) => key,
        Err(e) => {
            warn!("Cannot load SSH key {}: {}", path.display(), e);
            return false;
        }
    };
    matches!(session.authenticate_publickey(user, Arc::new(key)).await, Ok(true))
}

fn classify_io(e: &std::io::Error) -> ConnectFailure {
    match e.kind() {
        ErrorKind::ConnectionRefused => ConnectFailure::Refused,
        ErrorKind::TimedOut => ConnectFailure::Timeout,
        ErrorKind::NotFound | ErrorKind::AddrNotAvailable => ConnectFailure::Unreachable,
        _ => match e.raw_os_error() {
            // ENETUNREACH / EHOSTUNREACH
            Some(101) | Some(113) => ConnectFailure::Unreachable,
            _ => ConnectFailure::Other(e.to_string()),
        },
    }
}

fn classify_russh(e: &russh::Error) -> ConnectFailure {
    match e {
        russh::Error::IO(io) => classify_io(io),
        russh::Error::ConnectionTimeout | russh::Error::InactivityTimeout => ConnectFailure::Timeout,
        russh::Error::NotAuthenticated | russh::Error::NoAuthMethod => ConnectFailure::Authentication,
        other => ConnectFailure::Other(other.to_string()),
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(&self, host: &Host, command: &str) -> Result<String, ExecError> {
        debug!("[{}] exec: {}", host.id, command);
        let session = self.connect(host).await?;

        let result = run_on_session(&session, command).await;

        if let Err(e) = session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("[{}] disconnect error: {}", host.id, e);
        }

        let (stdout, stderr, exit_status) =
            result.map_err(|e| Self::connection_error(host, classify_russh(&e)))?;

        match exit_status {
            Some(0) | None => Ok(stdout.trim_end().to_string()),
            code => Err(ExecError::Command {
                command: command.to_string(),
                exit_code: code,
                stderr: stderr.trim_end().to_string(),
            }),
        }
    }
}

async fn run_on_session(
    session: &client::Handle<SshHandler>,
    command: &str,
) -> Result<(String, String, Option<u32>), russh::Error> {
    let mut channel = session.channel_open_session().await?;
    channel.exec(true, command).await?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_status = None;

    loop {
        match channel.wait().await {
            Some(russh::ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
            Some(russh::ChannelMsg::ExtendedData { data, ext }) => {
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                }
            }
            Some(russh::ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
            Some(russh::ChannelMsg::Close) | None => break,
            _ => {}
        }
    }

    Ok((
        String::from_utf8_lossy(&stdout).to_string(),
        String::from_utf8_lossy(&stderr).to_string(),
        exit_status,
    ))
}
