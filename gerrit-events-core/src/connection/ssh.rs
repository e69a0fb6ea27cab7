//! System `ssh` client transport
//!
//! Drives the OpenSSH client found on `PATH`. A connect spawns a control
//! master (`ssh -M -N`) so that authentication happens once per session;
//! commands and exec channels are multiplexed over its control socket.
//!
//! A key passphrase is answered through `SSH_ASKPASS`: the master runs with
//! a private helper script that prints the passphrase from its environment.

use super::transport::{EventStream, Session, Transport};
use crate::config::ConnectionConfig;
use crate::error::TransportError;
use crate::types::KeyPassphrase;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, trace, warn};
use url::Url;

/// Server alive interval used when the configuration leaves it at zero
pub const DEFAULT_ALIVE_INTERVAL_SECS: u64 = 30;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MASTER_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Environment variable the askpass helper reads the passphrase from
pub const ASKPASS_SECRET_ENV: &str = "GERRIT_EVENTS_KEY_PASSPHRASE";

const ASKPASS_SCRIPT: &str = "#!/bin/sh\nprintf '%s\\n' \"$GERRIT_EVENTS_KEY_PASSPHRASE\"\n";

static SOCKET_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Askpass helper script, removed again on drop
#[derive(Debug)]
pub struct AskPass {
    path: PathBuf,
}

impl AskPass {
    /// Write the helper next to `control_path`, readable only by this user
    pub fn install(control_path: &Path) -> Result<Self, TransportError> {
        let path = control_path.with_extension("askpass");
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&path)
            .map_err(|e| TransportError::ClientUnavailable {
                reason: format!("Failed to create askpass helper {}: {}", path.display(), e),
            })?;
        let askpass = Self { path };
        file.write_all(ASKPASS_SCRIPT.as_bytes())
            .map_err(|e| TransportError::ClientUnavailable {
                reason: format!("Failed to write askpass helper: {}", e),
            })?;
        Ok(askpass)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make `cmd` answer passphrase prompts through the helper
    pub fn apply(&self, cmd: &mut Command, passphrase: &KeyPassphrase) {
        cmd.env("SSH_ASKPASS", &self.path)
            .env("SSH_ASKPASS_REQUIRE", "force")
            .env(ASKPASS_SECRET_ENV, passphrase.expose());
        if std::env::var_os("DISPLAY").is_none() {
            cmd.env("DISPLAY", ":0");
        }
    }
}

impl Drop for AskPass {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            trace!(path = %self.path.display(), "Askpass helper already gone: {}", e);
        }
    }
}

/// Proxy tunnelling supported through `ProxyCommand`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxySpec {
    Socks5 { host: String, port: u16 },
    Http { host: String, port: u16 },
}

impl ProxySpec {
    /// Parse `socks5://host:port` or `http://host:port`
    pub fn parse(proxy: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidProxy {
            proxy: proxy.to_string(),
        };

        let url = Url::parse(proxy).map_err(|_| invalid())?;
        let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
        let port = url.port_or_known_default().ok_or_else(invalid)?;

        match url.scheme() {
            "socks5" => Ok(Self::Socks5 {
                host: host.to_string(),
                port,
            }),
            "http" => Ok(Self::Http {
                host: host.to_string(),
                port,
            }),
            _ => Err(invalid()),
        }
    }

    /// `ProxyCommand` value handing the TCP stream to `nc`
    pub fn proxy_command(&self) -> String {
        match self {
            Self::Socks5 { host, port } => format!("nc -X 5 -x {}:{} %h %p", host, port),
            Self::Http { host, port } => format!("nc -X connect -x {}:{} %h %p", host, port),
        }
    }
}

/// Transport backed by the OpenSSH command line client
#[derive(Debug, Clone)]
pub struct SshCommandTransport {
    program: PathBuf,
}

impl SshCommandTransport {
    /// Locate `ssh` on `PATH`
    pub fn new() -> Result<Self, TransportError> {
        let program = which::which("ssh").map_err(|e| TransportError::ClientUnavailable {
            reason: e.to_string(),
        })?;
        debug!(program = %program.display(), "Using system ssh client");
        Ok(Self { program })
    }

    /// Use a specific client binary
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Options shared by the master and every multiplexed command
    pub fn session_args(
        config: &ConnectionConfig,
        control_path: &Path,
    ) -> Result<Vec<String>, TransportError> {
        let alive = if config.keepalive_interval_secs > 0 {
            config.keepalive_interval_secs
        } else {
            DEFAULT_ALIVE_INTERVAL_SECS
        };

        // BatchMode would also suppress the passphrase prompt
        let interaction = if config.passphrase.is_some() {
            "NumberOfPasswordPrompts=1"
        } else {
            "BatchMode=yes"
        };

        let mut args = vec![
            "-p".to_string(),
            config.port.to_string(),
            "-l".to_string(),
            config.username.clone(),
            "-o".to_string(),
            interaction.to_string(),
            "-o".to_string(),
            "PreferredAuthentications=publickey".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ServerAliveInterval={}", alive),
            "-o".to_string(),
            format!("ConnectTimeout={}", CONNECT_TIMEOUT.as_secs()),
            "-S".to_string(),
            control_path.display().to_string(),
        ];

        if let Some(key) = &config.private_key_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }

        if let Some(proxy) = config.proxy.as_deref().filter(|p| !p.is_empty()) {
            let spec = ProxySpec::parse(proxy)?;
            args.push("-o".to_string());
            args.push(format!("ProxyCommand={}", spec.proxy_command()));
        }

        Ok(args)
    }

    fn control_path(config: &ConnectionConfig) -> PathBuf {
        let n = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!(
            "gerrit-events-{}-{}-{}.sock",
            config.name,
            std::process::id(),
            n
        ))
    }

    fn classify_failure(config: &ConnectionConfig, stderr: &str) -> TransportError {
        if stderr.contains("Permission denied") || stderr.contains("Too many authentication failures") {
            TransportError::AuthenticationFailed {
                username: config.username.clone(),
            }
        } else {
            TransportError::ConnectFailed {
                host: config.host.clone(),
                port: config.port,
                reason: stderr.trim().to_string(),
            }
        }
    }
}

#[async_trait]
impl Transport for SshCommandTransport {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Session>, TransportError> {
        let control_path = Self::control_path(config);
        let args = Self::session_args(config, &control_path)?;

        // Only the master authenticates, so the helper lives until connect returns
        let askpass = match &config.passphrase {
            Some(_) => Some(AskPass::install(&control_path)?),
            None => None,
        };

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .arg("-M")
            .arg("-N")
            .arg(&config.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let (Some(askpass), Some(passphrase)) = (&askpass, &config.passphrase) {
            askpass.apply(&mut command, passphrase);
        }

        let mut master = command
            .spawn()
            .map_err(|e| TransportError::ConnectFailed {
                host: config.host.clone(),
                port: config.port,
                reason: format!("Failed to spawn ssh: {}", e),
            })?;

        debug!(host = %config.host, port = config.port, "Spawned ssh control master");

        let session = SshCommandSession {
            program: self.program.clone(),
            args,
            host: config.host.clone(),
            control_path,
            master: Mutex::new(None),
            channels: Mutex::new(Vec::new()),
        };

        let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
        loop {
            if let Ok(Some(status)) = master.try_wait() {
                let mut stderr = String::new();
                if let Some(mut pipe) = master.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                debug!(%status, "ssh control master exited during connect");
                return Err(Self::classify_failure(config, &stderr));
            }

            if session.master_ready().await {
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                let _ = master.kill().await;
                return Err(TransportError::ConnectFailed {
                    host: config.host.clone(),
                    port: config.port,
                    reason: "Timed out waiting for the control master".to_string(),
                });
            }
            tokio::time::sleep(MASTER_POLL_INTERVAL).await;
        }

        *session.master.lock() = Some(master);
        Ok(Box::new(session))
    }
}

/// Session multiplexed over an ssh control master
#[derive(Debug)]
pub struct SshCommandSession {
    program: PathBuf,
    args: Vec<String>,
    host: String,
    control_path: PathBuf,
    master: Mutex<Option<Child>>,
    channels: Mutex<Vec<Child>>,
}

impl SshCommandSession {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).stdin(Stdio::null());
        cmd
    }

    async fn master_ready(&self) -> bool {
        self.command()
            .arg("-O")
            .arg("check")
            .arg(&self.host)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Session for SshCommandSession {
    async fn execute(&mut self, command: &str) -> Result<String, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        trace!(command, "Executing remote command");
        let output = self
            .command()
            .arg(&self.host)
            .arg(command)
            .output()
            .await
            .map_err(|e| TransportError::CommandFailed {
                command: command.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(TransportError::CommandFailed {
                command: command.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn open_exec_channel(&mut self, command: &str) -> Result<EventStream, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut child = self
            .command()
            .arg(&self.host)
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::ChannelFailed {
                reason: e.to_string(),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| TransportError::ChannelFailed {
            reason: "Failed to capture stdout".to_string(),
        })?;
        let mut channels = self.channels.lock();
        channels.retain_mut(|channel| matches!(channel.try_wait(), Ok(None)));
        channels.push(child);
        Ok(Box::pin(stdout))
    }

    fn is_connected(&self) -> bool {
        self.master
            .lock()
            .as_mut()
            .map(|child| matches!(child.try_wait(), Ok(None)))
            .unwrap_or(false)
    }

    async fn disconnect(&mut self) {
        let channels: Vec<Child> = self.channels.lock().drain(..).collect();
        for mut channel in channels {
            if let Err(e) = channel.kill().await {
                trace!("Exec channel already gone: {}", e);
            }
        }

        let master = self.master.lock().take();
        if let Some(mut master) = master {
            let _ = self
                .command()
                .arg("-O")
                .arg("exit")
                .arg(&self.host)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if let Err(e) = master.kill().await {
                trace!("Control master already gone: {}", e);
            }
        }

        if self.control_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.control_path) {
                warn!(path = %self.control_path.display(), "Failed to remove control socket: {}", e);
            }
        }
        debug!(host = %self.host, "ssh session closed");
    }
}
