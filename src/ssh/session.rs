//! 会话提供者
//!
//! 每次操作独立建立一个经过认证的 SSH 连接，操作期间独占，结束时断开。
//! 同一会话上的命令按顺序在各自的通道中执行（`run` 需要 `&mut self`）

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::{ChannelMsg, Disconnect, Pty};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, error, warn};

use crate::config::SshConfig as SshSettings;
use crate::error::{AppError, Result};
use crate::ssh::host_key::{HostKeyHandler, HostKeyVerification, KnownHosts};
use common::{AuthMode, HostDescriptor, TIMEOUT_ERROR_PREFIX};

/// 一条命令在远程会话中的执行结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    /// 按到达顺序合并的 stdout 与 stderr
    pub output: Vec<u8>,
    /// 远程进程上报的退出状态
    pub exit_status: Option<u32>,
    /// 会话或传输错误（含超时）
    pub transport_error: Option<String>,
}

impl CommandOutcome {
    pub fn completed(output: impl Into<Vec<u8>>, exit_status: u32) -> Self {
        Self {
            output: output.into(),
            exit_status: Some(exit_status),
            transport_error: None,
        }
    }

    pub fn transport_error(output: impl Into<Vec<u8>>, error: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            exit_status: None,
            transport_error: Some(error.into()),
        }
    }

    pub fn timed_out(output: impl Into<Vec<u8>>, limit: Duration) -> Self {
        Self::transport_error(
            output,
            format!("{} {}s", TIMEOUT_ERROR_PREFIX, limit.as_secs()),
        )
    }
}

/// 建立远程 shell 会话
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// 建立连接并完成认证，失败时返回连接类错误；`limit` 限制整个建立过程
    async fn open(&self, host: &HostDescriptor, limit: Duration) -> Result<Box<dyn RemoteSession>>;
}

/// 已认证的远程 shell 会话
#[async_trait]
pub trait RemoteSession: Send {
    /// 执行一条命令；不会因远程非零退出而报错
    async fn run(&mut self, command: &str, limit: Duration) -> CommandOutcome;

    /// 释放会话及其底层连接
    async fn close(self: Box<Self>);
}

/// 基于 russh 的会话提供者
pub struct RusshSessionProvider {
    verification_mode: HostKeyVerification,
    known_hosts: Option<Arc<KnownHosts>>,
    request_pty: bool,
    pty_term: String,
}

impl RusshSessionProvider {
    pub fn new(verification_mode: HostKeyVerification, known_hosts: Option<KnownHosts>) -> Self {
        Self {
            verification_mode,
            known_hosts: known_hosts.map(Arc::new),
            request_pty: true,
            pty_term: "xterm".to_string(),
        }
    }

    /// 根据配置创建，配置了 known_hosts 文件时加载它
    pub async fn from_settings(settings: &SshSettings) -> Result<Self> {
        let verification_mode = settings
            .host_key_verification
            .parse::<HostKeyVerification>()
            .map_err(AppError::Config)?;

        let known_hosts = match settings.known_hosts_file {
            Some(ref path) => KnownHosts::load_file(path).await,
            None => None,
        };

        Ok(Self::new(verification_mode, known_hosts)
            .with_pty(settings.request_pty, settings.pty_term.clone()))
    }

    pub fn with_pty(mut self, request_pty: bool, term: String) -> Self {
        self.request_pty = request_pty;
        self.pty_term = term;
        self
    }

    async fn connect(&self, host: &HostDescriptor) -> Result<Handle<HostKeyHandler>> {
        let client_config = Arc::new(Config {
            preferred: russh::Preferred::default(),
            ..Default::default()
        });
        let handler = HostKeyHandler::new(
            self.verification_mode,
            self.known_hosts.clone(),
            host.address.clone(),
            host.port,
        );

        let mut handle = client::connect(client_config, (host.address.as_str(), host.port), handler)
            .await
            .map_err(|e| {
                error!(host = %host.address, port = host.port, error = %e, "SSH connection failed");
                match e {
                    russh::Error::UnknownKey => {
                        AppError::SshConnectionError(format!("host key rejected for {}", host.target()))
                    }
                    other => AppError::SshConnectionError(format!(
                        "failed to connect to {}:{}: {}",
                        host.address, host.port, other
                    )),
                }
            })?;

        let authenticated = match handle
            .authenticate_password(host.username.clone(), host.password())
            .await
        {
            Ok(authenticated) => authenticated,
            Err(e) => {
                disconnect(&handle).await;
                return Err(AppError::SshAuthenticationError(format!(
                    "authentication error for {}: {}",
                    host.target(),
                    e
                )));
            }
        };

        if !authenticated {
            disconnect(&handle).await;
            return Err(AppError::SshAuthenticationError(format!(
                "password rejected for {}",
                host.target()
            )));
        }

        Ok(handle)
    }
}

#[async_trait]
impl SessionProvider for RusshSessionProvider {
    async fn open(&self, host: &HostDescriptor, limit: Duration) -> Result<Box<dyn RemoteSession>> {
        if host.auth_mode != AuthMode::Password {
            return Err(AppError::SshAuthenticationError(format!(
                "unsupported auth mode for {}: only password login is supported",
                host.target()
            )));
        }

        debug!(host = %host.address, port = host.port, user = %host.username, "Opening SSH session");

        // 超时后未完成的连接随 future 一起被丢弃
        let handle = timeout(limit, self.connect(host)).await.map_err(|_| {
            warn!(host = %host.address, port = host.port, "SSH session provisioning timed out");
            AppError::SshConnectionError(format!(
                "timed out after {}s connecting to {}",
                limit.as_secs(),
                host.target()
            ))
        })??;

        Ok(Box::new(RusshSession {
            handle,
            request_pty: self.request_pty,
            pty_term: self.pty_term.clone(),
        }))
    }
}

async fn disconnect(handle: &Handle<HostKeyHandler>) {
    let _ = handle
        .disconnect(Disconnect::ByApplication, "", "")
        .await;
}

/// russh 会话：每条命令一个通道
pub struct RusshSession {
    handle: Handle<HostKeyHandler>,
    request_pty: bool,
    pty_term: String,
}

impl RusshSession {
    async fn run_until(&mut self, command: &str, deadline: Instant, limit: Duration) -> CommandOutcome {
        let mut channel = match timeout_at(deadline, self.handle.channel_open_session()).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                return CommandOutcome::transport_error(
                    Vec::new(),
                    format!("failed to open channel: {}", e),
                )
            }
            Err(_) => return CommandOutcome::timed_out(Vec::new(), limit),
        };

        if self.request_pty {
            let modes = [
                (Pty::ECHO, 0),
                (Pty::TTY_OP_ISPEED, 14400),
                (Pty::TTY_OP_OSPEED, 14400),
            ];
            let requested = channel
                .request_pty(true, &self.pty_term, 80, 40, 0, 0, &modes)
                .await;
            let accepted = match requested {
                Ok(()) => loop {
                    match timeout_at(deadline, channel.wait()).await {
                        Ok(Some(ChannelMsg::Success)) => break Ok(()),
                        Ok(Some(ChannelMsg::Failure)) => break Err("pty request rejected".to_string()),
                        Ok(Some(_)) => {}
                        Ok(None) => break Err("channel closed during pty request".to_string()),
                        Err(_) => break Err(format!("{} {}s", TIMEOUT_ERROR_PREFIX, limit.as_secs())),
                    }
                },
                Err(e) => Err(format!("pty request failed: {}", e)),
            };

            if let Err(e) = accepted {
                let _ = channel.close().await;
                return CommandOutcome::transport_error(Vec::new(), e);
            }
        }

        if let Err(e) = channel.exec(true, command).await {
            let _ = channel.close().await;
            return CommandOutcome::transport_error(Vec::new(), format!("failed to exec: {}", e));
        }

        let mut output = Vec::new();
        let mut exit_status = None;
        let mut eof = false;

        loop {
            match timeout_at(deadline, channel.wait()).await {
                Ok(Some(ChannelMsg::Data { ref data })) => output.extend_from_slice(data),
                Ok(Some(ChannelMsg::ExtendedData { ref data, .. })) => {
                    output.extend_from_slice(data)
                }
                Ok(Some(ChannelMsg::ExitStatus { exit_status: status })) => {
                    exit_status = Some(status);
                    if eof {
                        break;
                    }
                }
                Ok(Some(ChannelMsg::Eof)) => {
                    eof = true;
                    if exit_status.is_some() {
                        break;
                    }
                }
                Ok(Some(ChannelMsg::Failure)) => {
                    let _ = channel.close().await;
                    return CommandOutcome::transport_error(output, "exec request rejected");
                }
                Ok(Some(ChannelMsg::Close)) | Ok(None) => break,
                Ok(Some(_)) => {}
                Err(_) => {
                    warn!(command = %command, "Remote command timed out");
                    let _ = channel.close().await;
                    return CommandOutcome::timed_out(output, limit);
                }
            }
        }

        let _ = channel.close().await;

        CommandOutcome {
            output,
            exit_status,
            transport_error: None,
        }
    }
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn run(&mut self, command: &str, limit: Duration) -> CommandOutcome {
        let deadline = Instant::now() + limit;
        self.run_until(command, deadline, limit).await
    }

    async fn close(self: Box<Self>) {
        disconnect(&self.handle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_outcome_constructors() {
        let done = CommandOutcome::completed("ok", 0);
        assert_eq!(done.exit_status, Some(0));
        assert!(done.transport_error.is_none());

        let timed_out = CommandOutcome::timed_out(b"partial".to_vec(), Duration::from_secs(5));
        assert_eq!(timed_out.output, b"partial");
        assert_eq!(
            timed_out.transport_error.as_deref(),
            Some("command timed out after 5s")
        );
    }

    #[tokio::test]
    async fn test_public_key_hosts_are_rejected() {
        let provider = RusshSessionProvider::new(HostKeyVerification::Disabled, None);
        let host = HostDescriptor::with_password(
            1,
            "127.0.0.1".to_string(),
            "root".to_string(),
            String::new(),
        )
        .with_auth_mode(AuthMode::PublicKey);

        let result = provider.open(&host, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(AppError::SshAuthenticationError(_))));
    }

    #[tokio::test]
    async fn test_closed_port_is_connection_error() {
        // 先绑定再释放，得到一个当前没有监听者的端口
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let provider = RusshSessionProvider::new(HostKeyVerification::Disabled, None);
        let host = HostDescriptor::with_password(
            1,
            "127.0.0.1".to_string(),
            "root".to_string(),
            "pw".to_string(),
        )
        .with_port(port);

        let result = provider.open(&host, Duration::from_secs(2)).await;
        match result {
            Err(e) => assert!(e.is_connection_error()),
            Ok(_) => panic!("expected connection failure"),
        }
    }
}
