//! SSH执行器模块
//! 在临时会话中执行单条命令，并把结果规范化为 ExecutionResult
//!
//! 远程命令非零退出是正常结果而不是错误，只有主机解析失败才会返回 Err

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::TimeoutConfig;
use crate::error::Result;
use crate::registry::HostRegistry;
use crate::ssh::session::{CommandOutcome, RemoteSession, SessionProvider};
use common::execution::{EXIT_COMMAND_FAILURE, EXIT_SUCCESS};
use common::{ExecutionResult, HostDescriptor, HostId, Timing};

/// 命令执行器
#[derive(Clone)]
pub struct CommandExecutor {
    registry: Arc<dyn HostRegistry>,
    provider: Arc<dyn SessionProvider>,
    default_timeout_secs: u64,
}

impl CommandExecutor {
    pub fn new(
        registry: Arc<dyn HostRegistry>,
        provider: Arc<dyn SessionProvider>,
        default_timeout_secs: u64,
    ) -> Self {
        Self {
            registry,
            provider,
            default_timeout_secs,
        }
    }

    pub fn registry(&self) -> &Arc<dyn HostRegistry> {
        &self.registry
    }

    pub fn provider(&self) -> &Arc<dyn SessionProvider> {
        &self.provider
    }

    /// 解析主机后执行命令；timeout_secs <= 0 时使用默认超时
    pub async fn execute(
        &self,
        host_id: HostId,
        command: &str,
        timeout_secs: i64,
    ) -> Result<ExecutionResult> {
        let host = self.registry.resolve_host(host_id).await?;
        Ok(self.execute_on(&host, command, timeout_secs).await)
    }

    /// 对已解析的主机执行命令，会话在返回前释放
    pub async fn execute_on(
        &self,
        host: &HostDescriptor,
        command: &str,
        timeout_secs: i64,
    ) -> ExecutionResult {
        let limit = TimeoutConfig::normalize(timeout_secs, self.default_timeout_secs);
        let start_time = Utc::now();

        let mut session = match self.provider.open(host, limit).await {
            Ok(session) => session,
            Err(e) => {
                warn!(
                    host_id = host.id,
                    host = %host.address,
                    error = %e,
                    "Failed to provision session"
                );
                return ExecutionResult::connection_failed(
                    host.id,
                    command,
                    e.to_string(),
                    Timing::since(start_time),
                );
            }
        };

        let result = run_timed(session.as_mut(), host.id, command, limit, start_time).await;
        session.close().await;
        result
    }
}

/// 在已建立的会话中执行一条命令（目录上传等共享会话的场景）
pub async fn run_in_session(
    session: &mut dyn RemoteSession,
    host_id: HostId,
    command: &str,
    limit: Duration,
) -> ExecutionResult {
    run_timed(session, host_id, command, limit, Utc::now()).await
}

async fn run_timed(
    session: &mut dyn RemoteSession,
    host_id: HostId,
    command: &str,
    limit: Duration,
    start_time: chrono::DateTime<Utc>,
) -> ExecutionResult {
    debug!(host_id = host_id, command = %command, timeout_secs = limit.as_secs(), "Executing command");

    let outcome = session.run(command, limit).await;
    let result = into_result(host_id, command, outcome, Timing::since(start_time));

    info!(
        host_id = host_id,
        exit_code = result.exit_code,
        duration_ms = result.timing.duration_ms,
        output_len = result.output.len(),
        "Command completed"
    );

    result
}

/// 把会话层结果映射为 {0, 1} 两类退出码
pub fn into_result(
    host_id: HostId,
    command: &str,
    outcome: CommandOutcome,
    timing: Timing,
) -> ExecutionResult {
    let output = String::from_utf8_lossy(&outcome.output).into_owned();

    let (exit_code, error) = match (outcome.transport_error, outcome.exit_status) {
        (Some(error), _) => (EXIT_COMMAND_FAILURE, Some(error)),
        (None, Some(0)) => (EXIT_SUCCESS, None),
        (None, Some(status)) => (
            EXIT_COMMAND_FAILURE,
            Some(format!("Process exited with status {}", status)),
        ),
        (None, None) => (
            EXIT_COMMAND_FAILURE,
            Some("session ended without an exit status".to_string()),
        ),
    };

    ExecutionResult {
        host_id,
        command: command.to_string(),
        output,
        exit_code,
        remote_exit_status: outcome.exit_status,
        error,
        timing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::registry::InMemoryHostRegistry;
    use crate::ssh::mock::MockSessionProvider;

    fn host(id: HostId, address: &str) -> HostDescriptor {
        HostDescriptor::with_password(id, address.to_string(), "root".to_string(), "pw".to_string())
    }

    fn executor(provider: Arc<MockSessionProvider>) -> CommandExecutor {
        let registry = InMemoryHostRegistry::with_hosts(vec![host(1, "web01"), host(2, "down")]);
        CommandExecutor::new(Arc::new(registry), provider, 30)
    }

    #[test]
    fn test_into_result_exit_codes() {
        let timing = Timing::since(Utc::now());

        let ok = into_result(1, "true", CommandOutcome::completed("done\r\n", 0), timing);
        assert_eq!(ok.exit_code, 0);
        assert!(ok.error.is_none());
        assert_eq!(ok.trimmed_output(), "done");

        let failed = into_result(1, "false", CommandOutcome::completed("", 2), timing);
        assert_eq!(failed.exit_code, 1);
        assert_eq!(failed.remote_exit_status, Some(2));
        assert_eq!(failed.error.as_deref(), Some("Process exited with status 2"));

        let broken = into_result(1, "ls", CommandOutcome::transport_error("part", "reset"), timing);
        assert_eq!(broken.exit_code, 1);
        assert_eq!(broken.output, "part");
        assert_eq!(broken.error.as_deref(), Some("reset"));

        let silent = into_result(1, "ls", CommandOutcome::default(), timing);
        assert_eq!(silent.exit_code, 1);
        assert!(silent.error.is_some());
    }

    #[test]
    fn test_into_result_non_utf8_output() {
        let outcome = CommandOutcome::completed(vec![0x66, 0x6f, 0xff, 0x6f], 0);
        let result = into_result(1, "cat bin", outcome, Timing::since(Utc::now()));

        assert_eq!(result.output, "fo\u{fffd}o");
    }

    #[tokio::test]
    async fn test_execute_success_releases_session() {
        let provider = Arc::new(MockSessionProvider::new());
        provider.respond("uptime", CommandOutcome::completed("up 3 days\n", 0));
        let executor = executor(provider.clone());

        let result = executor.execute(1, "uptime", 0).await.unwrap();

        assert!(result.is_success());
        assert_eq!(result.trimmed_output(), "up 3 days");
        assert!(result.timing.is_consistent());
        assert_eq!(provider.opened(), 1);
        assert_eq!(provider.closed(), 1);
        assert_eq!(provider.last_timeout(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_execute_connection_failure_is_data() {
        let provider = Arc::new(MockSessionProvider::new());
        provider.unreachable("down");
        let executor = executor(provider.clone());

        let result = executor.execute(2, "uptime", 5).await.unwrap();

        assert!(result.is_connection_failure());
        assert!(!result.error.as_deref().unwrap_or_default().is_empty());
        assert!(provider.commands().is_empty());
        assert_eq!(provider.last_timeout(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_execute_unknown_host() {
        let executor = executor(Arc::new(MockSessionProvider::new()));

        let result = executor.execute(42, "uptime", 0).await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
