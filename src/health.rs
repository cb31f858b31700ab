//! 主机健康检查
//!
//! 单机探测把任何连接或命令失败都映射为 offline；批量巡检对每台主机都写回状态，
//! 单台主机写回失败只记入报告

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{HealthConfig, TimeoutConfig};
use crate::error::{AppError, Result};
use crate::registry::HostStatusStore;
use crate::ssh::CommandExecutor;
use common::{HostDescriptor, HostId, HostStatus, HostStatusUpdate};

const PROBE_COMMAND: &str = "echo status_check";
const CONNECTION_TEST_COMMAND: &str = "echo connection_test";

/// 巡检中单台主机的结果
#[derive(Debug, Clone, Serialize)]
pub struct SweepEntry {
    pub host_id: HostId,
    pub status: HostStatus,
    /// 状态是否写回成功
    pub persisted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 巡检报告（顺序与输入一致）
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub entries: Vec<SweepEntry>,
    pub online: usize,
    pub offline: usize,
    pub persist_failed: usize,
}

impl SweepReport {
    pub fn status_of(&self, host_id: HostId) -> Option<HostStatus> {
        self.entries
            .iter()
            .find(|entry| entry.host_id == host_id)
            .map(|entry| entry.status)
    }

    fn push(&mut self, entry: SweepEntry) {
        match entry.status {
            HostStatus::Online => self.online += 1,
            HostStatus::Offline => self.offline += 1,
        }
        if !entry.persisted {
            self.persist_failed += 1;
        }
        self.entries.push(entry);
    }
}

/// 健康检查器
#[derive(Clone)]
pub struct HealthMonitor {
    executor: CommandExecutor,
    store: Arc<dyn HostStatusStore>,
    probe_timeout_secs: u64,
    test_connection_timeout_secs: u64,
    sweep_concurrency: usize,
}

impl HealthMonitor {
    pub fn new(
        executor: CommandExecutor,
        store: Arc<dyn HostStatusStore>,
        timeouts: &TimeoutConfig,
        health: &HealthConfig,
    ) -> Self {
        Self {
            executor,
            store,
            probe_timeout_secs: timeouts.probe_secs,
            test_connection_timeout_secs: timeouts.test_connection_secs,
            sweep_concurrency: health.sweep_concurrency.max(1),
        }
    }

    /// 探测单台主机，失败不返回错误
    pub async fn probe(&self, host: &HostDescriptor) -> HostStatus {
        let result = self
            .executor
            .execute_on(host, PROBE_COMMAND, self.probe_timeout_secs as i64)
            .await;

        if result.is_success() {
            HostStatus::Online
        } else {
            debug!(
                host_id = host.id,
                reason = %result.failure_reason(),
                "Host probe failed"
            );
            HostStatus::Offline
        }
    }

    /// 测试主机连接，返回具体的失败原因
    pub async fn test_connection(&self, host_id: HostId) -> Result<()> {
        let host = self.executor.registry().resolve_host(host_id).await?;
        let limit = Duration::from_secs(self.test_connection_timeout_secs);

        let mut session = self.executor.provider().open(&host, limit).await?;
        let result = crate::ssh::run_in_session(session.as_mut(), host.id, CONNECTION_TEST_COMMAND, limit).await;
        session.close().await;

        if result.is_success() {
            info!(host_id = host.id, "Connection test passed");
            Ok(())
        } else {
            Err(AppError::SshExecutionError(format!(
                "connection test failed: {}",
                result.failure_reason()
            )))
        }
    }

    /// 巡检一批主机，并发数受 sweep_concurrency 限制
    pub async fn sweep(&self, hosts: Vec<HostDescriptor>) -> SweepReport {
        let semaphore = Arc::new(Semaphore::new(self.sweep_concurrency));
        let mut handles = Vec::with_capacity(hosts.len());

        for host in hosts {
            let host_id = host.id;
            let monitor = self.clone();
            let semaphore = semaphore.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire().await.ok();
                monitor.check_and_persist(&host).await
            });

            handles.push((host_id, handle));
        }

        let mut report = SweepReport::default();
        for (host_id, handle) in handles {
            let entry = match handle.await {
                Ok(entry) => entry,
                Err(e) => {
                    error!(host_id = host_id, error = %e, "Sweep task failed");
                    SweepEntry {
                        host_id,
                        status: HostStatus::Offline,
                        persisted: false,
                        error: Some(format!("probe task failed: {}", e)),
                    }
                }
            };
            report.push(entry);
        }

        info!(
            total = report.entries.len(),
            online = report.online,
            offline = report.offline,
            persist_failed = report.persist_failed,
            "Host status sweep completed"
        );

        report
    }

    async fn check_and_persist(&self, host: &HostDescriptor) -> SweepEntry {
        let status = self.probe(host).await;

        match self
            .store
            .persist_host_status(host.id, HostStatusUpdate::new(status))
            .await
        {
            Ok(()) => SweepEntry {
                host_id: host.id,
                status,
                persisted: true,
                error: None,
            },
            Err(e) => {
                error!(host_id = host.id, status = %status, error = %e, "Failed to persist host status");
                SweepEntry {
                    host_id: host.id,
                    status,
                    persisted: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

/// TCP 连通性检查
pub async fn tcp_ping(address: &str, port: u16, limit: Duration) -> Result<()> {
    match timeout(limit, TcpStream::connect((address, port))).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => {
            warn!(host = %address, port = port, error = %e, "TCP ping failed");
            Err(AppError::SshConnectionError(format!(
                "{}:{} unreachable: {}",
                address, port, e
            )))
        }
        Err(_) => Err(AppError::SshConnectionError(format!(
            "{}:{} did not answer within {}s",
            address,
            port,
            limit.as_secs()
        ))),
    }
}
