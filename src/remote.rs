//! 远程执行层入口
//! 把命令执行、文件传输、健康检查与 Docker 编排组装在一起

use std::sync::Arc;

use crate::config::AppConfig;
use crate::docker::ContainerOrchestrator;
use crate::error::Result;
use crate::health::HealthMonitor;
use crate::registry::{HostRegistry, HostStatusStore};
use crate::ssh::{CommandExecutor, RusshSessionProvider, SessionProvider};
use crate::transfer::TransferEngine;

/// 远程操作集合，各组件之间不共享可变状态
#[derive(Clone)]
pub struct RemoteOps {
    pub executor: CommandExecutor,
    pub transfer: TransferEngine,
    pub health: HealthMonitor,
    pub docker: ContainerOrchestrator,
}

impl RemoteOps {
    pub fn new(
        registry: Arc<dyn HostRegistry>,
        store: Arc<dyn HostStatusStore>,
        provider: Arc<dyn SessionProvider>,
        config: &AppConfig,
    ) -> Self {
        let executor = CommandExecutor::new(registry, provider, config.timeouts.command_secs);

        Self {
            transfer: TransferEngine::new(executor.clone(), &config.timeouts),
            health: HealthMonitor::new(executor.clone(), store, &config.timeouts, &config.health),
            docker: ContainerOrchestrator::new(executor.clone(), config.timeouts.clone()),
            executor,
        }
    }

    /// 使用 russh 会话提供者
    pub async fn from_config(
        config: &AppConfig,
        registry: Arc<dyn HostRegistry>,
        store: Arc<dyn HostStatusStore>,
    ) -> Result<Self> {
        let provider = RusshSessionProvider::from_settings(&config.ssh).await?;
        Ok(Self::new(registry, store, Arc::new(provider), config))
    }
}
