//! 测试公共模块
//! 基于内存注册表和模拟会话提供者组装 RemoteOps

#![allow(dead_code)]

use common::{HostDescriptor, HostId};
use ops_remote::config::AppConfig;
use ops_remote::registry::InMemoryHostRegistry;
use ops_remote::ssh::mock::MockSessionProvider;
use ops_remote::RemoteOps;
use std::sync::Arc;

pub struct TestContext {
    pub ops: RemoteOps,
    pub provider: MockSessionProvider,
    pub registry: Arc<InMemoryHostRegistry>,
}

pub fn host(id: HostId, address: &str) -> HostDescriptor {
    HostDescriptor::with_password(id, address.to_string(), "deploy".to_string(), "s3cret".to_string())
}

/// 默认两台主机：1 = web01，2 = web02
pub fn create_context(provider: MockSessionProvider) -> TestContext {
    create_context_with_hosts(provider, vec![host(1, "web01"), host(2, "web02")])
}

pub fn create_context_with_hosts(
    provider: MockSessionProvider,
    hosts: Vec<HostDescriptor>,
) -> TestContext {
    let registry = Arc::new(InMemoryHostRegistry::with_hosts(hosts));
    let ops = RemoteOps::new(
        registry.clone(),
        registry.clone(),
        Arc::new(provider.clone()),
        &AppConfig::default(),
    );

    TestContext {
        ops,
        provider,
        registry,
    }
}
