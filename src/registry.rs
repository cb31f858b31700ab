//! 外部协作者接口
//!
//! 主机记录的存储不属于执行层：执行层只通过 `HostRegistry` 解析主机描述，
//! 通过 `HostStatusStore` 写回巡检得到的状态

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::path::Path;

use crate::error::{AppError, Result};
use common::{HostDescriptor, HostId, HostStatusUpdate};

/// 主机注册表：hostID -> 主机描述
#[async_trait]
pub trait HostRegistry: Send + Sync {
    async fn resolve_host(&self, host_id: HostId) -> Result<HostDescriptor>;
}

/// 主机状态存储（只写，同一主机后写覆盖先写）
#[async_trait]
pub trait HostStatusStore: Send + Sync {
    async fn persist_host_status(&self, host_id: HostId, update: HostStatusUpdate) -> Result<()>;
}

/// 基于内存的主机注册表，同时充当状态存储
#[derive(Default)]
pub struct InMemoryHostRegistry {
    hosts: DashMap<HostId, HostDescriptor>,
    statuses: DashMap<HostId, HostStatusUpdate>,
}

/// 主机清单文件格式
#[derive(Debug, Deserialize)]
struct Inventory {
    hosts: Vec<HostDescriptor>,
}

impl InMemoryHostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hosts(hosts: impl IntoIterator<Item = HostDescriptor>) -> Self {
        let registry = Self::new();
        for host in hosts {
            registry.insert(host);
        }
        registry
    }

    /// 从 JSON 清单文件加载：`{"hosts": [{"id": 1, "address": ..., ...}]}`
    pub fn from_inventory_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read inventory {}: {}", path.display(), e))
        })?;
        let inventory: Inventory = serde_json::from_str(&content).map_err(|e| {
            AppError::Config(format!("Invalid inventory {}: {}", path.display(), e))
        })?;

        Ok(Self::with_hosts(inventory.hosts))
    }

    pub fn insert(&self, host: HostDescriptor) {
        self.hosts.insert(host.id, host);
    }

    /// 所有主机（按 id 排序）
    pub fn hosts(&self) -> Vec<HostDescriptor> {
        let mut hosts: Vec<HostDescriptor> =
            self.hosts.iter().map(|entry| entry.value().clone()).collect();
        hosts.sort_by_key(|host| host.id);
        hosts
    }

    /// 最近一次写回的状态
    pub fn status_of(&self, host_id: HostId) -> Option<HostStatusUpdate> {
        self.statuses.get(&host_id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl HostRegistry for InMemoryHostRegistry {
    async fn resolve_host(&self, host_id: HostId) -> Result<HostDescriptor> {
        self.hosts
            .get(&host_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::not_found(&format!("host {}", host_id)))
    }
}

#[async_trait]
impl HostStatusStore for InMemoryHostRegistry {
    async fn persist_host_status(&self, host_id: HostId, update: HostStatusUpdate) -> Result<()> {
        if !self.hosts.contains_key(&host_id) {
            return Err(AppError::persist(&format!("host {} is not registered", host_id)));
        }
        self.statuses.insert(host_id, update);
        Ok(())
    }
}
