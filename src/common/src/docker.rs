//! Docker 请求与结果模型
//!
//! 所有 Docker 操作都通过远程 shell 命令完成，结果字段从命令输出中解析；
//! 无法从输出中得到的字段保持为 None，不填充估算值

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::execution::Timing;
use crate::host::HostId;

/// Docker 信息汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerInfoResult {
    pub host_id: HostId,
    /// 命令是否成功
    pub available: bool,
    pub server_version: Option<String>,
    pub client_version: Option<String>,
    pub architecture: Option<String>,
    pub operating_system: Option<String>,
    pub ncpu: Option<u64>,
    pub mem_total: Option<u64>,
    pub images_count: Option<u64>,
    pub containers_count: Option<u64>,
    pub running_count: Option<u64>,
    #[serde(default)]
    pub images: Vec<ImageSummary>,
    #[serde(default)]
    pub containers: Vec<ContainerSummary>,
    pub message: String,
    #[serde(flatten)]
    pub timing: Timing,
}

/// `docker images` 中的一行
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: String,
    pub repository: String,
    pub tag: String,
    pub size: String,
}

/// `docker ps -a` 中的一行
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub names: String,
    pub image: String,
    pub state: String,
    pub status: String,
}

/// 镜像构建请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageBuildRequest {
    pub image_name: String,
    #[serde(default = "default_tag")]
    pub image_tag: String,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    #[serde(default = "default_context")]
    pub context_path: String,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    /// 超时（秒），<= 0 使用默认值
    #[serde(default)]
    pub timeout_secs: i64,
}

/// 镜像构建结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageBuildResult {
    pub host_id: HostId,
    pub image_name: String,
    pub image_tag: String,
    /// 从 `docker image inspect` 得到，不可用时为 None
    pub image_id: Option<String>,
    /// 镜像大小（字节），不可用时为 None
    pub size_bytes: Option<u64>,
    pub succeeded: bool,
    pub exit_code: i32,
    pub message: String,
    pub logs: Vec<String>,
    #[serde(flatten)]
    pub timing: Timing,
}

/// 卷挂载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    #[serde(default = "default_volume_mode")]
    pub mode: String,
}

/// 容器运行请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerRunRequest {
    pub image_name: String,
    #[serde(default = "default_tag")]
    pub image_tag: String,
    #[serde(default)]
    pub container_name: Option<String>,
    /// 容器端口 -> 主机端口
    #[serde(default)]
    pub port_bindings: BTreeMap<String, String>,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub detach: bool,
    /// 容器内执行的命令（原样追加）
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub timeout_secs: i64,
}

/// 容器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Running,
    Exited,
    Failed,
}

/// 容器运行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRunResult {
    pub host_id: HostId,
    /// 未能从输出中识别时为空
    pub container_id: String,
    pub container_name: String,
    pub image_name: String,
    pub image_tag: String,
    pub command: Option<String>,
    pub status: ContainerStatus,
    /// `docker wait` 返回的容器退出码，不可用时为 None
    pub exit_code: Option<i64>,
    pub message: String,
    pub logs: Vec<String>,
    pub port_bindings: BTreeMap<String, String>,
    #[serde(flatten)]
    pub timing: Timing,
}

fn default_tag() -> String {
    "latest".to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_context() -> String {
    ".".to_string()
}

fn default_volume_mode() -> String {
    "rw".to_string()
}

impl ImageBuildRequest {
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            image_tag: default_tag(),
            dockerfile: default_dockerfile(),
            context_path: default_context(),
            build_args: BTreeMap::new(),
            timeout_secs: 0,
        }
    }

    /// 完整镜像引用 name:tag
    pub fn image_ref(&self) -> String {
        image_ref(&self.image_name, &self.image_tag)
    }
}

impl ContainerRunRequest {
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            image_tag: default_tag(),
            ..Default::default()
        }
    }

    pub fn image_ref(&self) -> String {
        image_ref(&self.image_name, &self.image_tag)
    }
}

impl VolumeMount {
    pub fn new(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            mode: default_volume_mode(),
        }
    }

    /// `-v` 参数值 host:container:mode
    pub fn spec(&self) -> String {
        let mode = if self.mode.is_empty() {
            "rw"
        } else {
            self.mode.as_str()
        };
        format!("{}:{}:{}", self.host_path, self.container_path, mode)
    }
}

fn image_ref(name: &str, tag: &str) -> String {
    if tag.is_empty() {
        format!("{}:latest", name)
    } else {
        format!("{}:{}", name, tag)
    }
}
