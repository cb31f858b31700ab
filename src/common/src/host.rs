//! 主机模型
//!
//! 远程执行层只读取主机描述，主机记录本身由外部注册表持有

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};

/// 主机标识
pub type HostId = u64;

/// 认证方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// 密码认证
    #[default]
    Password,
    /// 私钥认证（执行层不支持，会在建立会话时被拒绝）
    PublicKey,
}

impl std::str::FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "password" => Ok(Self::Password),
            "public_key" | "publickey" | "key" => Ok(Self::PublicKey),
            _ => Err(format!("Unknown auth mode: {}", s)),
        }
    }
}

/// 主机描述（由外部注册表解析得到，在一次操作内不可变）
#[derive(Debug, Clone, Deserialize)]
pub struct HostDescriptor {
    /// 主机标识
    pub id: HostId,

    /// 主机地址
    pub address: String,

    /// 端口
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// 用户名
    pub username: String,

    /// 凭据（使用 Secret 包装，防止日志泄露）
    pub credential: Secret<String>,

    /// 认证方式
    #[serde(default)]
    pub auth_mode: AuthMode,
}

fn default_ssh_port() -> u16 {
    22
}

impl HostDescriptor {
    /// 创建使用密码认证的主机描述
    pub fn with_password(id: HostId, address: String, username: String, password: String) -> Self {
        Self {
            id,
            address,
            port: default_ssh_port(),
            username,
            credential: Secret::new(password),
            auth_mode: AuthMode::Password,
        }
    }

    /// 设置端口
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 设置认证方式
    pub fn with_auth_mode(mut self, auth_mode: AuthMode) -> Self {
        self.auth_mode = auth_mode;
        self
    }

    /// 获取密码
    pub fn password(&self) -> &str {
        self.credential.expose_secret()
    }

    /// 获取目标地址字符串
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.address, self.port)
    }

    /// known_hosts 查找使用的键
    pub fn host_key_id(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

/// 主机状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Online,
    Offline,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Online => "online",
            HostStatus::Offline => "offline",
        }
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 写回持久层的主机状态更新
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatusUpdate {
    pub status: HostStatus,
    pub checked_at: DateTime<Utc>,
}

impl HostStatusUpdate {
    pub fn new(status: HostStatus) -> Self {
        Self {
            status,
            checked_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_descriptor_with_password() {
        let host = HostDescriptor::with_password(
            7,
            "10.0.0.7".to_string(),
            "root".to_string(),
            "secret".to_string(),
        );

        assert_eq!(host.port, 22);
        assert_eq!(host.auth_mode, AuthMode::Password);
        assert_eq!(host.password(), "secret");
        assert_eq!(host.target(), "root@10.0.0.7:22");
        assert_eq!(host.with_port(2222).host_key_id(), "10.0.0.7:2222");
    }

    #[test]
    fn test_host_descriptor_debug_hides_credential() {
        let host = HostDescriptor::with_password(
            1,
            "example.com".to_string(),
            "deploy".to_string(),
            "hunter2".to_string(),
        );

        let debug = format!("{:?}", host);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_host_descriptor_deserialization_defaults() {
        let json = r#"{"id":3,"address":"db01","username":"ops","credential":"pw"}"#;
        let host: HostDescriptor = serde_json::from_str(json).unwrap();

        assert_eq!(host.id, 3);
        assert_eq!(host.port, 22);
        assert_eq!(host.auth_mode, AuthMode::Password);
        assert_eq!(host.password(), "pw");
    }

    #[test]
    fn test_auth_mode_from_str() {
        assert_eq!("password".parse::<AuthMode>().unwrap(), AuthMode::Password);
        assert_eq!("KEY".parse::<AuthMode>().unwrap(), AuthMode::PublicKey);
        assert!("kerberos".parse::<AuthMode>().is_err());
    }

    #[test]
    fn test_host_status_serialization() {
        assert_eq!(serde_json::to_string(&HostStatus::Online).unwrap(), "\"online\"");
        assert_eq!(serde_json::to_string(&HostStatus::Offline).unwrap(), "\"offline\"");
        assert_eq!(HostStatus::Offline.to_string(), "offline");
    }
}
