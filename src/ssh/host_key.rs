//! 主机密钥验证
//!
//! 指纹统一为公钥二进制数据的 SHA-256 十六进制串，known_hosts 文件与
//! 握手时收到的服务器公钥使用同一种计算方式

use async_trait::async_trait;
use base64::Engine as _;
use russh::client;
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// 主机密钥验证策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyVerification {
    /// 严格模式：只接受已知的主机密钥
    Strict,
    /// 接受模式：未知主机首次连接时接受，已知主机必须匹配
    #[default]
    Accept,
    /// 禁用验证（不安全，仅用于开发/测试）
    Disabled,
}

impl std::str::FromStr for HostKeyVerification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "accept" => Ok(Self::Accept),
            "disabled" | "none" | "false" => Ok(Self::Disabled),
            _ => Err(format!("Unknown host key verification mode: {}", s)),
        }
    }
}

/// 已知主机指纹表："host:port" 或 "host" -> 指纹
#[derive(Debug, Clone, Default)]
pub struct KnownHosts {
    fingerprints: HashMap<String, String>,
}

impl KnownHosts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, host: impl Into<String>, fingerprint: impl Into<String>) {
        self.fingerprints.insert(host.into(), fingerprint.into());
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// 解析 known_hosts 格式：`host[,host2] keytype base64`
    pub fn parse(content: &str) -> Self {
        let mut known_hosts = Self::new();

        for line in content.lines() {
            let line = line.trim();

            // 跳过空行和注释
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 3 {
                continue;
            }

            let fingerprint = match fingerprint_from_base64(parts[2]) {
                Ok(fingerprint) => fingerprint,
                Err(e) => {
                    warn!(error = %e, "Skipping invalid known_hosts entry");
                    continue;
                }
            };

            for pattern in parts[0].split(',') {
                known_hosts.insert(normalize_pattern(pattern), fingerprint.clone());
            }
        }

        known_hosts
    }

    /// 读取 known_hosts 文件
    pub async fn load_file(file_path: &str) -> Option<Self> {
        let content = match tokio::fs::read_to_string(file_path).await {
            Ok(content) => content,
            Err(e) => {
                error!(error = %e, file_path = %file_path, "Failed to read known_hosts file");
                return None;
            }
        };

        let known_hosts = Self::parse(&content);
        if known_hosts.is_empty() {
            warn!(file_path = %file_path, "No valid entries found in known_hosts file");
            return None;
        }

        info!(file_path = %file_path, entries = known_hosts.len(), "Loaded known_hosts");
        Some(known_hosts)
    }

    /// 按 "address:port" 查找，端口为 22 时也接受不带端口的条目
    pub fn lookup(&self, address: &str, port: u16) -> Option<&str> {
        let key = format!("{}:{}", address, port);
        self.fingerprints
            .get(&key)
            .or_else(|| {
                if port == 22 {
                    self.fingerprints.get(address)
                } else {
                    None
                }
            })
            .map(String::as_str)
    }
}

/// `[host]:port` 形式转成 `host:port`
fn normalize_pattern(pattern: &str) -> String {
    if let Some(rest) = pattern.strip_prefix('[') {
        if let Some((host, port)) = rest.split_once("]:") {
            return format!("{}:{}", host, port);
        }
    }
    pattern.to_string()
}

/// 计算 base64 公钥的 SHA-256 指纹
pub fn fingerprint_from_base64(public_key_base64: &str) -> Result<String, String> {
    let key_bytes = base64::engine::general_purpose::STANDARD
        .decode(public_key_base64)
        .map_err(|e| format!("Failed to decode public key: {}", e))?;

    let mut hasher = sha2::Sha256::new();
    hasher.update(&key_bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// 判断收到的指纹是否可接受
pub fn verify_fingerprint(
    mode: HostKeyVerification,
    known: Option<&str>,
    actual: &str,
) -> bool {
    match (mode, known) {
        (HostKeyVerification::Disabled, _) => true,
        (_, Some(expected)) => expected == actual,
        (HostKeyVerification::Accept, None) => true,
        (HostKeyVerification::Strict, None) => false,
    }
}

/// SSH 客户端会话处理器
pub struct HostKeyHandler {
    verification_mode: HostKeyVerification,
    known_hosts: Option<Arc<KnownHosts>>,
    address: String,
    port: u16,
}

impl HostKeyHandler {
    pub fn new(
        verification_mode: HostKeyVerification,
        known_hosts: Option<Arc<KnownHosts>>,
        address: String,
        port: u16,
    ) -> Self {
        Self {
            verification_mode,
            known_hosts,
            address,
            port,
        }
    }
}

#[async_trait]
impl client::Handler for HostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        if self.verification_mode == HostKeyVerification::Disabled {
            warn!(
                host = %self.address,
                port = self.port,
                "Host key verification DISABLED - accepting all keys"
            );
            return Ok(true);
        }

        let fingerprint = match fingerprint_from_base64(&server_public_key.public_key_base64()) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                error!(host = %self.address, error = %e, "Failed to fingerprint host key");
                return Ok(false);
            }
        };

        let known = self
            .known_hosts
            .as_ref()
            .and_then(|hosts| hosts.lookup(&self.address, self.port));
        let accepted = verify_fingerprint(self.verification_mode, known, &fingerprint);

        match (known, accepted) {
            (Some(_), true) => {
                debug!(host = %self.address, port = self.port, "Host key verified");
            }
            (Some(expected), false) => {
                error!(
                    host = %self.address,
                    port = self.port,
                    expected = %expected,
                    actual = %fingerprint,
                    "Host key mismatch - REJECTING CONNECTION"
                );
            }
            (None, true) => {
                info!(
                    host = %self.address,
                    port = self.port,
                    fingerprint = %fingerprint,
                    "First time connecting - accepting host key"
                );
            }
            (None, false) => {
                error!(
                    host = %self.address,
                    port = self.port,
                    "Unknown host in strict mode - rejecting connection"
                );
            }
        }

        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // "hello" 的 base64
    const KEY_B64: &str = "aGVsbG8=";
    const KEY_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_host_key_verification_from_str() {
        assert_eq!("strict".parse::<HostKeyVerification>().unwrap(), HostKeyVerification::Strict);
        assert_eq!("ACCEPT".parse::<HostKeyVerification>().unwrap(), HostKeyVerification::Accept);
        assert_eq!("none".parse::<HostKeyVerification>().unwrap(), HostKeyVerification::Disabled);
        assert!("sometimes".parse::<HostKeyVerification>().is_err());
    }

    #[test]
    fn test_fingerprint_from_base64() {
        assert_eq!(fingerprint_from_base64(KEY_B64).unwrap(), KEY_SHA256);
        assert!(fingerprint_from_base64("%%%").is_err());
    }

    #[test]
    fn test_known_hosts_parse() {
        let content = format!(
            "# comment\n\nweb01,10.0.0.1 ssh-ed25519 {key}\n[db01]:2222 ssh-rsa {key}\nbroken-line\n",
            key = KEY_B64
        );
        let known_hosts = KnownHosts::parse(&content);

        assert_eq!(known_hosts.len(), 3);
        assert_eq!(known_hosts.lookup("web01", 22), Some(KEY_SHA256));
        assert_eq!(known_hosts.lookup("10.0.0.1", 22), Some(KEY_SHA256));
        assert_eq!(known_hosts.lookup("db01", 2222), Some(KEY_SHA256));
        assert_eq!(known_hosts.lookup("db01", 22), None);
        assert_eq!(known_hosts.lookup("web01", 2200), None);
    }

    #[test]
    fn test_verify_fingerprint() {
        use HostKeyVerification::*;

        assert!(verify_fingerprint(Disabled, Some("a"), "b"));
        assert!(verify_fingerprint(Accept, None, "b"));
        assert!(!verify_fingerprint(Accept, Some("a"), "b"));
        assert!(verify_fingerprint(Strict, Some("b"), "b"));
        assert!(!verify_fingerprint(Strict, None, "b"));
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        assert!(KnownHosts::load_file("/nonexistent/known_hosts").await.is_none());
    }
}
