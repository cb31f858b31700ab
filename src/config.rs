//! 配置系统
//! 从环境变量加载所有配置

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty, plain
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshConfig {
    /// 主机密钥验证策略（strict/accept/disabled）
    #[serde(default = "default_host_key_verification")]
    pub host_key_verification: String,
    /// known_hosts 文件路径（可选）
    #[serde(default)]
    pub known_hosts_file: Option<String>,
    /// 执行命令前是否申请伪终端
    #[serde(default = "default_request_pty")]
    pub request_pty: bool,
    /// 伪终端类型
    #[serde(default = "default_pty_term")]
    pub pty_term: String,
}

/// 各类操作的默认超时（秒），调用方传入 <= 0 时使用
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    pub command_secs: u64,
    pub probe_secs: u64,
    pub test_connection_secs: u64,
    pub upload_secs: u64,
    pub directory_upload_secs: u64,
    pub docker_info_secs: u64,
    pub docker_inspect_secs: u64,
    pub docker_logs_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// 巡检时同时探测的主机数上限
    pub sweep_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub ssh: SshConfig,
    pub timeouts: TimeoutConfig,
    pub health: HealthConfig,
}

/// 默认主机密钥验证策略：accept（首次连接时接受新密钥）
fn default_host_key_verification() -> String {
    "accept".to_string()
}

fn default_request_pty() -> bool {
    true
}

fn default_pty_term() -> String {
    "xterm".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            ssh: SshConfig::default(),
            timeouts: TimeoutConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host_key_verification: default_host_key_verification(),
            known_hosts_file: None,
            request_pty: default_request_pty(),
            pty_term: default_pty_term(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_secs: 30,
            probe_secs: 5,
            test_connection_secs: 10,
            upload_secs: 30,
            directory_upload_secs: 60,
            docker_info_secs: 30,
            docker_inspect_secs: 10,
            docker_logs_secs: 10,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sweep_concurrency: 10,
        }
    }
}

impl TimeoutConfig {
    /// 将调用方给出的超时规范化：<= 0 时使用默认值
    pub fn normalize(requested_secs: i64, default_secs: u64) -> Duration {
        if requested_secs <= 0 {
            Duration::from_secs(default_secs)
        } else {
            Duration::from_secs(requested_secs as u64)
        }
    }
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeouts = TimeoutConfig::default();

        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // SSH 默认配置
            .set_default("ssh.host_key_verification", default_host_key_verification())?
            .set_default("ssh.request_pty", default_request_pty())?
            .set_default("ssh.pty_term", default_pty_term())?
            // 超时默认配置
            .set_default("timeouts.command_secs", timeouts.command_secs)?
            .set_default("timeouts.probe_secs", timeouts.probe_secs)?
            .set_default("timeouts.test_connection_secs", timeouts.test_connection_secs)?
            .set_default("timeouts.upload_secs", timeouts.upload_secs)?
            .set_default("timeouts.directory_upload_secs", timeouts.directory_upload_secs)?
            .set_default("timeouts.docker_info_secs", timeouts.docker_info_secs)?
            .set_default("timeouts.docker_inspect_secs", timeouts.docker_inspect_secs)?
            .set_default("timeouts.docker_logs_secs", timeouts.docker_logs_secs)?
            // 巡检默认配置
            .set_default("health.sweep_concurrency", 10)?;

        // 从环境变量加载配置（前缀为 OPS_）
        settings = settings.add_source(
            Environment::with_prefix("OPS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    fn validate(&self) -> Result<(), ConfigError> {
        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "plain" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty, plain",
                    self.logging.format
                )))
            }
        }

        // 验证主机密钥策略
        match self.ssh.host_key_verification.to_lowercase().as_str() {
            "strict" | "accept" | "disabled" | "none" | "false" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid host key verification mode: {}. Must be one of: strict, accept, disabled",
                    self.ssh.host_key_verification
                )))
            }
        }

        let t = &self.timeouts;
        let all_timeouts = [
            t.command_secs,
            t.probe_secs,
            t.test_connection_secs,
            t.upload_secs,
            t.directory_upload_secs,
            t.docker_info_secs,
            t.docker_inspect_secs,
            t.docker_logs_secs,
        ];
        if all_timeouts.iter().any(|secs| *secs == 0) {
            return Err(ConfigError::Message("timeouts must be greater than 0".to_string()));
        }

        if self.health.sweep_concurrency == 0 || self.health.sweep_concurrency > 256 {
            return Err(ConfigError::Message(
                "health.sweep_concurrency must be between 1 and 256".to_string(),
            ));
        }

        Ok(())
    }
}
