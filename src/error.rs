//! 统一错误模型
//! 定义远程执行层的错误类型
//!
//! 命令失败与部分传输失败属于结果数据，不在这里建模

use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 应用错误类型
#[derive(Debug, Clone, Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SSH connection error: {0}")]
    SshConnectionError(String),

    #[error("SSH authentication failed: {0}")]
    SshAuthenticationError(String),

    #[error("SSH execution error: {0}")]
    SshExecutionError(String),

    #[error("Persist error: {0}")]
    Persist(String),
}

impl AppError {
    /// 是否属于建立会话阶段的失败（不可达、认证被拒、握手超时）
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AppError::SshConnectionError(_) | AppError::SshAuthenticationError(_)
        )
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            AppError::NotFound(msg) => format!("Resource not found: {}", msg),
            AppError::Validation(msg) => msg.clone(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::SshConnectionError(_) => "Host unreachable".to_string(),
            AppError::SshAuthenticationError(_) => "SSH authentication failed".to_string(),
            AppError::SshExecutionError(_) => "SSH command execution failed".to_string(),
            AppError::Persist(_) => "Failed to save host status".to_string(),
        }
    }

    // 便捷方法
    pub fn not_found(msg: &str) -> Self {
        AppError::NotFound(msg.to_string())
    }

    pub fn validation(msg: &str) -> Self {
        AppError::Validation(msg.to_string())
    }

    pub fn persist(msg: &str) -> Self {
        AppError::Persist(msg.to_string())
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_grouping() {
        assert!(AppError::SshConnectionError("refused".to_string()).is_connection_error());
        assert!(AppError::SshAuthenticationError("denied".to_string()).is_connection_error());
        assert!(!AppError::SshExecutionError("eof".to_string()).is_connection_error());
        assert!(!AppError::not_found("host 3").is_connection_error());
    }

    #[test]
    fn test_user_message_no_sensitive_info() {
        let error = AppError::SshAuthenticationError("password 'hunter2' rejected".to_string());
        let message = error.user_message();
        assert_eq!(message, "SSH authentication failed");
        assert!(!message.contains("hunter2"));
    }

    #[test]
    fn test_unreachable_and_command_failure_stay_distinct() {
        let unreachable = AppError::SshConnectionError("timeout".to_string()).user_message();
        let failed = AppError::SshExecutionError("exit 1".to_string()).user_message();
        assert_ne!(unreachable, failed);
    }

    #[test]
    fn test_from_config_error() {
        let error: AppError = config::ConfigError::Message("bad".to_string()).into();
        assert!(matches!(error, AppError::Config(_)));
    }
}
