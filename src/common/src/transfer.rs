//! 文件传输结果模型

use serde::{Deserialize, Serialize};

use crate::execution::Timing;
use crate::host::HostId;

/// 单文件上传的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferOutcome {
    /// 上传成功
    Uploaded,
    /// 目标已存在且不允许覆盖（未做任何修改）
    AlreadyExists,
    /// 某个步骤失败（之前步骤的结果不回滚）
    StepFailed,
    /// 无法建立会话
    ConnectionFailed,
}

/// 上传流程中的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStep {
    ExistenceCheck,
    CreateDirectory,
    WriteContent,
    SetPermissions,
}

impl TransferStep {
    pub fn describe(&self) -> &'static str {
        match self {
            TransferStep::ExistenceCheck => "existence check failed",
            TransferStep::CreateDirectory => "create directory failed",
            TransferStep::WriteContent => "write content failed",
            TransferStep::SetPermissions => "set permissions failed",
        }
    }
}

/// 单文件上传结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub host_id: HostId,
    pub remote_path: String,
    /// 写入的字节数
    pub size: u64,
    /// 实际应用的权限位
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    pub outcome: TransferOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<TransferStep>,
    pub message: String,
    #[serde(flatten)]
    pub timing: Timing,
}

impl TransferResult {
    pub fn is_uploaded(&self) -> bool {
        self.outcome == TransferOutcome::Uploaded
    }

    /// 上传成功或目标已存在都不算错误
    pub fn is_error(&self) -> bool {
        matches!(
            self.outcome,
            TransferOutcome::StepFailed | TransferOutcome::ConnectionFailed
        )
    }
}

/// 目录上传中的一个条目（调用方已展平）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// 相对于远程根目录的路径
    pub path: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub permissions: Option<String>,
    #[serde(default)]
    pub is_dir: bool,
}

impl DirectoryEntry {
    pub fn file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            permissions: None,
            is_dir: false,
        }
    }

    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_dir: true,
            ..Default::default()
        }
    }

    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = Some(permissions.into());
        self
    }
}

/// 单个条目的失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferError {
    pub path: String,
    pub error: String,
}

/// 目录上传的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryOutcome {
    Completed,
    CompletedWithFailures,
    ConnectionFailed,
}

/// 目录上传结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryTransferResult {
    pub host_id: HostId,
    pub remote_path: String,
    pub total_files: usize,
    pub success_files: usize,
    /// 按条目顺序记录的失败
    pub failed_files: Vec<TransferError>,
    pub outcome: DirectoryOutcome,
    pub message: String,
    #[serde(flatten)]
    pub timing: Timing,
}
