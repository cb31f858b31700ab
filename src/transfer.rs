//! 文件传输
//!
//! 单文件与目录上传都由一系列 shell 命令完成：存在性检测、创建目录、
//! 写入内容、设置权限。每一步是独立的命令，后续步骤失败不会回滚前面的结果

use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::TimeoutConfig;
use crate::error::{AppError, Result};
use crate::shell;
use crate::ssh::executor::run_in_session;
use crate::ssh::session::RemoteSession;
use crate::ssh::CommandExecutor;
use common::{
    DirectoryEntry, DirectoryOutcome, DirectoryTransferResult, HostDescriptor, HostId, Timing,
    TransferError, TransferOutcome, TransferResult, TransferStep,
};

/// 单文件上传请求
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub remote_path: String,
    pub content: String,
    /// 为空时使用 0644
    pub permissions: Option<String>,
    pub overwrite: bool,
}

impl FileUpload {
    pub fn new(remote_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            content: content.into(),
            permissions: None,
            overwrite: false,
        }
    }

    pub fn with_permissions(mut self, permissions: impl Into<String>) -> Self {
        self.permissions = Some(permissions.into());
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    fn mode(&self) -> &str {
        match self.permissions.as_deref() {
            Some(mode) if !mode.trim().is_empty() => mode.trim(),
            _ => shell::DEFAULT_FILE_MODE,
        }
    }
}

/// 单个文件写入的结论（不含计时）
struct PutOutcome {
    outcome: TransferOutcome,
    failed_step: Option<TransferStep>,
    permissions: Option<String>,
    message: String,
}

impl PutOutcome {
    fn failed(step: TransferStep, reason: impl AsRef<str>) -> Self {
        Self {
            outcome: TransferOutcome::StepFailed,
            failed_step: Some(step),
            permissions: None,
            message: format!("{}: {}", step.describe(), reason.as_ref()),
        }
    }
}

/// 传输引擎
#[derive(Clone)]
pub struct TransferEngine {
    executor: CommandExecutor,
    upload_timeout_secs: u64,
    directory_timeout_secs: u64,
}

impl TransferEngine {
    pub fn new(executor: CommandExecutor, timeouts: &TimeoutConfig) -> Self {
        Self {
            executor,
            upload_timeout_secs: timeouts.upload_secs,
            directory_timeout_secs: timeouts.directory_upload_secs,
        }
    }

    /// 上传单个文件
    pub async fn upload(&self, host_id: HostId, request: &FileUpload) -> Result<TransferResult> {
        if request.remote_path.trim().is_empty() {
            return Err(AppError::validation("remote_path is required"));
        }
        let host = self.executor.registry().resolve_host(host_id).await?;
        Ok(self.upload_to(&host, request).await)
    }

    pub async fn upload_to(&self, host: &HostDescriptor, request: &FileUpload) -> TransferResult {
        let start_time = Utc::now();
        let limit = Duration::from_secs(self.upload_timeout_secs);

        let finish = |put: PutOutcome, size: u64| TransferResult {
            host_id: host.id,
            remote_path: request.remote_path.clone(),
            size,
            permissions: put.permissions,
            outcome: put.outcome,
            failed_step: put.failed_step,
            message: put.message,
            timing: Timing::since(start_time),
        };

        if !shell::validate_mode(request.mode()) {
            let put = PutOutcome::failed(
                TransferStep::SetPermissions,
                format!("invalid mode '{}'", request.mode()),
            );
            return finish(put, 0);
        }

        let mut session = match self.executor.provider().open(host, limit).await {
            Ok(session) => session,
            Err(e) => {
                warn!(host_id = host.id, error = %e, "Upload aborted: session provisioning failed");
                let put = PutOutcome {
                    outcome: TransferOutcome::ConnectionFailed,
                    failed_step: None,
                    permissions: None,
                    message: format!("SSH connection failed: {}", e),
                };
                return finish(put, 0);
            }
        };

        let put = put_file(session.as_mut(), host.id, &request.remote_path, request, limit).await;
        session.close().await;

        let size = if put.outcome == TransferOutcome::Uploaded {
            request.content.len() as u64
        } else {
            0
        };

        info!(
            host_id = host.id,
            remote_path = %request.remote_path,
            outcome = ?put.outcome,
            size = size,
            "File upload finished"
        );

        finish(put, size)
    }

    /// 上传已展平的目录条目，所有条目共用一个会话并按顺序执行
    pub async fn upload_directory(
        &self,
        host_id: HostId,
        remote_root: &str,
        entries: &[DirectoryEntry],
        overwrite: bool,
    ) -> Result<DirectoryTransferResult> {
        if remote_root.trim().is_empty() {
            return Err(AppError::validation("remote root is required"));
        }
        let host = self.executor.registry().resolve_host(host_id).await?;
        Ok(self
            .upload_directory_to(&host, remote_root, entries, overwrite)
            .await)
    }

    pub async fn upload_directory_to(
        &self,
        host: &HostDescriptor,
        remote_root: &str,
        entries: &[DirectoryEntry],
        overwrite: bool,
    ) -> DirectoryTransferResult {
        let start_time = Utc::now();
        let limit = Duration::from_secs(self.directory_timeout_secs);

        let mut session = match self.executor.provider().open(host, limit).await {
            Ok(session) => session,
            Err(e) => {
                warn!(host_id = host.id, error = %e, "Directory upload aborted: session provisioning failed");
                return DirectoryTransferResult {
                    host_id: host.id,
                    remote_path: remote_root.to_string(),
                    total_files: entries.len(),
                    success_files: 0,
                    failed_files: Vec::new(),
                    outcome: DirectoryOutcome::ConnectionFailed,
                    message: format!("SSH connection failed: {}", e),
                    timing: Timing::since(start_time),
                };
            }
        };

        let root = run_in_session(session.as_mut(), host.id, &shell::mkdir_p(remote_root), limit).await;
        if !root.is_success() {
            warn!(
                host_id = host.id,
                remote_root = %remote_root,
                reason = %root.failure_reason(),
                "Failed to create remote root, continuing with entries"
            );
        }

        let mut success_files = 0;
        let mut failed_files = Vec::new();

        for entry in entries {
            match upload_entry(session.as_mut(), host.id, remote_root, entry, overwrite, limit).await {
                Ok(()) => success_files += 1,
                Err(error) => {
                    warn!(host_id = host.id, path = %entry.path, error = %error, "Directory entry failed");
                    failed_files.push(TransferError {
                        path: entry.path.clone(),
                        error,
                    });
                }
            }
        }

        session.close().await;

        let (outcome, message) = if failed_files.is_empty() {
            (DirectoryOutcome::Completed, "directory upload completed".to_string())
        } else {
            (
                DirectoryOutcome::CompletedWithFailures,
                format!(
                    "directory upload completed: {} succeeded, {} failed",
                    success_files,
                    failed_files.len()
                ),
            )
        };

        info!(
            host_id = host.id,
            remote_root = %remote_root,
            total = entries.len(),
            succeeded = success_files,
            failed = failed_files.len(),
            "Directory upload finished"
        );

        DirectoryTransferResult {
            host_id: host.id,
            remote_path: remote_root.to_string(),
            total_files: entries.len(),
            success_files,
            failed_files,
            outcome,
            message,
            timing: Timing::since(start_time),
        }
    }
}

/// 处理一个目录条目，失败时返回错误描述
async fn upload_entry(
    session: &mut dyn RemoteSession,
    host_id: HostId,
    remote_root: &str,
    entry: &DirectoryEntry,
    overwrite: bool,
    limit: Duration,
) -> std::result::Result<(), String> {
    let full_path = shell::join_remote(remote_root, &entry.path)?;

    if entry.is_dir {
        let mkdir = run_in_session(session, host_id, &shell::mkdir_p(&full_path), limit).await;
        if mkdir.is_success() {
            return Ok(());
        }
        return Err(format!(
            "{}: {}",
            TransferStep::CreateDirectory.describe(),
            mkdir.failure_reason()
        ));
    }

    let request = FileUpload {
        remote_path: full_path.clone(),
        content: entry.content.clone(),
        permissions: entry.permissions.clone(),
        overwrite,
    };
    if !shell::validate_mode(request.mode()) {
        return Err(format!(
            "{}: invalid mode '{}'",
            TransferStep::SetPermissions.describe(),
            request.mode()
        ));
    }

    let put = put_file(session, host_id, &full_path, &request, limit).await;
    match put.outcome {
        TransferOutcome::Uploaded => Ok(()),
        _ => Err(put.message),
    }
}

/// 在给定会话中执行单文件上传的四个步骤；调用方已校验权限格式
async fn put_file(
    session: &mut dyn RemoteSession,
    host_id: HostId,
    remote_path: &str,
    request: &FileUpload,
    limit: Duration,
) -> PutOutcome {
    if !request.overwrite {
        let check = run_in_session(session, host_id, &shell::test_exists(remote_path), limit).await;
        if !check.is_success() {
            return PutOutcome::failed(TransferStep::ExistenceCheck, check.failure_reason());
        }
        match shell::parse_exists(&check.output) {
            Some(true) => {
                return PutOutcome {
                    outcome: TransferOutcome::AlreadyExists,
                    failed_step: None,
                    permissions: None,
                    message: "file already exists and overwrite is disabled".to_string(),
                }
            }
            Some(false) => {}
            None => {
                return PutOutcome::failed(
                    TransferStep::ExistenceCheck,
                    format!("unexpected output: {}", check.output_summary(128)),
                )
            }
        }
    }

    if let Some(parent) = shell::parent_dir(remote_path) {
        let mkdir = run_in_session(session, host_id, &shell::mkdir_p(parent), limit).await;
        if !mkdir.is_success() {
            return PutOutcome::failed(TransferStep::CreateDirectory, mkdir.failure_reason());
        }
    }

    let write = run_in_session(
        session,
        host_id,
        &shell::write_file(remote_path, &request.content),
        limit,
    )
    .await;
    if !write.is_success() {
        return PutOutcome::failed(TransferStep::WriteContent, write.failure_reason());
    }

    let mode = request.mode();
    let chmod = run_in_session(session, host_id, &shell::chmod(mode, remote_path), limit).await;
    if !chmod.is_success() {
        return PutOutcome::failed(TransferStep::SetPermissions, chmod.failure_reason());
    }

    PutOutcome {
        outcome: TransferOutcome::Uploaded,
        failed_step: None,
        permissions: Some(mode.to_string()),
        message: "file uploaded".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryHostRegistry;
    use crate::ssh::mock::MockSessionProvider;
    use crate::ssh::CommandOutcome;
    use std::sync::Arc;

    fn engine(provider: &MockSessionProvider) -> TransferEngine {
        let registry = InMemoryHostRegistry::with_hosts(vec![HostDescriptor::with_password(
            1,
            "web01".to_string(),
            "deploy".to_string(),
            "pw".to_string(),
        )]);
        let executor = CommandExecutor::new(Arc::new(registry), Arc::new(provider.clone()), 30);
        TransferEngine::new(executor, &TimeoutConfig::default())
    }

    #[test]
    fn test_file_upload_mode_defaults() {
        assert_eq!(FileUpload::new("/tmp/a", "").mode(), "0644");
        assert_eq!(FileUpload::new("/tmp/a", "").with_permissions(" ").mode(), "0644");
        assert_eq!(FileUpload::new("/tmp/a", "").with_permissions("0755").mode(), "0755");
    }

    #[tokio::test]
    async fn test_upload_runs_steps_in_order() {
        let provider = MockSessionProvider::with_filesystem();
        let engine = engine(&provider);

        let result = engine
            .upload(1, &FileUpload::new("/opt/app/app.conf", "k=v"))
            .await
            .unwrap();

        assert!(result.is_uploaded());
        assert_eq!(
            provider.commands(),
            vec![
                shell::test_exists("/opt/app/app.conf"),
                shell::mkdir_p("/opt/app"),
                shell::write_file("/opt/app/app.conf", "k=v"),
                shell::chmod("0644", "/opt/app/app.conf"),
            ]
        );
        assert_eq!(provider.closed(), 1);
        assert_eq!(provider.last_timeout(), Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_upload_overwrite_skips_existence_check() {
        let provider = MockSessionProvider::with_filesystem();
        provider.put_file("web01", "/x.txt", "old");
        let engine = engine(&provider);

        let result = engine
            .upload(1, &FileUpload::new("/x.txt", "new").overwrite(true))
            .await
            .unwrap();

        assert!(result.is_uploaded());
        assert_eq!(provider.file("web01", "/x.txt").as_deref(), Some("new"));
        assert!(!provider.commands().iter().any(|c| c.starts_with("test -e")));
        assert!(!provider.commands().iter().any(|c| c.starts_with("mkdir")));
    }

    #[tokio::test]
    async fn test_upload_write_failure_reports_step() {
        let provider = MockSessionProvider::with_filesystem();
        provider.respond("printf", CommandOutcome::completed("Permission denied\r\n", 1));
        let engine = engine(&provider);

        let result = engine
            .upload(1, &FileUpload::new("/etc/app/x.conf", "data"))
            .await
            .unwrap();

        assert_eq!(result.outcome, TransferOutcome::StepFailed);
        assert_eq!(result.failed_step, Some(TransferStep::WriteContent));
        assert!(result.message.starts_with("write content failed"));
        assert!(result.message.contains("Permission denied"));
        assert_eq!(result.size, 0);
        // 已创建的目录不回滚
        assert!(provider.has_dir("web01", "/etc/app"));
        assert!(!provider.commands().iter().any(|c| c.starts_with("chmod")));
    }

    #[tokio::test]
    async fn test_upload_invalid_mode_runs_nothing() {
        let provider = MockSessionProvider::with_filesystem();
        let engine = engine(&provider);

        let request = FileUpload::new("/tmp/x", "x").with_permissions("0644; reboot");
        let result = engine.upload(1, &request).await.unwrap();

        assert_eq!(result.failed_step, Some(TransferStep::SetPermissions));
        assert!(provider.commands().is_empty());
        assert_eq!(provider.opened(), 0);
    }

    #[tokio::test]
    async fn test_upload_unrecognized_existence_output() {
        let provider = MockSessionProvider::new();
        provider.respond("test -e", CommandOutcome::completed("weird\r\n", 0));
        let engine = engine(&provider);

        let result = engine.upload(1, &FileUpload::new("/tmp/x", "x")).await.unwrap();

        assert_eq!(result.failed_step, Some(TransferStep::ExistenceCheck));
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn test_directory_entry_escaping_root_is_rejected() {
        let provider = MockSessionProvider::with_filesystem();
        let engine = engine(&provider);
        let entries = vec![
            DirectoryEntry::file("../../etc/passwd", "x"),
            DirectoryEntry::file("ok.txt", "y"),
        ];

        let result = engine
            .upload_directory(1, "/srv/app", &entries, true)
            .await
            .unwrap();

        assert_eq!(result.success_files, 1);
        assert_eq!(result.failed_files.len(), 1);
        assert_eq!(result.failed_files[0].path, "../../etc/passwd");
        assert!(!provider.commands().iter().any(|c| c.contains("passwd")));
    }

    #[tokio::test]
    async fn test_directory_root_failure_does_not_abort() {
        let provider = MockSessionProvider::with_filesystem();
        provider.respond_once("mkdir -p '/srv/app'", CommandOutcome::transport_error("", "reset"));
        let engine = engine(&provider);

        let entries = vec![DirectoryEntry::file("a.txt", "a")];
        let result = engine
            .upload_directory(1, "/srv/app", &entries, false)
            .await
            .unwrap();

        assert_eq!(result.outcome, DirectoryOutcome::Completed);
        assert_eq!(result.success_files, 1);
        assert_eq!(provider.file("web01", "/srv/app/a.txt").as_deref(), Some("a"));
    }
}
