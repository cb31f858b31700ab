//! Common types shared between the remote execution layer and its callers

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// 导出所有模块
pub mod docker;
pub mod execution;
pub mod host;
pub mod transfer;

// 重新导出常用的类型
pub use docker::{
    ContainerRunRequest, ContainerRunResult, ContainerStatus, ContainerSummary, DockerInfoResult,
    ImageBuildRequest, ImageBuildResult, ImageSummary, VolumeMount,
};
pub use execution::{ExecutionResult, Timing, TIMEOUT_ERROR_PREFIX};
pub use host::{AuthMode, HostDescriptor, HostId, HostStatus, HostStatusUpdate};
pub use transfer::{
    DirectoryEntry, DirectoryOutcome, DirectoryTransferResult, TransferError, TransferOutcome,
    TransferResult, TransferStep,
};
