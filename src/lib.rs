//! 远程执行层
//! 通过 SSH 在受管主机上执行命令、上传文件、检查状态和操作 Docker

pub mod config;
pub mod docker;
pub mod error;
pub mod health;
pub mod registry;
pub mod remote;
pub mod shell;
pub mod ssh;
pub mod telemetry;
pub mod transfer;

pub use error::{AppError, Result};
pub use remote::RemoteOps;
