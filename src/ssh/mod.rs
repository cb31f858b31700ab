//! SSH 模块
//! 会话建立、主机密钥验证与命令执行

pub mod executor;
pub mod host_key;
pub mod mock;
pub mod session;

pub use executor::{run_in_session, CommandExecutor};
pub use host_key::{HostKeyVerification, KnownHosts};
pub use session::{CommandOutcome, RemoteSession, RusshSessionProvider, SessionProvider};
