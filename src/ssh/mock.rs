//! 测试用会话提供者
//!
//! 记录每条命令并回放预设结果，传输、健康检查和容器逻辑无需网络即可测试。
//! 使用 [`MockSessionProvider::with_filesystem`] 时，`shell` 模块拼装的命令
//! 会在内存中的文件树上解释执行

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::ssh::session::{CommandOutcome, RemoteSession, SessionProvider};
use common::HostDescriptor;

/// 模拟会话收到的一条命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub address: String,
    pub command: String,
}

#[derive(Default)]
struct MockState {
    unreachable: HashSet<String>,
    auth_rejected: HashSet<String>,
    rules: Vec<(String, CommandOutcome)>,
    queued: VecDeque<(String, CommandOutcome)>,
    calls: Vec<MockCall>,
    opened: usize,
    closed: usize,
    last_timeout: Option<Duration>,
    filesystem: Option<MockFilesystem>,
}

/// [`SessionProvider`] 的测试替身
#[derive(Clone, Default)]
pub struct MockSessionProvider {
    state: Arc<Mutex<MockState>>,
}

impl MockSessionProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟 `test -e`、`mkdir -p`、`printf > file` 与 `chmod` 的文件系统
    pub fn with_filesystem() -> Self {
        let mock = Self::new();
        mock.lock().filesystem = Some(MockFilesystem::default());
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // 某个测试线程 panic 后其余线程仍可读取状态
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 连接该地址时返回连接错误
    pub fn unreachable(&self, address: &str) {
        self.lock().unreachable.insert(address.to_string());
    }

    /// 连接该地址时返回认证错误
    pub fn reject_auth(&self, address: &str) {
        self.lock().auth_rejected.insert(address.to_string());
    }

    /// 包含 `pattern` 的命令返回 `outcome`，后添加的规则优先
    pub fn respond(&self, pattern: &str, outcome: CommandOutcome) {
        self.lock().rules.push((pattern.to_string(), outcome));
    }

    /// 下一条包含 `pattern` 的命令返回 `outcome`，优先于 `respond` 规则
    pub fn respond_once(&self, pattern: &str, outcome: CommandOutcome) {
        self.lock().queued.push_back((pattern.to_string(), outcome));
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.command.clone()).collect()
    }

    pub fn opened(&self) -> usize {
        self.lock().opened
    }

    pub fn closed(&self) -> usize {
        self.lock().closed
    }

    pub fn last_timeout(&self) -> Option<Duration> {
        self.lock().last_timeout
    }

    /// 模拟远程文件的内容
    pub fn file(&self, address: &str, path: &str) -> Option<String> {
        self.lock()
            .filesystem
            .as_ref()
            .and_then(|fs| fs.files.get(&key(address, path)).cloned())
    }

    /// 模拟远程文件的权限
    pub fn mode(&self, address: &str, path: &str) -> Option<String> {
        self.lock()
            .filesystem
            .as_ref()
            .and_then(|fs| fs.modes.get(&key(address, path)).cloned())
    }

    pub fn has_dir(&self, address: &str, path: &str) -> bool {
        self.lock()
            .filesystem
            .as_ref()
            .map(|fs| fs.dirs.contains(&key(address, path)))
            .unwrap_or(false)
    }

    /// 预置一个模拟远程文件
    pub fn put_file(&self, address: &str, path: &str, content: &str) {
        let mut state = self.lock();
        let fs = state.filesystem.get_or_insert_with(MockFilesystem::default);
        fs.files.insert(key(address, path), content.to_string());
    }
}

#[async_trait]
impl SessionProvider for MockSessionProvider {
    async fn open(&self, host: &HostDescriptor, limit: Duration) -> Result<Box<dyn RemoteSession>> {
        let mut state = self.lock();
        state.last_timeout = Some(limit);

        if state.unreachable.contains(&host.address) {
            return Err(AppError::SshConnectionError(format!(
                "failed to connect to {}:{}: connection refused",
                host.address, host.port
            )));
        }
        if state.auth_rejected.contains(&host.address) {
            return Err(AppError::SshAuthenticationError(format!(
                "password rejected for {}",
                host.target()
            )));
        }

        state.opened += 1;
        Ok(Box::new(MockSession {
            state: self.state.clone(),
            address: host.address.clone(),
        }))
    }
}

/// 由 [`MockSessionProvider`] 创建的会话
pub struct MockSession {
    state: Arc<Mutex<MockState>>,
    address: String,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn run(&mut self, command: &str, _limit: Duration) -> CommandOutcome {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.calls.push(MockCall {
            address: self.address.clone(),
            command: command.to_string(),
        });

        if let Some(pos) = state.queued.iter().position(|(p, _)| command.contains(p.as_str())) {
            if let Some((_, outcome)) = state.queued.remove(pos) {
                return outcome;
            }
        }

        if let Some((_, outcome)) = state
            .rules
            .iter()
            .rev()
            .find(|(p, _)| command.contains(p.as_str()))
        {
            return outcome.clone();
        }

        let address = self.address.clone();
        if let Some(fs) = state.filesystem.as_mut() {
            if let Some(outcome) = fs.apply(&address, command) {
                return outcome;
            }
        }

        CommandOutcome::completed(Vec::new(), 0)
    }

    async fn close(self: Box<Self>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.closed += 1;
    }
}

#[derive(Default)]
struct MockFilesystem {
    files: HashMap<String, String>,
    dirs: HashSet<String>,
    modes: HashMap<String, String>,
}

fn key(address: &str, path: &str) -> String {
    format!("{}:{}", address, path)
}

impl MockFilesystem {
    fn apply(&mut self, address: &str, command: &str) -> Option<CommandOutcome> {
        let words = split_words(command);
        let words: Vec<&str> = words.iter().map(String::as_str).collect();

        match words.as_slice() {
            ["test", "-e", path, "&&", "echo", yes, "||", "echo", no] => {
                let k = key(address, path);
                let found = self.files.contains_key(&k) || self.dirs.contains(&k);
                let marker = if found { *yes } else { *no };
                Some(CommandOutcome::completed(format!("{}\r\n", marker), 0))
            }
            ["mkdir", "-p", path] => {
                self.dirs.insert(key(address, path));
                Some(CommandOutcome::completed(Vec::new(), 0))
            }
            ["printf", "%s", content, ">", path] => {
                self.files.insert(key(address, path), content.to_string());
                Some(CommandOutcome::completed(Vec::new(), 0))
            }
            ["chmod", mode, path] => {
                let k = key(address, path);
                if self.files.contains_key(&k) || self.dirs.contains(&k) {
                    self.modes.insert(k, mode.to_string());
                    Some(CommandOutcome::completed(Vec::new(), 0))
                } else {
                    Some(CommandOutcome::completed(
                        format!("chmod: cannot access '{}': No such file or directory\r\n", path),
                        1,
                    ))
                }
            }
            _ => None,
        }
    }
}

/// 按 shell 规则拆分单词，处理单引号与反斜杠转义
fn split_words(command: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                in_word = true;
                for quoted in chars.by_ref() {
                    if quoted == '\'' {
                        break;
                    }
                    current.push(quoted);
                }
            }
            '\\' => {
                in_word = true;
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }

    words
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell;

    fn host(address: &str) -> HostDescriptor {
        HostDescriptor::with_password(1, address.to_string(), "root".to_string(), "pw".to_string())
    }

    #[test]
    fn splits_quoted_words() {
        let words = split_words(&shell::write_file("/tmp/a b", "it's\nfine"));
        assert_eq!(words, vec!["printf", "%s", "it's\nfine", ">", "/tmp/a b"]);
    }

    #[tokio::test]
    async fn queued_rules_take_priority() {
        let mock = MockSessionProvider::new();
        mock.respond("docker", CommandOutcome::completed("always", 0));
        mock.respond_once("docker ps", CommandOutcome::completed("once", 0));

        let mut session = mock.open(&host("h"), Duration::from_secs(1)).await.unwrap();
        assert_eq!(session.run("docker ps", Duration::from_secs(1)).await.output, b"once");
        assert_eq!(session.run("docker ps", Duration::from_secs(1)).await.output, b"always");
        session.close().await;

        assert_eq!(mock.commands().len(), 2);
        assert_eq!(mock.closed(), 1);
    }

    #[tokio::test]
    async fn emulates_file_commands() {
        let mock = MockSessionProvider::with_filesystem();
        let mut session = mock.open(&host("h"), Duration::from_secs(1)).await.unwrap();
        let limit = Duration::from_secs(1);

        let before = session.run(&shell::test_exists("/tmp/x"), limit).await;
        assert_eq!(shell::parse_exists(&String::from_utf8_lossy(&before.output)), Some(false));

        session.run(&shell::write_file("/tmp/x", "hi"), limit).await;
        let chmod = session.run(&shell::chmod("0600", "/tmp/x"), limit).await;
        assert_eq!(chmod.exit_status, Some(0));

        let after = session.run(&shell::test_exists("/tmp/x"), limit).await;
        assert_eq!(shell::parse_exists(&String::from_utf8_lossy(&after.output)), Some(true));
        assert_eq!(mock.file("h", "/tmp/x").as_deref(), Some("hi"));
        assert_eq!(mock.mode("h", "/tmp/x").as_deref(), Some("0600"));

        let missing = session.run(&shell::chmod("0600", "/nope"), limit).await;
        assert_eq!(missing.exit_status, Some(1));
    }

    #[tokio::test]
    async fn unreachable_and_rejected_hosts() {
        let mock = MockSessionProvider::new();
        mock.unreachable("down");
        mock.reject_auth("locked");

        let down = mock.open(&host("down"), Duration::from_secs(1)).await;
        assert!(matches!(down, Err(AppError::SshConnectionError(_))));

        let locked = mock.open(&host("locked"), Duration::from_secs(1)).await;
        assert!(matches!(locked, Err(AppError::SshAuthenticationError(_))));
        assert_eq!(mock.opened(), 0);
    }
}
