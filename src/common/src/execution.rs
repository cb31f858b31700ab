//! 统一执行结果模型
//!
//! 定义远程命令执行的结果类型以及所有结果记录共用的计时字段

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::host::HostId;

/// 退出码：执行成功
pub const EXIT_SUCCESS: i32 = 0;
/// 退出码：命令失败（远程非零退出或会话/传输错误）
pub const EXIT_COMMAND_FAILURE: i32 = 1;
/// 退出码：连接失败（未能建立会话）
pub const EXIT_CONNECTION_FAILURE: i32 = -1;

/// 命令超时时错误信息的前缀，完整形式为 `command timed out after Ns`
pub const TIMEOUT_ERROR_PREFIX: &str = "command timed out after";

/// 计时字段 (start_time, end_time, duration_ms)
///
/// `duration_ms` 总是等于 `end_time - start_time` 的整毫秒数且非负
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
}

impl Timing {
    /// 从开始时间计时到当前时刻
    pub fn since(start_time: DateTime<Utc>) -> Self {
        Self::between(start_time, Utc::now())
    }

    /// 由两个时间点构造，时钟回拨时结束时间收敛到开始时间
    pub fn between(start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        let end_time = if end_time < start_time {
            start_time
        } else {
            end_time
        };

        Self {
            start_time,
            end_time,
            duration_ms: (end_time - start_time).num_milliseconds(),
        }
    }

    /// 检查三元组是否自洽
    pub fn is_consistent(&self) -> bool {
        self.duration_ms >= 0
            && self.duration_ms == (self.end_time - self.start_time).num_milliseconds()
    }
}

/// 执行结果 - 单条远程命令的执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// 主机标识
    pub host_id: HostId,

    /// 命令
    pub command: String,

    /// 合并后的标准输出与标准错误
    pub output: String,

    /// 退出码（0 成功，1 命令失败，-1 连接失败）
    pub exit_code: i32,

    /// 远程进程实际上报的退出状态
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_exit_status: Option<u32>,

    /// 错误信息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(flatten)]
    pub timing: Timing,
}

impl ExecutionResult {
    /// 创建连接失败结果
    pub fn connection_failed(
        host_id: HostId,
        command: impl Into<String>,
        error: impl Into<String>,
        timing: Timing,
    ) -> Self {
        Self {
            host_id,
            command: command.into(),
            output: String::new(),
            exit_code: EXIT_CONNECTION_FAILURE,
            remote_exit_status: None,
            error: Some(error.into()),
            timing,
        }
    }

    /// 判断是否成功
    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }

    /// 判断是否为连接失败
    pub fn is_connection_failure(&self) -> bool {
        self.exit_code == EXIT_CONNECTION_FAILURE
    }

    /// 判断是否为命令失败
    pub fn is_command_failure(&self) -> bool {
        self.exit_code == EXIT_COMMAND_FAILURE
    }

    /// 判断是否因超时而中止
    pub fn is_timeout(&self) -> bool {
        self.remote_exit_status.is_none()
            && self
                .error
                .as_deref()
                .is_some_and(|error| error.starts_with(TIMEOUT_ERROR_PREFIX))
    }

    /// 去掉首尾空白（含 PTY 产生的 \r）后的输出
    pub fn trimmed_output(&self) -> &str {
        self.output.trim()
    }

    /// 失败原因：优先使用错误信息，否则使用输出
    pub fn failure_reason(&self) -> String {
        match &self.error {
            Some(error) if self.trimmed_output().is_empty() => error.clone(),
            Some(error) => format!("{}: {}", error, self.output_summary(256)),
            None => self.output_summary(256),
        }
    }

    /// 获取输出摘要（限制长度）
    pub fn output_summary(&self, max_len: usize) -> String {
        let full = self.trimmed_output();
        if full.len() <= max_len {
            return full.to_string();
        }

        let mut end = max_len;
        while !full.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &full[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample(exit_code: i32, output: &str, error: Option<&str>) -> ExecutionResult {
        let start = Utc::now();
        ExecutionResult {
            host_id: 1,
            command: "uptime".to_string(),
            output: output.to_string(),
            exit_code,
            remote_exit_status: None,
            error: error.map(str::to_string),
            timing: Timing::between(start, start + Duration::milliseconds(15)),
        }
    }

    #[test]
    fn test_timing_between() {
        let start = Utc::now();
        let timing = Timing::between(start, start + Duration::milliseconds(1250));

        assert_eq!(timing.duration_ms, 1250);
        assert!(timing.is_consistent());
    }

    #[test]
    fn test_timing_clock_going_backwards() {
        let start = Utc::now();
        let timing = Timing::between(start, start - Duration::seconds(3));

        assert_eq!(timing.duration_ms, 0);
        assert_eq!(timing.end_time, timing.start_time);
        assert!(timing.is_consistent());
    }

    #[test]
    fn test_connection_failed_result() {
        let result = ExecutionResult::connection_failed(
            9,
            "ls",
            "connection refused",
            Timing::since(Utc::now()),
        );

        assert!(result.is_connection_failure());
        assert!(!result.is_success());
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
        assert!(result.output.is_empty());
    }

    #[test]
    fn test_is_timeout() {
        let timed_out = sample(1, "", Some("command timed out after 5s"));
        assert!(timed_out.is_timeout());

        let dropped = sample(1, "", Some("channel closed"));
        assert!(!dropped.is_timeout());

        let mut exited = sample(1, "", Some("Process exited with status 2"));
        exited.remote_exit_status = Some(2);
        assert!(!exited.is_timeout());
    }

    #[test]
    fn test_output_summary_respects_char_boundary() {
        let result = sample(0, &"日志".repeat(100), None);
        let summary = result.output_summary(10);

        assert!(summary.ends_with("..."));
        assert!(summary.len() <= 13);
    }

    #[test]
    fn test_failure_reason() {
        let only_error = sample(1, "  \r\n", Some("Process exited with status 2"));
        assert_eq!(only_error.failure_reason(), "Process exited with status 2");

        let with_output = sample(1, "No such file\r\n", Some("Process exited with status 1"));
        assert_eq!(
            with_output.failure_reason(),
            "Process exited with status 1: No such file"
        );
    }

    #[test]
    fn test_execution_result_serialization_flattens_timing() {
        let result = sample(0, "ok", None);
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["duration_ms"], 15);
        assert!(json.get("start_time").is_some());
        assert!(json.get("end_time").is_some());
        assert!(json.get("error").is_none());
    }
}
