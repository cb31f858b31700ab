//! Docker 操作
//!
//! 不直接访问 Docker API：所有操作都拼装成 docker 命令，通过命令执行器在
//! 远程主机上运行，再从输出中解析结构化结果

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::TimeoutConfig;
use crate::error::{AppError, Result};
use crate::shell::quote;
use crate::ssh::CommandExecutor;
use common::{
    ContainerRunRequest, ContainerRunResult, ContainerStatus, ContainerSummary, DockerInfoResult,
    ExecutionResult, HostDescriptor, HostId, ImageBuildRequest, ImageBuildResult, ImageSummary,
    Timing,
};

/// `docker run` 在守护进程报错时的退出状态
const DOCKER_RUN_REFUSED: u32 = 125;

/// 日志摘录保留输出末尾的字节数
pub const LOG_EXCERPT_BYTES: usize = 64 * 1024;

const INFO_COMMAND: &str = "docker version --format '{{json .}}' \
    && docker info --format '{{json .}}' \
    && docker images --format '{{json .}}' \
    && docker ps -a --format '{{json .}}'";

static CONTAINER_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*([0-9a-f]{64})\s*$").unwrap());

/// Docker 编排器
#[derive(Clone)]
pub struct ContainerOrchestrator {
    executor: CommandExecutor,
    timeouts: TimeoutConfig,
}

impl ContainerOrchestrator {
    pub fn new(executor: CommandExecutor, timeouts: TimeoutConfig) -> Self {
        Self { executor, timeouts }
    }

    async fn resolve(&self, host_id: HostId) -> Result<HostDescriptor> {
        self.executor.registry().resolve_host(host_id).await
    }

    fn require_image(image_name: &str) -> Result<()> {
        if image_name.trim().is_empty() {
            return Err(AppError::validation("image_name is required"));
        }
        Ok(())
    }

    /// 汇总 Docker 版本、系统信息、镜像和容器列表
    pub async fn info(&self, host_id: HostId) -> Result<DockerInfoResult> {
        let host = self.resolve(host_id).await?;
        let start_time = Utc::now();

        let result = self
            .executor
            .execute_on(&host, INFO_COMMAND, self.timeouts.docker_info_secs as i64)
            .await;

        let mut info = parse_info_output(host_id, &result.output);
        info.available = result.is_success();
        info.message = if info.available {
            "docker is available".to_string()
        } else {
            format!("failed to query docker: {}", result.failure_reason())
        };
        info.timing = Timing::since(start_time);

        debug!(
            host_id = host_id,
            available = info.available,
            images = info.images.len(),
            containers = info.containers.len(),
            "Docker info collected"
        );

        Ok(info)
    }

    /// 构建镜像，成功后查询镜像 ID 和大小
    pub async fn build(&self, host_id: HostId, request: &ImageBuildRequest) -> Result<ImageBuildResult> {
        Self::require_image(&request.image_name)?;
        let host = self.resolve(host_id).await?;
        let start_time = Utc::now();

        let command = build_command(request);
        let result = self
            .executor
            .execute_on(&host, &command, request.timeout_secs)
            .await;
        let succeeded = result.is_success();

        let (image_id, size_bytes) = if succeeded {
            let inspect = self
                .executor
                .execute_on(
                    &host,
                    &inspect_image_command(&request.image_ref()),
                    self.timeouts.docker_inspect_secs as i64,
                )
                .await;
            if inspect.is_success() {
                parse_image_inspect(&inspect.output)
            } else {
                warn!(host_id = host_id, reason = %inspect.failure_reason(), "Image inspect failed");
                (None, None)
            }
        } else {
            (None, None)
        };

        let message = if succeeded {
            format!("image {} built", request.image_ref())
        } else {
            format!("image build failed: {}", result.failure_reason())
        };

        info!(
            host_id = host_id,
            image = %request.image_ref(),
            succeeded = succeeded,
            exit_code = result.exit_code,
            "Docker build finished"
        );

        Ok(ImageBuildResult {
            host_id,
            image_name: request.image_name.clone(),
            image_tag: request.image_tag.clone(),
            image_id,
            size_bytes,
            succeeded,
            exit_code: result.exit_code,
            message,
            logs: log_excerpt(&result.output),
            timing: Timing::since(start_time),
        })
    }

    /// 运行容器；前台运行时继续 wait 并收集日志
    pub async fn run(&self, host_id: HostId, request: &ContainerRunRequest) -> Result<ContainerRunResult> {
        Self::require_image(&request.image_name)?;
        let host = self.resolve(host_id).await?;
        let start_time = Utc::now();

        let container_name = match request.container_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("app-{}", start_time.timestamp()),
        };

        let command = run_command(request, &container_name);
        let result = self
            .executor
            .execute_on(&host, &command, request.timeout_secs)
            .await;

        let mut run = ContainerRunResult {
            host_id,
            container_id: String::new(),
            container_name: container_name.clone(),
            image_name: request.image_name.clone(),
            image_tag: request.image_tag.clone(),
            command: request.command.clone(),
            status: ContainerStatus::Failed,
            exit_code: None,
            message: String::new(),
            logs: log_excerpt(&result.output),
            port_bindings: request.port_bindings.clone(),
            timing: Timing::since(start_time),
        };

        if result.is_connection_failure() {
            run.message = format!("failed to run container: {}", result.failure_reason());
            return Ok(run);
        }

        if request.detach {
            if result.is_success() {
                run.container_id = find_container_id(&result.output).unwrap_or_default();
                run.status = ContainerStatus::Running;
                run.message = format!("container {} started", container_name);
            } else {
                run.message = format!("failed to run container: {}", result.failure_reason());
            }
        } else {
            self.finish_foreground(&host, request, &result, &mut run).await;
        }

        if run.container_id.is_empty() {
            warn!(host_id = host_id, container = %container_name, "Container id not found in output");
        }

        info!(
            host_id = host_id,
            container = %container_name,
            status = ?run.status,
            exit_code = ?run.exit_code,
            "Docker run finished"
        );

        run.timing = Timing::since(start_time);
        Ok(run)
    }

    async fn finish_foreground(
        &self,
        host: &HostDescriptor,
        request: &ContainerRunRequest,
        result: &ExecutionResult,
        run: &mut ContainerRunResult,
    ) {
        // 守护进程拒绝本次运行时，同名容器属于之前的运行
        if !container_started(result) {
            run.message = format!("failed to run container: {}", result.failure_reason());
            return;
        }

        let lookup = self
            .executor
            .execute_on(
                host,
                &lookup_container_command(&run.container_name),
                self.timeouts.docker_inspect_secs as i64,
            )
            .await;
        if lookup.is_success() {
            run.container_id = find_container_id(&lookup.output).unwrap_or_default();
        }

        if run.container_id.is_empty() {
            if result.is_success() {
                run.status = ContainerStatus::Exited;
                run.message = format!(
                    "container {} finished, container id unavailable",
                    run.container_name
                );
            } else {
                run.message = format!("failed to run container: {}", result.failure_reason());
            }
            return;
        }

        let wait = self
            .executor
            .execute_on(
                host,
                &format!("docker wait {}", run.container_id),
                request.timeout_secs,
            )
            .await;

        let logs = self
            .executor
            .execute_on(
                host,
                &format!("docker logs {}", run.container_id),
                self.timeouts.docker_logs_secs as i64,
            )
            .await;
        if logs.is_success() {
            run.logs = log_excerpt(&logs.output);
        }

        if wait.is_success() {
            run.exit_code = parse_wait_output(&wait.output);
            run.status = ContainerStatus::Exited;
            run.message = match run.exit_code {
                Some(code) => format!("container {} exited with code {}", run.container_name, code),
                None => format!("container {} exited, exit code unavailable", run.container_name),
            };
        } else if wait.is_timeout() {
            run.status = ContainerStatus::Running;
            run.message = format!(
                "container {} still running, wait did not complete: {}",
                run.container_name,
                wait.failure_reason()
            );
        } else {
            run.message = format!(
                "wait for container {} failed: {}",
                run.container_name,
                wait.failure_reason()
            );
        }
    }

    /// 执行任意 docker 子命令，缺少 `docker ` 前缀时自动补上
    pub async fn exec_docker(
        &self,
        host_id: HostId,
        subcommand: &str,
        timeout_secs: i64,
    ) -> Result<ExecutionResult> {
        self.executor
            .execute(host_id, &docker_command(subcommand), timeout_secs)
            .await
    }
}

pub fn docker_command(subcommand: &str) -> String {
    let trimmed = subcommand.trim();
    if trimmed == "docker" || trimmed.starts_with("docker ") {
        trimmed.to_string()
    } else {
        format!("docker {}", trimmed)
    }
}

pub fn build_command(request: &ImageBuildRequest) -> String {
    let mut command = format!(
        "docker build -t {} -f {}",
        quote(&request.image_ref()),
        quote(&request.dockerfile)
    );
    for (key, value) in &request.build_args {
        command.push_str(&format!(" --build-arg {}", quote(&format!("{}={}", key, value))));
    }
    command.push(' ');
    command.push_str(&quote(&request.context_path));
    command
}

pub fn run_command(request: &ContainerRunRequest, container_name: &str) -> String {
    let mut command = format!("docker run --name {}", quote(container_name));
    if request.detach {
        command.push_str(" -d");
    }
    for (container_port, host_port) in &request.port_bindings {
        command.push_str(&format!(" -p {}", quote(&format!("{}:{}", host_port, container_port))));
    }
    for (key, value) in &request.env_vars {
        command.push_str(&format!(" -e {}", quote(&format!("{}={}", key, value))));
    }
    for volume in &request.volumes {
        command.push_str(&format!(" -v {}", quote(&volume.spec())));
    }
    command.push(' ');
    command.push_str(&quote(&request.image_ref()));
    if let Some(cmd) = request.command.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        command.push(' ');
        command.push_str(cmd);
    }
    command
}

fn inspect_image_command(image_ref: &str) -> String {
    format!("docker image inspect --format '{{{{.Id}}}} {{{{.Size}}}}' {}", quote(image_ref))
}

/// 名称过滤器按正则匹配，名称需转义后精确锚定
fn lookup_container_command(container_name: &str) -> String {
    format!(
        "docker ps -aq --no-trunc --filter {}",
        quote(&format!("name=^/{}$", regex::escape(container_name)))
    )
}

/// 前台运行是否可能已创建本次的容器
///
/// 125 表示 docker 自身拒绝了运行（如名称冲突），此时不会有属于本次的容器；
/// 没有退出状态时只有超时意味着容器可能仍在运行
fn container_started(result: &ExecutionResult) -> bool {
    match result.remote_exit_status {
        Some(DOCKER_RUN_REFUSED) => false,
        Some(_) => true,
        None => result.is_timeout(),
    }
}

/// 输出中第一行 64 位十六进制容器 ID
pub fn find_container_id(output: &str) -> Option<String> {
    CONTAINER_ID
        .captures(output)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// `docker wait` 输出的最后一个非空行即退出码
pub fn parse_wait_output(output: &str) -> Option<i64> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .and_then(|line| line.parse().ok())
}

/// 解析 `{{.Id}} {{.Size}}`
pub fn parse_image_inspect(output: &str) -> (Option<String>, Option<u64>) {
    let line = match output.lines().map(str::trim).find(|line| !line.is_empty()) {
        Some(line) => line,
        None => return (None, None),
    };

    let mut parts = line.split_whitespace();
    let id = parts
        .next()
        .filter(|id| id.starts_with("sha256:"))
        .map(str::to_string);
    let size = parts.next().and_then(|size| size.parse().ok());
    (id, size)
}

/// 保留输出末尾 LOG_EXCERPT_BYTES 字节并按行切分
pub fn log_excerpt(output: &str) -> Vec<String> {
    let mut start = output.len().saturating_sub(LOG_EXCERPT_BYTES);
    while !output.is_char_boundary(start) {
        start += 1;
    }

    output[start..]
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VersionComponent {
    version: Option<String>,
    arch: Option<String>,
    os: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SystemInfo {
    #[serde(rename = "ServerVersion")]
    server_version: Option<String>,
    #[serde(rename = "Architecture")]
    architecture: Option<String>,
    #[serde(rename = "OperatingSystem")]
    operating_system: Option<String>,
    #[serde(rename = "NCPU")]
    ncpu: Option<u64>,
    #[serde(rename = "MemTotal")]
    mem_total: Option<u64>,
    #[serde(rename = "Images")]
    images: Option<u64>,
    #[serde(rename = "Containers")]
    containers: Option<u64>,
    #[serde(rename = "ContainersRunning")]
    containers_running: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ImageLine {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(default)]
    repository: String,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerLine {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(default)]
    names: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    status: String,
}

/// 解析逐行 JSON 输出；无法识别的行忽略，缺失的字段保持 None
pub fn parse_info_output(host_id: HostId, output: &str) -> DockerInfoResult {
    let mut info = DockerInfoResult {
        host_id,
        available: false,
        server_version: None,
        client_version: None,
        architecture: None,
        operating_system: None,
        ncpu: None,
        mem_total: None,
        images_count: None,
        containers_count: None,
        running_count: None,
        images: Vec::new(),
        containers: Vec::new(),
        message: String::new(),
        timing: Timing::since(Utc::now()),
    };

    for line in output.lines().map(str::trim) {
        if !line.starts_with('{') {
            continue;
        }
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => continue,
        };

        if value.get("Client").is_some() || value.get("Server").is_some() {
            let component = |key: &str| -> VersionComponent {
                value
                    .get(key)
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_default()
            };
            let client = component("Client");
            let server = component("Server");

            info.client_version = client.version;
            info.server_version = info.server_version.take().or(server.version);
            info.architecture = info.architecture.take().or(server.arch);
            info.operating_system = info.operating_system.take().or(server.os);
        } else if value.get("ServerVersion").is_some() || value.get("NCPU").is_some() {
            let system: SystemInfo = serde_json::from_value(value).unwrap_or_default();

            info.server_version = system.server_version.or(info.server_version.take());
            info.architecture = system.architecture.or(info.architecture.take());
            info.operating_system = system.operating_system.or(info.operating_system.take());
            info.ncpu = system.ncpu;
            info.mem_total = system.mem_total;
            info.images_count = system.images;
            info.containers_count = system.containers;
            info.running_count = system.containers_running;
        } else if value.get("Repository").is_some() {
            if let Ok(image) = serde_json::from_value::<ImageLine>(value) {
                info.images.push(ImageSummary {
                    id: image.id,
                    repository: image.repository,
                    tag: image.tag,
                    size: image.size,
                });
            }
        } else if value.get("Names").is_some() {
            if let Ok(container) = serde_json::from_value::<ContainerLine>(value) {
                info.containers.push(ContainerSummary {
                    id: container.id,
                    names: container.names,
                    image: container.image,
                    state: container.state,
                    status: container.status,
                });
            }
        }
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::VolumeMount;

    #[test]
    fn test_docker_command_prefix() {
        assert_eq!(docker_command("ps -a"), "docker ps -a");
        assert_eq!(docker_command("  docker ps"), "docker ps");
        assert_eq!(docker_command("docker"), "docker");
        assert_eq!(docker_command("dockerd --version"), "docker dockerd --version");
    }

    #[test]
    fn test_build_command() {
        let mut request = ImageBuildRequest::new("api");
        request.image_tag = "v2".to_string();
        request.dockerfile = "docker/Dockerfile".to_string();
        request.context_path = "/srv/api".to_string();
        request.build_args.insert("VERSION".to_string(), "2.0".to_string());
        request.build_args.insert("ENV".to_string(), "prod".to_string());

        assert_eq!(
            build_command(&request),
            "docker build -t 'api:v2' -f 'docker/Dockerfile' --build-arg 'ENV=prod' --build-arg 'VERSION=2.0' '/srv/api'"
        );
    }

    #[test]
    fn test_run_command() {
        let mut request = ContainerRunRequest::new("nginx");
        request.detach = true;
        request.port_bindings.insert("80".to_string(), "8080".to_string());
        request.env_vars.insert("MODE".to_string(), "it's".to_string());
        request.volumes.push(VolumeMount::new("/data", "/usr/share/nginx/html"));
        request.command = Some("nginx -g 'daemon off;'".to_string());

        assert_eq!(
            run_command(&request, "web"),
            "docker run --name 'web' -d -p '8080:80' -e 'MODE=it'\\''s' \
             -v '/data:/usr/share/nginx/html:rw' 'nginx:latest' nginx -g 'daemon off;'"
        );
    }

    #[test]
    fn test_inspect_and_lookup_commands() {
        assert_eq!(
            inspect_image_command("api:v2"),
            "docker image inspect --format '{{.Id}} {{.Size}}' 'api:v2'"
        );
        assert_eq!(
            lookup_container_command("web"),
            "docker ps -aq --no-trunc --filter 'name=^/web$'"
        );
    }

    #[test]
    fn test_lookup_escapes_name_pattern() {
        assert_eq!(
            lookup_container_command("app.v1"),
            "docker ps -aq --no-trunc --filter 'name=^/app\\.v1$'"
        );
    }

    fn run_result(remote_exit_status: Option<u32>, error: Option<&str>) -> ExecutionResult {
        let start = Utc::now();
        ExecutionResult {
            host_id: 1,
            command: "docker run".to_string(),
            output: String::new(),
            exit_code: if remote_exit_status == Some(0) { 0 } else { 1 },
            remote_exit_status,
            error: error.map(str::to_string),
            timing: Timing::since(start),
        }
    }

    #[test]
    fn test_container_started() {
        assert!(container_started(&run_result(Some(0), None)));
        assert!(container_started(&run_result(Some(3), Some("Process exited with status 3"))));
        assert!(container_started(&run_result(None, Some("command timed out after 30s"))));
        assert!(!container_started(&run_result(Some(125), Some("Process exited with status 125"))));
        assert!(!container_started(&run_result(None, Some("channel closed"))));
    }

    #[test]
    fn test_find_container_id() {
        let id = "a".repeat(64);
        let output = format!("Unable to find image locally\r\n{}\r\n", id);
        assert_eq!(find_container_id(&output), Some(id));

        assert_eq!(find_container_id(&"b".repeat(63)), None);
        assert_eq!(find_container_id("hello world"), None);
    }

    #[test]
    fn test_parse_wait_output() {
        assert_eq!(parse_wait_output("137\r\n"), Some(137));
        assert_eq!(parse_wait_output("0"), Some(0));
        assert_eq!(parse_wait_output("Error: No such container"), None);
        assert_eq!(parse_wait_output(""), None);
    }

    #[test]
    fn test_parse_image_inspect() {
        assert_eq!(
            parse_image_inspect("sha256:abc123 52428800\r\n"),
            (Some("sha256:abc123".to_string()), Some(52428800))
        );
        assert_eq!(parse_image_inspect("sha256:abc123"), (Some("sha256:abc123".to_string()), None));
        assert_eq!(parse_image_inspect(""), (None, None));
    }

    #[test]
    fn test_log_excerpt_keeps_tail() {
        let mut output = "x".repeat(LOG_EXCERPT_BYTES);
        output.push_str("\r\nlast line\r\n\r\n");

        let logs = log_excerpt(&output);
        assert_eq!(logs.last().map(String::as_str), Some("last line"));
        assert!(logs.iter().map(String::len).sum::<usize>() <= LOG_EXCERPT_BYTES);
    }

    #[test]
    fn test_log_excerpt_char_boundary() {
        let output = "日".repeat(LOG_EXCERPT_BYTES);
        let logs = log_excerpt(&output);
        assert_eq!(logs.len(), 1);
        assert!(logs[0].len() <= LOG_EXCERPT_BYTES);
    }

    #[test]
    fn test_parse_info_output() {
        let output = concat!(
            r#"{"Client":{"Version":"24.0.6","Arch":"amd64","Os":"linux"},"Server":{"Version":"24.0.7","Arch":"amd64","Os":"linux"}}"#,
            "\r\n",
            r#"{"ServerVersion":"24.0.7","Architecture":"x86_64","OperatingSystem":"Ubuntu 22.04","NCPU":8,"MemTotal":16777216000,"Images":3,"Containers":2,"ContainersRunning":1}"#,
            "\r\n",
            r#"{"ID":"sha256:1","Repository":"nginx","Tag":"latest","Size":"187MB"}"#,
            "\n",
            r#"{"ID":"c1","Names":"web","Image":"nginx:latest","State":"running","Status":"Up 2 hours"}"#,
            "\n",
            "WARNING: No swap limit support\n"
        );

        let info = parse_info_output(4, output);

        assert_eq!(info.client_version.as_deref(), Some("24.0.6"));
        assert_eq!(info.server_version.as_deref(), Some("24.0.7"));
        assert_eq!(info.architecture.as_deref(), Some("x86_64"));
        assert_eq!(info.ncpu, Some(8));
        assert_eq!(info.mem_total, Some(16777216000));
        assert_eq!(info.running_count, Some(1));
        assert_eq!(info.images.len(), 1);
        assert_eq!(info.images[0].repository, "nginx");
        assert_eq!(info.containers[0].state, "running");
    }

    #[test]
    fn test_parse_info_output_missing_fields_stay_none() {
        let info = parse_info_output(1, "Cannot connect to the Docker daemon\r\n");

        assert!(info.server_version.is_none());
        assert!(info.ncpu.is_none());
        assert!(info.images_count.is_none());
        assert!(info.images.is_empty());
    }
}
