//! 远程执行命令行入口
//!
//! 主机清单从 JSON 文件加载，结果以 JSON 输出到 stdout，日志写到 stderr

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use common::{ContainerRunRequest, DirectoryEntry, HostId, ImageBuildRequest, VolumeMount};
use ops_remote::config::AppConfig;
use ops_remote::health::tcp_ping;
use ops_remote::registry::{HostRegistry, InMemoryHostRegistry};
use ops_remote::transfer::FileUpload;
use ops_remote::{telemetry, RemoteOps};

#[derive(Parser)]
#[command(name = "ops-remote")]
#[command(version, about = "Run commands, upload files and manage Docker on remote hosts over SSH")]
struct Cli {
    /// Host inventory file: {"hosts": [{"id": 1, "address": ..., "username": ..., "credential": ...}]}
    #[arg(short, long, global = true, env = "OPS_INVENTORY", default_value = "hosts.json")]
    inventory: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a shell command
    Exec {
        #[arg(long)]
        host: HostId,
        #[arg(long, default_value_t = 0)]
        timeout: i64,
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Upload a single file
    Upload {
        #[arg(long)]
        host: HostId,
        /// Remote destination path
        #[arg(long)]
        remote: String,
        /// Local file to read the content from
        #[arg(long, conflicts_with = "content")]
        file: Option<PathBuf>,
        /// Literal content
        #[arg(long)]
        content: Option<String>,
        #[arg(long)]
        mode: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },
    /// Upload a local directory tree
    UploadDir {
        #[arg(long)]
        host: HostId,
        #[arg(long)]
        local: PathBuf,
        #[arg(long)]
        remote: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Probe one host and print online/offline
    Probe {
        #[arg(long)]
        host: HostId,
    },
    /// Test the SSH connection of one host
    Test {
        #[arg(long)]
        host: HostId,
    },
    /// Plain TCP reachability check
    Ping {
        address: String,
        #[arg(long, default_value_t = 22)]
        port: u16,
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
    /// Probe every host in the inventory and record its status
    Sweep,
    /// Docker version, system info, images and containers
    DockerInfo {
        #[arg(long)]
        host: HostId,
    },
    /// Build a Docker image on the host
    DockerBuild {
        #[arg(long)]
        host: HostId,
        #[arg(long)]
        image: String,
        #[arg(long, default_value = "latest")]
        tag: String,
        #[arg(long, default_value = "Dockerfile")]
        dockerfile: String,
        #[arg(long, default_value = ".")]
        context: String,
        /// KEY=VALUE, repeatable
        #[arg(long = "build-arg", value_parser = parse_key_value)]
        build_args: Vec<(String, String)>,
        #[arg(long, default_value_t = 0)]
        timeout: i64,
    },
    /// Run a container on the host
    DockerRun {
        #[arg(long)]
        host: HostId,
        #[arg(long)]
        image: String,
        #[arg(long, default_value = "latest")]
        tag: String,
        #[arg(long)]
        name: Option<String>,
        /// HOST_PORT:CONTAINER_PORT, repeatable
        #[arg(short = 'p', long = "publish", value_parser = parse_port_binding)]
        ports: Vec<(String, String)>,
        /// KEY=VALUE, repeatable
        #[arg(short = 'e', long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,
        /// HOST_PATH:CONTAINER_PATH[:MODE], repeatable
        #[arg(short = 'v', long = "volume", value_parser = parse_volume)]
        volumes: Vec<VolumeMount>,
        #[arg(short, long)]
        detach: bool,
        #[arg(long, default_value_t = 0)]
        timeout: i64,
        #[arg(trailing_var_arg = true)]
        command: Vec<String>,
    },
    /// Run an arbitrary docker subcommand
    Docker {
        #[arg(long)]
        host: HostId,
        #[arg(long, default_value_t = 0)]
        timeout: i64,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

/// 返回 (容器端口, 主机端口)
fn parse_port_binding(raw: &str) -> Result<(String, String), String> {
    let (host_port, container_port) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("expected HOST_PORT:CONTAINER_PORT, got '{}'", raw))?;
    Ok((container_port.to_string(), host_port.to_string()))
}

fn parse_volume(raw: &str) -> Result<VolumeMount, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    match parts.as_slice() {
        [host, container] => Ok(VolumeMount::new(*host, *container)),
        [host, container, mode] => {
            let mut mount = VolumeMount::new(*host, *container);
            mount.mode = mode.to_string();
            Ok(mount)
        }
        _ => Err(format!("expected HOST_PATH:CONTAINER_PATH[:MODE], got '{}'", raw)),
    }
}

/// 把本地目录展平为上传条目（路径使用 `/` 分隔）
fn flatten_directory(root: &Path) -> anyhow::Result<Vec<DirectoryEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .with_context(|| format!("{} is outside {}", entry.path().display(), root.display()))?;
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            entries.push(DirectoryEntry::dir(path));
            continue;
        }

        let content = std::fs::read_to_string(entry.path())
            .with_context(|| format!("failed to read {} as UTF-8 text", entry.path().display()))?;
        let mut file = DirectoryEntry::file(path, content);
        if let Some(mode) = file_mode(entry.path()) {
            file = file.with_permissions(mode);
        }
        entries.push(file);
    }

    Ok(entries)
}

#[cfg(unix)]
fn file_mode(path: &Path) -> Option<String> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(path).ok()?;
    Some(format!("{:04o}", metadata.permissions().mode() & 0o7777))
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> Option<String> {
    None
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 加载 .env 文件（开发环境）
    if let Ok(env) = std::env::var("OPS_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow!("Failed to load configuration: {}", e)
    })?;
    telemetry::init_telemetry(&config.logging);

    if let Commands::Ping {
        ref address,
        port,
        timeout,
    } = cli.command
    {
        tcp_ping(address, port, Duration::from_secs(timeout)).await?;
        println!("{}:{} reachable", address, port);
        return Ok(());
    }

    let registry = Arc::new(
        InMemoryHostRegistry::from_inventory_file(&cli.inventory)
            .with_context(|| format!("failed to load inventory {}", cli.inventory.display()))?,
    );
    let ops = RemoteOps::from_config(&config, registry.clone(), registry.clone()).await?;

    tracing::debug!(hosts = registry.hosts().len(), "Inventory loaded");

    match cli.command {
        Commands::Exec {
            host,
            timeout,
            command,
        } => {
            let result = ops.executor.execute(host, &command.join(" "), timeout).await?;
            print_json(&result)?;
        }
        Commands::Upload {
            host,
            remote,
            file,
            content,
            mode,
            overwrite,
        } => {
            let content = match (file, content) {
                (Some(path), _) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, Some(content)) => content,
                (None, None) => return Err(anyhow!("either --file or --content is required")),
            };
            let mut request = FileUpload::new(remote, content).overwrite(overwrite);
            request.permissions = mode;

            let result = ops.transfer.upload(host, &request).await?;
            print_json(&result)?;
        }
        Commands::UploadDir {
            host,
            local,
            remote,
            overwrite,
        } => {
            let entries = flatten_directory(&local)?;
            let result = ops
                .transfer
                .upload_directory(host, &remote, &entries, overwrite)
                .await?;
            print_json(&result)?;
        }
        Commands::Probe { host } => {
            let descriptor = registry.resolve_host(host).await?;
            let status = ops.health.probe(&descriptor).await;
            print_json(&serde_json::json!({ "host_id": host, "status": status }))?;
        }
        Commands::Test { host } => {
            ops.health.test_connection(host).await.map_err(|e| {
                eprintln!("{}", e.user_message());
                anyhow!(e)
            })?;
            println!("host {} connection ok", host);
        }
        Commands::Sweep => {
            let report = ops.health.sweep(registry.hosts()).await;
            print_json(&report)?;
        }
        Commands::DockerInfo { host } => {
            let info = ops.docker.info(host).await?;
            print_json(&info)?;
        }
        Commands::DockerBuild {
            host,
            image,
            tag,
            dockerfile,
            context,
            build_args,
            timeout,
        } => {
            let mut request = ImageBuildRequest::new(image);
            request.image_tag = tag;
            request.dockerfile = dockerfile;
            request.context_path = context;
            request.build_args = build_args.into_iter().collect::<BTreeMap<_, _>>();
            request.timeout_secs = timeout;

            let result = ops.docker.build(host, &request).await?;
            print_json(&result)?;
        }
        Commands::DockerRun {
            host,
            image,
            tag,
            name,
            ports,
            env,
            volumes,
            detach,
            timeout,
            command,
        } => {
            let mut request = ContainerRunRequest::new(image);
            request.image_tag = tag;
            request.container_name = name;
            request.port_bindings = ports.into_iter().collect();
            request.env_vars = env.into_iter().collect();
            request.volumes = volumes;
            request.detach = detach;
            request.timeout_secs = timeout;
            if !command.is_empty() {
                request.command = Some(command.join(" "));
            }

            let result = ops.docker.run(host, &request).await?;
            print_json(&result)?;
        }
        Commands::Docker {
            host,
            timeout,
            args,
        } => {
            let result = ops.docker.exec_docker(host, &args.join(" "), timeout).await?;
            print_json(&result)?;
        }
        Commands::Ping { .. } => {}
    }

    Ok(())
}
