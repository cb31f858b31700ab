//! 远程 shell 命令构造
//!
//! 文件传输没有独立协议，全部依靠 shell 命令完成；所有转义规则集中在这里。
//! 内容中的 NUL 字节和超过远程命令行长度限制的内容不做特殊处理

/// 默认文件权限
pub const DEFAULT_FILE_MODE: &str = "0644";

const EXISTS_MARKER: &str = "exists";
const NOT_EXISTS_MARKER: &str = "not_exists";

/// 用单引号包裹，内部单引号替换为 '\''
pub fn quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(ch);
        }
    }
    quoted.push('\'');
    quoted
}

/// 路径存在性检测，输出 exists / not_exists
pub fn test_exists(path: &str) -> String {
    format!(
        "test -e {} && echo {} || echo {}",
        quote(path),
        EXISTS_MARKER,
        NOT_EXISTS_MARKER
    )
}

/// 解析 `test_exists` 的输出，无法识别时返回 None
pub fn parse_exists(output: &str) -> Option<bool> {
    match output.lines().map(str::trim).filter(|l| !l.is_empty()).last() {
        Some(EXISTS_MARKER) => Some(true),
        Some(NOT_EXISTS_MARKER) => Some(false),
        _ => None,
    }
}

/// 递归创建目录（已存在不报错）
pub fn mkdir_p(path: &str) -> String {
    format!("mkdir -p {}", quote(path))
}

/// 通过重定向写入文件内容
pub fn write_file(path: &str, content: &str) -> String {
    format!("printf '%s' {} > {}", quote(content), quote(path))
}

pub fn chmod(mode: &str, path: &str) -> String {
    format!("chmod {} {}", mode, quote(path))
}

/// 3-4 位八进制权限
pub fn validate_mode(mode: &str) -> bool {
    (3..=4).contains(&mode.len()) && mode.chars().all(|c| ('0'..='7').contains(&c))
}

/// 远程路径的父目录；没有需要创建的父目录时返回 None
pub fn parent_dir(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    let parent = &trimmed[..idx];
    if parent.is_empty() || parent == "." {
        None
    } else {
        Some(parent)
    }
}

/// 拼接远程根目录和相对路径，拒绝包含 `..` 的路径
pub fn join_remote(root: &str, relative: &str) -> Result<String, String> {
    let mut parts = Vec::new();
    for part in relative.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(format!("path escapes remote root: {}", relative)),
            _ => parts.push(part),
        }
    }

    let root = if root.len() > 1 {
        root.trim_end_matches('/')
    } else {
        root
    };

    if parts.is_empty() {
        return Ok(root.to_string());
    }

    let joined = parts.join("/");
    if root.is_empty() {
        Ok(joined)
    } else if root.ends_with('/') {
        Ok(format!("{}{}", root, joined))
    } else {
        Ok(format!("{}/{}", root, joined))
    }
}
