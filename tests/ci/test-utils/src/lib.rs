use anyhow::{Context, Result, anyhow};
use rand::{Rng, distributions::Alphanumeric};
use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

/// 根目录下启动脚本的位置，与真实构建产物一致。
pub const RUN_SCRIPT: &str = "bin/run";

/// 带有 `bin/run` 启动脚本的临时根目录，drop 时删除。
#[derive(Debug)]
pub struct FakeRoot {
    path: PathBuf,
}

impl FakeRoot {
    /// 创建根目录，其 `bin/run` 是内容为 `body` 的 `/bin/sh` 脚本。
    ///
    /// 长时间运行的脚本请以 `exec` 结尾，这样持有 stdout 的就是启动脚本本身的 pid，
    /// 杀掉它即可关闭管道。
    pub fn with_script(body: &str) -> Result<Self> {
        let root = FakeRoot {
            path: temp_dir("serial-smoke-root")?,
        };
        root.write_script(RUN_SCRIPT, body)?;
        Ok(root)
    }

    /// 创建根目录，其 `bin/run` 以 `args` 执行 `program`。
    pub fn with_exec(program: &Path, args: &[&str]) -> Result<Self> {
        let mut body = format!("exec {}", shell_quote(&program.to_string_lossy()));
        for arg in args {
            body.push(' ');
            body.push_str(&shell_quote(arg));
        }
        Self::with_script(&body)
    }

    /// 创建没有启动脚本的根目录。
    pub fn empty() -> Result<Self> {
        Ok(FakeRoot {
            path: temp_dir("serial-smoke-empty")?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_script(&self) -> PathBuf {
        self.path.join(RUN_SCRIPT)
    }

    /// 在根目录内的 `relative` 位置写入可执行脚本。
    pub fn write_script(&self, relative: &str, body: &str) -> Result<PathBuf> {
        let path = self.path.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("无法创建目录 {}", parent.display()))?;
        }
        let script = format!("#!/bin/sh\n{body}\n");
        fs::write(&path, script).with_context(|| format!("写入脚本失败: {}", path.display()))?;
        let mut perms = fs::metadata(&path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms)
            .with_context(|| format!("修改权限失败: {}", path.display()))?;
        Ok(path)
    }
}

impl Drop for FakeRoot {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

/// 用单引号包裹 `value`，供 `/bin/sh` 使用。
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// 在系统临时目录下创建一个名字唯一的目录。
pub fn temp_dir(prefix: &str) -> Result<PathBuf> {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    let path = std::env::temp_dir().join(format!("{prefix}-{suffix}"));
    fs::create_dir_all(&path).with_context(|| format!("无法创建临时目录 {}", path.display()))?;
    Ok(path)
}

/// `pid` 对应的进程是否仍然存在。僵尸进程也算存在。
pub fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // 信号 0 只检查进程是否存在以及权限。
    unsafe { libc::kill(pid, 0) == 0 }
}

/// `pid` 是否仍在运行。已被杀死但尚未回收的僵尸进程不算运行。
///
/// 读取 `/proc/<pid>/stat` 的状态字段；没有 `/proc` 时退回到 [`process_alive`]。
pub fn process_running(pid: u32) -> bool {
    if !Path::new("/proc/self/stat").exists() {
        return process_alive(pid);
    }
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // 进程名可能包含空格，状态字段位于最后一个 ')' 之后。
    let state = stat
        .rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next());
    !matches!(state, Some("Z" | "X") | None)
}

/// 在 `limit` 内轮询，直到 `pid` 不再运行。
pub fn wait_until_stopped(pid: u32, limit: Duration) -> Result<()> {
    let deadline = Instant::now() + limit;
    while process_running(pid) {
        if Instant::now() >= deadline {
            return Err(anyhow!("进程 {pid} 在 {limit:?} 后仍在运行"));
        }
        thread::sleep(Duration::from_millis(20));
    }
    Ok(())
}

/// `pid` 仍然存在时返回错误。
pub fn ensure_reaped(pid: u32) -> Result<()> {
    if process_alive(pid) {
        Err(anyhow!("进程 {pid} 仍在运行"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_running() {
        assert!(process_running(std::process::id()), "当前进程应处于运行状态");
        assert!(process_alive(std::process::id()));
    }

    #[test]
    fn exited_child_is_not_running_even_before_reaping() {
        let mut child = std::process::Command::new("true").spawn().expect("启动子进程");
        let pid = child.id();
        wait_until_stopped(pid, Duration::from_secs(2)).expect("子进程应退出");
        assert!(process_alive(pid), "未回收的僵尸进程仍然存在");
        child.wait().expect("回收子进程");
        ensure_reaped(pid).expect("回收后进程应消失");
    }
}
