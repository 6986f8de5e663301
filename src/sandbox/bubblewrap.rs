//! Bubblewrap backend
//!
//! Uses the unprivileged `bwrap` helper: fast startup, mount/PID namespace
//! isolation, and fine-grained bind control. Preferred on developer
//! machines. Memory is capped with an address-space rlimit applied in the
//! child before exec; CPU shares are only enforceable by the container
//! backend.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::models::NetworkMode;

use super::{apply_env_whitelist, run_with_timeout, ExecutionRequest, SandboxError, SandboxRuntime};

/// System prefixes exposed read-only inside every bubblewrap sandbox.
const RO_SYSTEM_PATHS: &[&str] = &["/usr", "/bin", "/sbin", "/lib", "/lib64", "/etc"];

pub struct BubblewrapRuntime;

impl BubblewrapRuntime {
    pub fn new() -> Self {
        Self
    }

    fn build_command(&self, argv: &[String], request: &ExecutionRequest) -> Command {
        let mut command = Command::new("bwrap");
        command.arg("--die-with-parent");
        command.args(["--unshare-pid", "--unshare-ipc", "--unshare-uts"]);

        if request.limits.network == NetworkMode::None {
            command.arg("--unshare-net");
        }

        command.args(["--proc", "/proc"]);
        command.args(["--dev", "/dev"]);
        command.args(["--tmpfs", "/tmp"]);

        for path in RO_SYSTEM_PATHS {
            if std::path::Path::new(path).exists() {
                command.args(["--ro-bind", path, path]);
            }
        }
        for path in &request.readonly_paths {
            let p = path.to_string_lossy();
            command.args(["--ro-bind", p.as_ref(), p.as_ref()]);
        }

        let workspace = request.workspace.to_string_lossy();
        if request.limits.readonly_root {
            command.args(["--ro-bind", workspace.as_ref(), workspace.as_ref()]);
        } else {
            command.args(["--bind", workspace.as_ref(), workspace.as_ref()]);
        }

        for dir in &request.cache_dirs {
            let d = dir.to_string_lossy();
            command.args(["--bind", d.as_ref(), d.as_ref()]);
        }
        for mount in &request.bind_mounts {
            let host = mount.host.to_string_lossy();
            let inner = mount.container.to_string_lossy();
            let flag = if mount.writable { "--bind" } else { "--ro-bind" };
            command.args([flag, host.as_ref(), inner.as_ref()]);
        }

        command.args(["--chdir", workspace.as_ref()]);
        command.arg("--");
        command.args(argv);

        apply_env_whitelist(&mut command, &request.env_whitelist);
        apply_memory_rlimit(&mut command, request.limits.memory_bytes);
        command
    }
}

impl Default for BubblewrapRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxRuntime for BubblewrapRuntime {
    fn name(&self) -> &'static str {
        "bubblewrap"
    }

    async fn execute(
        &self,
        argv: &[String],
        request: &ExecutionRequest,
    ) -> Result<i32, SandboxError> {
        debug!(command = %argv.join(" "), "executing under bubblewrap");
        let command = self.build_command(argv, request);
        run_with_timeout(command, request.timeout, "bubblewrap").await
    }
}

/// Cap the child's address space before exec. Applies to bwrap itself and
/// is inherited by everything it spawns.
#[cfg(unix)]
pub(crate) fn apply_memory_rlimit(command: &mut Command, memory_bytes: u64) {
    unsafe {
        command.pre_exec(move || {
            let limit = libc::rlimit {
                rlim_cur: memory_bytes as libc::rlim_t,
                rlim_max: memory_bytes as libc::rlim_t,
            };
            if libc::setrlimit(libc::RLIMIT_AS, &limit) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(crate) fn apply_memory_rlimit(_command: &mut Command, _memory_bytes: u64) {}
