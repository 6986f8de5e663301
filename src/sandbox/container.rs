//! Container backend
//!
//! Drives `docker` or `podman`. Slowest to start but the only backend that
//! enforces the full security-level table: memory and CPU quotas, capability
//! drops, read-only root filesystem, and network modes all map directly onto
//! runtime flags. Preferred in CI and production where a runtime is already
//! present.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::models::NetworkMode;

use super::{run_with_timeout, ExecutionRequest, SandboxError, SandboxRuntime};

/// Image used when the operator has not pinned one.
const DEFAULT_IMAGE: &str = "debian:stable-slim";

/// Mount point for the workspace inside the container.
const WORKSPACE_MOUNT: &str = "/workspace";

pub struct ContainerRuntime {
    binary: String,
}

impl ContainerRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn image() -> String {
        std::env::var("CMDGUARD_SANDBOX_IMAGE").unwrap_or_else(|_| DEFAULT_IMAGE.to_string())
    }

    fn build_command(&self, argv: &[String], request: &ExecutionRequest) -> Command {
        let mut command = Command::new(&self.binary);
        command.args(["run", "--rm", "--interactive"]);

        match request.limits.network {
            NetworkMode::None => {
                command.args(["--network", "none"]);
            }
            NetworkMode::Restricted | NetworkMode::Full => {
                command.args(["--network", "bridge"]);
            }
        }

        command.arg(format!("--memory={}b", request.limits.memory_bytes));
        command.arg(format!("--cpus={}", request.limits.cpu_limit));
        command.arg("--security-opt=no-new-privileges");

        if request.limits.drop_all_caps {
            command.arg("--cap-drop=ALL");
            for cap in request.limits.retained_caps {
                command.arg(format!("--cap-add={cap}"));
            }
        }
        if request.limits.readonly_root {
            command.arg("--read-only");
        }

        let workspace = request.workspace.to_string_lossy();
        let workspace_flag = if request.limits.readonly_root { ":ro" } else { "" };
        command.arg("-v");
        command.arg(format!("{workspace}:{WORKSPACE_MOUNT}{workspace_flag}"));
        command.args(["-w", WORKSPACE_MOUNT]);

        for dir in &request.cache_dirs {
            let d = dir.to_string_lossy();
            command.arg("-v");
            command.arg(format!("{d}:{d}"));
        }
        for path in &request.readonly_paths {
            let p = path.to_string_lossy();
            command.arg("-v");
            command.arg(format!("{p}:{p}:ro"));
        }
        for mount in &request.bind_mounts {
            let host = mount.host.to_string_lossy();
            let inner = mount.container.to_string_lossy();
            let suffix = if mount.writable { "" } else { ":ro" };
            command.arg("-v");
            command.arg(format!("{host}:{inner}{suffix}"));
        }

        for name in &request.env_whitelist {
            if let Ok(value) = std::env::var(name) {
                command.arg("-e");
                command.arg(format!("{name}={value}"));
            }
        }

        command.arg(Self::image());
        command.args(argv);
        command
    }
}

#[async_trait]
impl SandboxRuntime for ContainerRuntime {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn execute(
        &self,
        argv: &[String],
        request: &ExecutionRequest,
    ) -> Result<i32, SandboxError> {
        debug!(runtime = %self.binary, command = %argv.join(" "), "executing in container");
        let command = self.build_command(argv, request);
        run_with_timeout(command, request.timeout, "container").await
    }
}
