//! Custom namespace backend
//!
//! Falls back to `unshare(1)` when bubblewrap is not installed: new mount,
//! PID, and (optionally) network namespaces with the caller mapped to root
//! inside. Filesystem isolation is weaker than bubblewrap's bind sandbox,
//! so this backend sits last in every preference order that has an
//! alternative.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::models::NetworkMode;

use super::bubblewrap::apply_memory_rlimit;
use super::{apply_env_whitelist, run_with_timeout, ExecutionRequest, SandboxError, SandboxRuntime};

pub struct NamespaceRuntime;

impl NamespaceRuntime {
    pub fn new() -> Self {
        Self
    }

    fn build_command(&self, argv: &[String], request: &ExecutionRequest) -> Command {
        let mut command = Command::new("unshare");
        command.args(["--map-root-user", "--mount", "--pid", "--fork"]);

        if request.limits.network == NetworkMode::None {
            command.arg("--net");
        }

        command.arg("--");
        command.args(argv);
        command.current_dir(&request.workspace);

        apply_env_whitelist(&mut command, &request.env_whitelist);
        apply_memory_rlimit(&mut command, request.limits.memory_bytes);
        command
    }
}

impl Default for NamespaceRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxRuntime for NamespaceRuntime {
    fn name(&self) -> &'static str {
        "namespace"
    }

    async fn execute(
        &self,
        argv: &[String],
        request: &ExecutionRequest,
    ) -> Result<i32, SandboxError> {
        debug!(command = %argv.join(" "), "executing under unshare namespaces");
        let command = self.build_command(argv, request);
        run_with_timeout(command, request.timeout, "namespace").await
    }
}
