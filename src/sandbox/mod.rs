//! Sandbox runtime selection and execution
//!
//! Three isolation backends share one operational contract: execute an argv
//! in its own process group under the resource limits derived from the
//! configured security level, with the workspace and cache directories bound
//! read-write and everything else read-only or absent. The selector probes
//! what the machine can actually do and picks a backend based on whether we
//! are on a developer workstation, in CI, or in production.

mod bubblewrap;
mod container;
mod namespace;

pub use bubblewrap::BubblewrapRuntime;
pub use container::ContainerRuntime;
pub use namespace::NamespaceRuntime;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::{BindMount, RuntimeChoice, SandboxConfig};
use crate::models::{NetworkMode, SecurityLevel};

/// Sandbox errors surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("no sandbox backend available: {0}")]
    Unavailable(String),

    #[error("failed to spawn sandboxed command via {backend}: {source}")]
    Spawn {
        backend: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for sandboxed command: {0}")]
    Wait(#[source] std::io::Error),

    #[error("sandboxed command timed out after {0} seconds")]
    Timeout(u64),
}

/// Concrete resource knobs derived from a security level.
#[derive(Debug, Clone)]
pub struct ResourceLimits {
    pub network: NetworkMode,
    pub readonly_root: bool,
    pub memory_bytes: u64,
    pub cpu_limit: f32,
    pub drop_all_caps: bool,
    /// Capabilities re-added after dropping all; empty means none.
    pub retained_caps: &'static [&'static str],
}

const MIB: u64 = 1024 * 1024;

/// Minimal capability set for balanced and strict levels: enough to chown
/// and kill within the sandbox, nothing that reaches the host.
const MINIMAL_CAPS: &[&str] = &["CAP_CHOWN", "CAP_DAC_OVERRIDE", "CAP_FOWNER", "CAP_KILL"];

impl ResourceLimits {
    pub fn for_level(level: SecurityLevel) -> Self {
        match level {
            SecurityLevel::Permissive => Self {
                network: NetworkMode::Full,
                readonly_root: false,
                memory_bytes: 2048 * MIB,
                cpu_limit: 2.0,
                drop_all_caps: false,
                retained_caps: &[],
            },
            SecurityLevel::Balanced => Self {
                network: NetworkMode::Restricted,
                readonly_root: false,
                memory_bytes: 1024 * MIB,
                cpu_limit: 1.0,
                drop_all_caps: true,
                retained_caps: MINIMAL_CAPS,
            },
            SecurityLevel::Strict => Self {
                network: NetworkMode::Restricted,
                readonly_root: true,
                memory_bytes: 512 * MIB,
                cpu_limit: 0.5,
                drop_all_caps: true,
                retained_caps: MINIMAL_CAPS,
            },
            SecurityLevel::Paranoid => Self {
                network: NetworkMode::None,
                readonly_root: true,
                memory_bytes: 256 * MIB,
                cpu_limit: 0.25,
                drop_all_caps: true,
                retained_caps: &[],
            },
        }
    }
}

/// Everything a backend needs to run one command.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub limits: ResourceLimits,
    pub timeout: Duration,
    pub workspace: PathBuf,
    pub cache_dirs: Vec<PathBuf>,
    pub readonly_paths: Vec<PathBuf>,
    pub bind_mounts: Vec<BindMount>,
    pub env_whitelist: Vec<String>,
}

impl ExecutionRequest {
    /// Build a request from configuration for a given workspace.
    pub fn from_config(config: &SandboxConfig, workspace: &Path) -> Self {
        let mut limits = ResourceLimits::for_level(config.security_level);
        // An explicit network setting narrows (never widens) the level's
        // default.
        if !config.allow_network {
            limits.network = NetworkMode::None;
        } else if config.network_mode == NetworkMode::None {
            limits.network = NetworkMode::None;
        }

        Self {
            limits,
            timeout: Duration::from_secs(config.timeout_seconds),
            workspace: workspace.to_path_buf(),
            cache_dirs: config.cache_dirs.clone(),
            readonly_paths: config.readonly_paths.clone(),
            bind_mounts: config.bind_mounts.clone(),
            env_whitelist: config.env_whitelist.clone(),
        }
    }
}

/// Common contract for every isolation backend.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run argv isolated, returning the child's exit code.
    async fn execute(&self, argv: &[String], request: &ExecutionRequest)
        -> Result<i32, SandboxError>;
}

/// What this machine can isolate with.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub bubblewrap: bool,
    pub user_namespaces: bool,
    pub container_runtime: Option<String>,
    pub seccomp: bool,
    pub overlayfs: bool,
}

/// Probe the host for isolation capabilities.
pub fn detect_capabilities() -> Capabilities {
    let bubblewrap = which::which("bwrap").is_ok();
    let unshare = which::which("unshare").is_ok();
    let container_runtime = ["docker", "podman"]
        .iter()
        .find(|name| which::which(name).is_ok())
        .map(|name| name.to_string());

    let user_namespaces = unshare && unprivileged_userns_allowed();
    let seccomp = std::fs::read_to_string("/proc/self/status")
        .map(|s| s.contains("Seccomp:"))
        .unwrap_or(false);
    let overlayfs = std::fs::read_to_string("/proc/filesystems")
        .map(|s| s.contains("overlay"))
        .unwrap_or(false);

    Capabilities {
        bubblewrap,
        user_namespaces,
        container_runtime,
        seccomp,
        overlayfs,
    }
}

fn unprivileged_userns_allowed() -> bool {
    // Debian-family kernels gate this behind a sysctl; absence of the file
    // means the kernel has no such restriction.
    match std::fs::read_to_string("/proc/sys/kernel/unprivileged_userns_clone") {
        Ok(contents) => contents.trim() != "0",
        Err(_) => cfg!(target_os = "linux"),
    }
}

/// Where the guard is running, which drives backend preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentKind {
    Developer,
    Ci,
    Production,
}

impl std::fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Developer => write!(f, "developer"),
            Self::Ci => write!(f, "ci"),
            Self::Production => write!(f, "production"),
        }
    }
}

const CI_MARKERS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "JENKINS_URL",
    "CIRCLECI",
    "TRAVIS",
    "BUILDKITE",
    "TEAMCITY_VERSION",
];

/// Classify the execution environment: production beats CI beats developer.
pub fn detect_environment(workspace: &Path) -> EnvironmentKind {
    if std::env::var("CMDGUARD_ENV")
        .map(|v| v.eq_ignore_ascii_case("production"))
        .unwrap_or(false)
        || Path::new("/.dockerenv").exists()
    {
        return EnvironmentKind::Production;
    }

    if CI_MARKERS.iter().any(|m| std::env::var(m).is_ok()) {
        return EnvironmentKind::Ci;
    }

    if workspace.join(".git").exists() {
        return EnvironmentKind::Developer;
    }

    EnvironmentKind::Developer
}

/// Backend preference per environment. Developers get the fast helper
/// first; CI and production prefer the container runtime they already have.
fn preference_order(env: EnvironmentKind) -> [RuntimeChoice; 3] {
    match env {
        EnvironmentKind::Developer => [
            RuntimeChoice::Bubblewrap,
            RuntimeChoice::Namespace,
            RuntimeChoice::Container,
        ],
        EnvironmentKind::Ci | EnvironmentKind::Production => [
            RuntimeChoice::Container,
            RuntimeChoice::Bubblewrap,
            RuntimeChoice::Namespace,
        ],
    }
}

/// Materialize a backend. An explicit configured runtime overrides the
/// preference table but still fails if the backend is unavailable.
pub fn select_runtime(
    choice: RuntimeChoice,
    capabilities: &Capabilities,
    environment: EnvironmentKind,
) -> Result<Box<dyn SandboxRuntime>, SandboxError> {
    let build = |choice: RuntimeChoice| -> Option<Box<dyn SandboxRuntime>> {
        match choice {
            RuntimeChoice::Bubblewrap if capabilities.bubblewrap => {
                Some(Box::new(BubblewrapRuntime::new()))
            }
            RuntimeChoice::Namespace if capabilities.user_namespaces => {
                Some(Box::new(NamespaceRuntime::new()))
            }
            RuntimeChoice::Container => capabilities
                .container_runtime
                .clone()
                .map(|rt| Box::new(ContainerRuntime::new(rt)) as Box<dyn SandboxRuntime>),
            _ => None,
        }
    };

    if choice != RuntimeChoice::Auto {
        return build(choice).ok_or_else(|| {
            SandboxError::Unavailable(format!("configured runtime {choice:?} is not available"))
        });
    }

    for candidate in preference_order(environment) {
        if let Some(runtime) = build(candidate) {
            debug!(backend = runtime.name(), environment = %environment, "sandbox runtime selected");
            return Ok(runtime);
        }
    }

    Err(SandboxError::Unavailable(
        "no isolation backend detected (need bwrap, unshare, docker, or podman)".to_string(),
    ))
}

/// Spawn a prepared command in its own process group and enforce the
/// timeout. On expiry the whole group is killed and reaped; cancellation by
/// the caller behaves identically for accounting.
pub(crate) async fn run_with_timeout(
    mut command: Command,
    timeout: Duration,
    backend: &'static str,
) -> Result<i32, SandboxError> {
    #[cfg(unix)]
    command.process_group(0);
    command.kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|source| SandboxError::Spawn { backend, source })?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Ok(status.code().unwrap_or(-1)),
        Ok(Err(source)) => Err(SandboxError::Wait(source)),
        Err(_) => {
            warn!(backend, timeout_secs = timeout.as_secs(), "sandbox timeout, killing process group");
            terminate_group(&child);
            let _ = child.wait().await;
            Err(SandboxError::Timeout(timeout.as_secs()))
        }
    }
}

#[cfg(unix)]
fn terminate_group(child: &Child) {
    if let Some(pid) = child.id() {
        // The child leads its own process group, so the negative pid reaches
        // every descendant.
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn terminate_group(_child: &Child) {}

/// Populate only the whitelisted environment variables from the host.
pub(crate) fn apply_env_whitelist(command: &mut Command, whitelist: &[String]) {
    command.env_clear();
    for name in whitelist {
        if let Ok(value) = std::env::var(name) {
            command.env(name, value);
        }
    }
}
