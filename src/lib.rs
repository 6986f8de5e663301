//! cmdguard - Command-Execution Safety Guard
//!
//! This library intercepts shell commands before they run, classifies their
//! risk, and routes them to direct host execution, isolated sandbox
//! execution, or rejection, with an append-only audit trail of every
//! decision.
//!
//! # Core Modules
//!
//! - [`models`] - Core data types (Finding, GuardLevel, ExecutionDecision)
//! - [`analyzer`] - Static risk analysis with protected-path validation
//! - [`guard`] - Guard-level policy engine with auto context detection
//! - [`execution`] - Host vs. sandbox decision engine and host executor
//! - [`sandbox`] - Isolation backends and runtime selection
//! - [`trust`] - Persistent store of previously approved commands
//! - [`session`] - Append-only per-workspace command log
//! - [`metrics`] - Aggregate execution counters with rolling history
//! - [`backup`] - Soft-delete interception with restore and rotation
//! - [`pipeline`] - The end-to-end flow gluing the pieces together
//! - [`config`] - TOML configuration with validation
//! - [`logging`] - Structured logging with sensitive data redaction
//!
//! # Example
//!
//! ```no_run
//! use cmdguard::config::GuardConfig;
//! use cmdguard::pipeline::GuardPipeline;
//!
//! # fn main() -> anyhow::Result<()> {
//! let pipeline = GuardPipeline::new(
//!     GuardConfig::default(),
//!     std::env::current_dir()?,
//!     "example-agent",
//! );
//! let trust = pipeline.open_trust()?;
//! let evaluation = pipeline.evaluate("rm", &["-rf".into(), "/tmp/x".into()], &trust);
//! println!("mode: {}", evaluation.decision.mode);
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod backup;
pub mod config;
pub mod execution;
pub mod guard;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod roadmap;
pub mod sandbox;
pub mod session;
pub mod storage;
pub mod trust;

// Re-export commonly used types for convenience
pub use models::{
    AnalysisReport, ApprovedBy, CommandRecord, DetectionContext, ExecutionDecision, ExecutionMode,
    Finding, FindingCode, GuardLevel, NetworkMode, SandboxMode, SecurityLevel, Severity,
};

pub use analyzer::{check_protected_paths, ProtectedPathHit, ScriptAnalyzer};
pub use backup::{BackupEntry, BackupError, SoftDeleteManager};
pub use config::{ConfigError, ConfigManager, GuardConfig, PolicyConfig};
pub use guard::{GuardEngine, GuardVerdict};
pub use metrics::{ExecutionMetrics, MetricsCollector};
pub use pipeline::{exit_codes, Evaluation, GuardPipeline};
pub use sandbox::{Capabilities, EnvironmentKind, SandboxError, SandboxRuntime};
pub use session::{Session, SessionError, SessionRecorder};
pub use trust::{TrustEntry, TrustStore, TrustStoreError};
