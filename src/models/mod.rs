//! Core data types shared across the guard pipeline
//!
//! Findings, risk levels, guard levels, and execution decisions. These types
//! are part of the external contract: finding codes appear in session dumps
//! and exit diagnostics, so renaming a variant is a breaking change.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a detected risk, ordered from least to most dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric score used for risk accounting: low=0 .. critical=3.
    pub fn score(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    /// Escalate one level, saturating at critical.
    pub fn bumped(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Stable identifier for every risk the analyzer can detect.
///
/// The set is closed: codes may be added, but renaming or removing one is a
/// breaking change for anything consuming session logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingCode {
    DangerousDeleteRoot,
    DangerousDeleteHome,
    ForkBomb,
    SudoUsage,
    PipeToShell,
    SystemFileWrite,
    RiskyVcsOperation,
    DatabaseOperation,
    ProductionEnvironment,
    EnvAccess,
    SensitiveEnvAccess,
    DotenvFileRead,
    NonStandardExtension,
    NetworkScriptDownload,
    ReverseShell,
    PolicyDenylist,
}

impl FindingCode {
    /// Codes that force sandbox execution no matter what the configuration,
    /// trust store, or allowlist say. Adding a code here is a policy change;
    /// removing one is a breaking change.
    pub fn requires_sandbox(self) -> bool {
        matches!(
            self,
            Self::DangerousDeleteRoot
                | Self::DangerousDeleteHome
                | Self::ForkBomb
                | Self::SensitiveEnvAccess
                | Self::DotenvFileRead
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DangerousDeleteRoot => "DANGEROUS_DELETE_ROOT",
            Self::DangerousDeleteHome => "DANGEROUS_DELETE_HOME",
            Self::ForkBomb => "FORK_BOMB",
            Self::SudoUsage => "SUDO_USAGE",
            Self::PipeToShell => "PIPE_TO_SHELL",
            Self::SystemFileWrite => "SYSTEM_FILE_WRITE",
            Self::RiskyVcsOperation => "RISKY_VCS_OPERATION",
            Self::DatabaseOperation => "DATABASE_OPERATION",
            Self::ProductionEnvironment => "PRODUCTION_ENVIRONMENT",
            Self::EnvAccess => "ENV_ACCESS",
            Self::SensitiveEnvAccess => "SENSITIVE_ENV_ACCESS",
            Self::DotenvFileRead => "DOTENV_FILE_READ",
            Self::NonStandardExtension => "NON_STANDARD_EXTENSION",
            Self::NetworkScriptDownload => "NETWORK_SCRIPT_DOWNLOAD",
            Self::ReverseShell => "REVERSE_SHELL",
            Self::PolicyDenylist => "POLICY_DENYLIST",
        }
    }
}

impl fmt::Display for FindingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single detected risk. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub code: FindingCode,
    pub description: String,
    /// 1-based source line, or 0 for file-level findings.
    pub line: u32,
    pub recommendation: String,
}

impl Finding {
    pub fn new(
        severity: Severity,
        code: FindingCode,
        line: u32,
        description: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            code,
            description: description.into(),
            line,
            recommendation: recommendation.into(),
        }
    }
}

/// Result of a full analyzer pass over a script or command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub findings: Vec<Finding>,
}

impl AnalysisReport {
    /// Highest severity among the findings, or low when there are none.
    pub fn risk_level(&self) -> Severity {
        self.findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Low)
    }

    /// Whether any finding belongs to the mandatory-sandbox set.
    pub fn requires_sandbox(&self) -> bool {
        self.findings.iter().any(|f| f.code.requires_sandbox())
    }

    /// Compact "CODE:severity" summary strings, in finding order.
    pub fn summary(&self) -> Vec<String> {
        self.findings
            .iter()
            .map(|f| format!("{}:{}", f.code, f.severity))
            .collect()
    }
}

/// Discrete guard levels, ordered from most permissive to most strict.
/// `Auto` is synthetic and resolves to a concrete level from context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GuardLevel {
    Off,
    Low,
    #[default]
    Medium,
    High,
    Paranoid,
    Auto,
}

impl fmt::Display for GuardLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Paranoid => write!(f, "paranoid"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for GuardLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "paranoid" => Ok(Self::Paranoid),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown guard level: {other}")),
        }
    }
}

/// Environmental facts consumed by `auto` guard-level resolution.
///
/// Computed by the caller before invoking the guard engine; the core holds
/// no global state about the current branch or environment.
#[derive(Debug, Clone, Default)]
pub struct DetectionContext {
    pub command_text: String,
    pub vcs_branch: Option<String>,
    pub working_directory: PathBuf,
    pub environment: HashMap<String, String>,
}

/// Where a command is allowed to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Host,
    Sandbox,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Sandbox => write!(f, "sandbox"),
        }
    }
}

/// Sandbox routing policy from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    #[default]
    Auto,
    Always,
    Risky,
    Never,
}

/// Isolation strictness, mapped to concrete resource limits by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Permissive,
    #[default]
    Balanced,
    Strict,
    Paranoid,
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permissive => write!(f, "permissive"),
            Self::Balanced => write!(f, "balanced"),
            Self::Strict => write!(f, "strict"),
            Self::Paranoid => write!(f, "paranoid"),
        }
    }
}

/// Network access granted to a sandboxed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    None,
    #[default]
    Restricted,
    Full,
}

/// The execution decider's verdict for a single command. Immutable for the
/// duration of the execution it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDecision {
    pub mode: ExecutionMode,
    pub reason: String,
    pub risk_level: Severity,
    pub should_cache: bool,
    pub cache_key: Option<String>,
    pub security_level: SecurityLevel,
}

impl ExecutionDecision {
    pub fn host(reason: impl Into<String>, risk: Severity, security: SecurityLevel) -> Self {
        Self {
            mode: ExecutionMode::Host,
            reason: reason.into(),
            risk_level: risk,
            should_cache: false,
            cache_key: None,
            security_level: security,
        }
    }

    pub fn sandbox(reason: impl Into<String>, risk: Severity, security: SecurityLevel) -> Self {
        Self {
            mode: ExecutionMode::Sandbox,
            reason: reason.into(),
            risk_level: risk,
            should_cache: false,
            cache_key: None,
            security_level: security,
        }
    }
}

/// Who approved a command for execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovedBy {
    Policy,
    BypassEnvVar,
    TrustStore,
    UserInteractive,
}

impl fmt::Display for ApprovedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy => write!(f, "policy"),
            Self::BypassEnvVar => write!(f, "bypass_env_var"),
            Self::TrustStore => write!(f, "trust_store"),
            Self::UserInteractive => write!(f, "user_interactive"),
        }
    }
}

/// One intercepted command as recorded in a session log. Append-only: past
/// records are never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRecord {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub args: Vec<String>,
    pub risk_level: Severity,
    pub findings_summary: Vec<String>,
    pub approved: bool,
    pub approved_by: ApprovedBy,
}

impl CommandRecord {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        report: &AnalysisReport,
        approved: bool,
        approved_by: ApprovedBy,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            command: command.into(),
            args,
            risk_level: report.risk_level(),
            findings_summary: report.summary(),
            approved,
            approved_by,
        }
    }
}
