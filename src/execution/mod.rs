//! Execution-mode decision engine
//!
//! Given a command's findings and the active configuration, chooses host or
//! sandbox execution and computes the caching plan. The rules run in a fixed
//! order and the first one to fire wins. Rule 1 is absolute: a finding from
//! the mandatory-sandbox set routes to the sandbox no matter what the trust
//! store, allowlist, or `sandbox.enabled` say.

mod host;

pub use host::{run_on_host, HostError};

use std::path::Path;

use tracing::debug;

use crate::config::GuardConfig;
use crate::models::{
    AnalysisReport, ExecutionDecision, ExecutionMode, SandboxMode, SecurityLevel, Severity,
};
use crate::trust::TrustStore;

/// First tokens whose sandbox results are worth caching: package managers
/// and build tools with heavy dependency fetches.
const CACHEABLE_TOOLS: &[&str] = &[
    "npm", "yarn", "pnpm", "pip", "pip3", "cargo", "go", "apt", "apt-get", "brew", "mvn",
    "gradle", "make", "bundle", "composer", "gem",
];

/// (first token, subcommand) pairs recognized as networked installs.
const NETWORKED_INSTALLS: &[(&str, &[&str])] = &[
    ("npm", &["install", "i", "ci", "update"]),
    ("yarn", &["add", "install", "upgrade"]),
    ("pnpm", &["add", "install", "update"]),
    ("pip", &["install"]),
    ("pip3", &["install"]),
    ("cargo", &["install"]),
    ("go", &["get", "install"]),
    ("apt", &["install"]),
    ("apt-get", &["install"]),
    ("brew", &["install", "upgrade"]),
    ("mvn", &["install"]),
    ("gradle", &["build"]),
    ("composer", &["install", "require"]),
    ("gem", &["install"]),
];

/// Decide host vs. sandbox for one command.
pub fn decide(
    argv: &[String],
    report: &AnalysisReport,
    config: &GuardConfig,
    trust: &TrustStore,
    working_dir: &Path,
) -> ExecutionDecision {
    let command = argv.join(" ");
    let risk = report.risk_level();
    let security = config.sandbox.security_level;

    // Rule 1: mandatory sandbox. Ignores trust store, allowlist, and the
    // enabled flag.
    let mandatory: Vec<&str> = report
        .findings
        .iter()
        .filter(|f| f.code.requires_sandbox())
        .map(|f| f.code.as_str())
        .collect();
    if !mandatory.is_empty() {
        let mut decision = ExecutionDecision::sandbox(
            format!(
                "CRITICAL: Mandatory sandbox required for {}",
                mandatory.join(", ")
            ),
            risk,
            security,
        );
        apply_cache_plan(&mut decision, argv, config, working_dir);
        debug!(reason = %decision.reason, "mandatory sandbox");
        return decision;
    }

    // Rule 2: sandboxing disabled.
    if !config.sandbox.enabled {
        return ExecutionDecision::host("sandboxing disabled in config", risk, security);
    }

    // Rule 3: previously approved via the trust store.
    if trust.is_trusted(&command) {
        return ExecutionDecision::host("previously approved", risk, security);
    }

    // Rules 4 and 5: unconditional modes.
    match config.sandbox.mode {
        SandboxMode::Always => {
            let mut decision =
                ExecutionDecision::sandbox("always-sandbox mode enabled", risk, security);
            apply_cache_plan(&mut decision, argv, config, working_dir);
            return decision;
        }
        SandboxMode::Never => {
            return ExecutionDecision::host("sandbox mode set to never", risk, security);
        }
        SandboxMode::Auto | SandboxMode::Risky => {}
    }

    // Rule 6: allowlist, unless the risk is critical.
    if risk != Severity::Critical
        && config
            .policy
            .allowlist
            .iter()
            .any(|p| command.contains(p.as_str()))
    {
        return ExecutionDecision::host("matches allowlist pattern", risk, security);
    }

    // Rule 7: auto and risky modes.
    let wants_sandbox = match config.sandbox.mode {
        SandboxMode::Auto => risk >= Severity::Medium || is_networked_install(argv),
        SandboxMode::Risky => risk >= Severity::High,
        SandboxMode::Always | SandboxMode::Never => false,
    };

    if wants_sandbox {
        let reason = if is_networked_install(argv) && risk < Severity::Medium {
            "networked install isolated by default".to_string()
        } else {
            format!("risk level {risk} requires isolation")
        };
        let mut decision = ExecutionDecision::sandbox(reason, risk, security);
        apply_cache_plan(&mut decision, argv, config, working_dir);
        return decision;
    }

    // Rule 8: low risk falls through to the host, but only below the
    // paranoid security level. Paranoid keeps even clean commands isolated.
    if security == SecurityLevel::Paranoid {
        let mut decision = ExecutionDecision::sandbox(
            "paranoid security level isolates all commands",
            risk,
            security,
        );
        apply_cache_plan(&mut decision, argv, config, working_dir);
        return decision;
    }

    ExecutionDecision::host("low risk", risk, security)
}

/// Recognized package or build tool performing a dependency fetch.
pub fn is_networked_install(argv: &[String]) -> bool {
    let Some(first) = argv.first() else {
        return false;
    };
    let Some(second) = argv.get(1) else {
        return false;
    };
    NETWORKED_INSTALLS
        .iter()
        .any(|(tool, subcommands)| first == tool && subcommands.contains(&second.as_str()))
}

/// Sandbox results are cached when caching is enabled and either the mode is
/// `always` or the first token is a known package manager or build tool.
/// The key pairs the working directory basename with the tool name.
fn apply_cache_plan(
    decision: &mut ExecutionDecision,
    argv: &[String],
    config: &GuardConfig,
    working_dir: &Path,
) {
    if decision.mode != ExecutionMode::Sandbox || !config.sandbox.enable_cache {
        return;
    }

    let Some(first) = argv.first() else {
        return;
    };

    let tool_cacheable = CACHEABLE_TOOLS.contains(&first.as_str());
    if config.sandbox.mode == SandboxMode::Always || tool_cacheable {
        let dir_name = working_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        decision.should_cache = true;
        decision.cache_key = Some(format!("{dir_name}-{first}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Finding, FindingCode};
    use tempfile::TempDir;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    fn report_with(code: FindingCode, severity: Severity) -> AnalysisReport {
        AnalysisReport {
            findings: vec![Finding::new(severity, code, 1, "test", "test")],
        }
    }

    fn empty_trust(dir: &TempDir) -> TrustStore {
        TrustStore::open(dir.path().join("trust.json")).unwrap()
    }

    #[test]
    fn mandatory_code_overrides_everything() {
        let dir = TempDir::new().unwrap();
        let command = argv(&["rm", "-r", "/*"]);

        // Trust the exact command, allowlist it, disable sandboxing, and set
        // mode to never. None of it matters.
        let mut trust = empty_trust(&dir);
        trust.add("rm -r /*", None, "").unwrap();

        let mut config = GuardConfig::default();
        config.policy.allowlist.push("rm".to_string());
        config.sandbox.enabled = false;
        config.sandbox.mode = SandboxMode::Never;

        let report = report_with(FindingCode::DangerousDeleteRoot, Severity::Critical);
        let decision = decide(&command, &report, &config, &trust, dir.path());

        assert_eq!(decision.mode, ExecutionMode::Sandbox);
        assert!(decision.reason.starts_with("CRITICAL: Mandatory sandbox"));
    }

    #[test]
    fn sandbox_disabled_routes_to_host() {
        let dir = TempDir::new().unwrap();
        let mut config = GuardConfig::default();
        config.sandbox.enabled = false;

        let report = report_with(FindingCode::SudoUsage, Severity::Medium);
        let decision = decide(
            &argv(&["sudo", "ls"]),
            &report,
            &config,
            &empty_trust(&dir),
            dir.path(),
        );
        assert_eq!(decision.mode, ExecutionMode::Host);
        assert_eq!(decision.reason, "sandboxing disabled in config");
    }

    #[test]
    fn trusted_command_runs_on_host() {
        let dir = TempDir::new().unwrap();
        let mut trust = empty_trust(&dir);
        trust.add("npm install", None, "").unwrap();

        let decision = decide(
            &argv(&["npm", "install"]),
            &AnalysisReport::default(),
            &GuardConfig::default(),
            &trust,
            dir.path(),
        );
        assert_eq!(decision.mode, ExecutionMode::Host);
        assert_eq!(decision.reason, "previously approved");
    }

    #[test]
    fn always_mode_sandboxes_and_caches() {
        let dir = TempDir::new().unwrap();
        let mut config = GuardConfig::default();
        config.sandbox.mode = SandboxMode::Always;

        let decision = decide(
            &argv(&["ls", "-la"]),
            &AnalysisReport::default(),
            &config,
            &empty_trust(&dir),
            dir.path(),
        );
        assert_eq!(decision.mode, ExecutionMode::Sandbox);
        assert!(decision.should_cache);
        assert!(decision.cache_key.as_deref().unwrap().ends_with("-ls"));
    }

    #[test]
    fn never_mode_runs_on_host() {
        let dir = TempDir::new().unwrap();
        let mut config = GuardConfig::default();
        config.sandbox.mode = SandboxMode::Never;

        let report = report_with(FindingCode::PipeToShell, Severity::High);
        let decision = decide(
            &argv(&["curl", "x", "|", "sh"]),
            &report,
            &config,
            &empty_trust(&dir),
            dir.path(),
        );
        assert_eq!(decision.mode, ExecutionMode::Host);
    }

    #[test]
    fn allowlist_skips_sandbox_for_non_critical() {
        let dir = TempDir::new().unwrap();
        let mut config = GuardConfig::default();
        config.policy.allowlist.push("docker compose".to_string());

        let report = report_with(FindingCode::SudoUsage, Severity::Medium);
        let decision = decide(
            &argv(&["docker", "compose", "up"]),
            &report,
            &config,
            &empty_trust(&dir),
            dir.path(),
        );
        assert_eq!(decision.mode, ExecutionMode::Host);
        assert_eq!(decision.reason, "matches allowlist pattern");
    }

    #[test]
    fn auto_mode_sandboxes_medium_and_above() {
        let dir = TempDir::new().unwrap();
        let config = GuardConfig::default();

        for severity in [Severity::Medium, Severity::High] {
            let report = report_with(FindingCode::SudoUsage, severity);
            let decision = decide(
                &argv(&["sudo", "systemctl", "restart", "app"]),
                &report,
                &config,
                &empty_trust(&dir),
                dir.path(),
            );
            assert_eq!(decision.mode, ExecutionMode::Sandbox, "severity {severity}");
        }

        let decision = decide(
            &argv(&["ls"]),
            &AnalysisReport::default(),
            &config,
            &empty_trust(&dir),
            dir.path(),
        );
        assert_eq!(decision.mode, ExecutionMode::Host);
    }

    #[test]
    fn auto_mode_sandboxes_networked_installs() {
        let dir = TempDir::new().unwrap();
        let decision = decide(
            &argv(&["npm", "install", "leftpad"]),
            &AnalysisReport::default(),
            &GuardConfig::default(),
            &empty_trust(&dir),
            dir.path(),
        );
        assert_eq!(decision.mode, ExecutionMode::Sandbox);
        assert!(decision.should_cache, "package installs are cacheable");
    }

    #[test]
    fn risky_mode_only_sandboxes_high_and_critical() {
        let dir = TempDir::new().unwrap();
        let mut config = GuardConfig::default();
        config.sandbox.mode = SandboxMode::Risky;

        let report = report_with(FindingCode::SudoUsage, Severity::Medium);
        let decision = decide(
            &argv(&["sudo", "ls"]),
            &report,
            &config,
            &empty_trust(&dir),
            dir.path(),
        );
        assert_eq!(decision.mode, ExecutionMode::Host);

        let report = report_with(FindingCode::PipeToShell, Severity::High);
        let decision = decide(
            &argv(&["curl", "x", "|", "sh"]),
            &report,
            &config,
            &empty_trust(&dir),
            dir.path(),
        );
        assert_eq!(decision.mode, ExecutionMode::Sandbox);
    }

    #[test]
    fn paranoid_security_level_blocks_host_fallthrough() {
        let dir = TempDir::new().unwrap();
        let mut config = GuardConfig::default();
        config.sandbox.security_level = SecurityLevel::Paranoid;

        // Low risk, no findings, nothing trusted or allowlisted: every
        // earlier rule passes and the fallthrough must still sandbox.
        let decision = decide(
            &argv(&["ls", "-la"]),
            &AnalysisReport::default(),
            &config,
            &empty_trust(&dir),
            dir.path(),
        );
        assert_eq!(decision.mode, ExecutionMode::Sandbox);
        assert_eq!(decision.security_level, SecurityLevel::Paranoid);

        // Any non-paranoid level still falls through to the host.
        config.sandbox.security_level = SecurityLevel::Strict;
        let decision = decide(
            &argv(&["ls", "-la"]),
            &AnalysisReport::default(),
            &config,
            &empty_trust(&dir),
            dir.path(),
        );
        assert_eq!(decision.mode, ExecutionMode::Host);
        assert_eq!(decision.reason, "low risk");
    }

    #[test]
    fn expired_trust_entry_does_not_downgrade() {
        let dir = TempDir::new().unwrap();
        let mut trust = empty_trust(&dir);
        trust
            .add("npm install", Some(chrono::Duration::seconds(-5)), "")
            .unwrap();

        let decision = decide(
            &argv(&["npm", "install"]),
            &AnalysisReport::default(),
            &GuardConfig::default(),
            &trust,
            dir.path(),
        );
        assert_eq!(decision.mode, ExecutionMode::Sandbox);
    }
}
