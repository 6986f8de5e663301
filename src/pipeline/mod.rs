//! End-to-end guard pipeline
//!
//! One intercepted command flows through: analyzer and protected-path
//! validator produce findings; the guard engine turns findings plus context
//! into an approval; the decider picks host or sandbox; the soft-delete
//! manager intercepts destructive deletes; the selected backend executes;
//! the session recorder and metrics collector absorb the outcome.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::analyzer::{check_protected_paths, ProtectedPathHit, ScriptAnalyzer};
use crate::backup::SoftDeleteManager;
use crate::config::GuardConfig;
use crate::execution::{self, run_on_host};
use crate::guard::{GuardEngine, GuardVerdict};
use crate::logging::Redaction;
use crate::metrics::{ExecutionRecord, MetricsCollector};
use crate::models::{
    AnalysisReport, ApprovedBy, CommandRecord, DetectionContext, ExecutionDecision, ExecutionMode,
};
use crate::sandbox::{self, ExecutionRequest, SandboxError};
use crate::session::SessionRecorder;
use crate::storage;
use crate::trust::TrustStore;

/// Exit status convention for the guard binary.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const DENIED: i32 = 2;
    pub const NO_BACKEND: i32 = 3;
    pub const BACKEND_FAILURE: i32 = 4;
    pub const TIMEOUT: i32 = 5;
    pub const SOFT_DELETE_FAILED: i32 = 6;
}

/// Everything the pipeline concluded about one command, before execution.
#[derive(Debug)]
pub struct Evaluation {
    pub report: AnalysisReport,
    pub protected: Option<ProtectedPathHit>,
    pub verdict: GuardVerdict,
    pub decision: ExecutionDecision,
}

/// The guard pipeline for one workspace.
pub struct GuardPipeline {
    config: GuardConfig,
    workspace: PathBuf,
    analyzer: ScriptAnalyzer,
    engine: GuardEngine,
    agent: String,
}

impl GuardPipeline {
    pub fn new(config: GuardConfig, workspace: PathBuf, agent: impl Into<String>) -> Self {
        let engine = GuardEngine::new(
            config.guard_level.clone(),
            config.policy.prod_env_keywords.clone(),
        );
        Self {
            config,
            workspace,
            analyzer: ScriptAnalyzer::new(),
            engine,
            agent: agent.into(),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Gather the environmental facts `auto` resolution needs. Read per
    /// invocation; the pipeline holds no global state.
    pub fn detection_context(&self, command_text: &str) -> DetectionContext {
        DetectionContext {
            command_text: command_text.to_string(),
            vcs_branch: current_branch(&self.workspace),
            working_directory: self.workspace.clone(),
            environment: std::env::vars().collect::<HashMap<String, String>>(),
        }
    }

    /// Open the workspace trust store.
    pub fn open_trust(&self) -> Result<TrustStore> {
        let path = storage::state_dir(&self.workspace)?.join("trust.json");
        TrustStore::open(path).context("failed to open trust store")
    }

    /// Run analysis and decision-making without executing anything.
    pub fn evaluate(&self, command: &str, args: &[String], trust: &TrustStore) -> Evaluation {
        let mut argv = vec![command.to_string()];
        argv.extend(args.iter().cloned());
        let command_text = argv.join(" ");

        let report = self
            .analyzer
            .analyze_command(command, args, &self.config.policy);
        let protected = check_protected_paths(&command_text, &self.config.policy.protected_dirs);

        let ctx = self.detection_context(&command_text);
        let mut verdict = self.engine.evaluate(&report, &ctx);

        // A protected-path hit is a hard block: no guard level and no bypass
        // may run a destructive command into a protected directory.
        if let Some(hit) = &protected {
            verdict.approved = false;
            verdict.approved_by = ApprovedBy::Policy;
            verdict.reason = format!(
                "destructive command targets protected path {} (prefix {})",
                hit.path, hit.prefix
            );
        }

        let decision = execution::decide(&argv, &report, &self.config, trust, &self.workspace);

        Evaluation {
            report,
            protected,
            verdict,
            decision,
        }
    }

    /// Evaluate, record, and execute one command. Returns the process exit
    /// code per the guard's exit status convention.
    pub async fn run(&self, command: &str, args: &[String], interactive: bool) -> Result<i32> {
        let mut argv = vec![command.to_string()];
        argv.extend(args.iter().cloned());
        let command_text = argv.join(" ");

        let mut trust = self.open_trust()?;
        let evaluation = self.evaluate(command, args, &trust);

        let trusted = trust.is_trusted(&command_text);
        let mut approved = evaluation.verdict.approved;
        let mut approved_by = if approved && trusted {
            ApprovedBy::TrustStore
        } else {
            evaluation.verdict.approved_by
        };

        // A denied command can still be approved interactively when the
        // operator allows bypasses, except for protected-path blocks.
        if !approved
            && interactive
            && evaluation.protected.is_none()
            && self.config.guard_level.allow_user_bypass
        {
            let prompt = format!("{} - run anyway?", evaluation.verdict.reason);
            let confirmed = dialoguer::Confirm::new()
                .with_prompt(prompt)
                .default(false)
                .interact()
                .unwrap_or(false);
            if confirmed {
                approved = true;
                approved_by = ApprovedBy::UserInteractive;
            }
        }

        let record = CommandRecord {
            timestamp: Utc::now(),
            command: Redaction::redact(&command_text),
            args: args.to_vec(),
            risk_level: evaluation.report.risk_level(),
            findings_summary: evaluation.report.summary(),
            approved,
            approved_by,
        };
        self.record_session(record);

        if !approved {
            info!(reason = %evaluation.verdict.reason, "command denied");
            return Ok(exit_codes::DENIED);
        }

        if trusted {
            if let Err(err) = trust.record_use(&command_text) {
                warn!(error = %err, "failed to update trust usage counters");
            }
        }

        let started = Instant::now();
        let mandatory = evaluation.report.requires_sandbox();

        // Soft-delete interception replaces host execution of destructive
        // deletes entirely.
        if evaluation.decision.mode == ExecutionMode::Host
            && self.config.soft_delete.enabled
            && SoftDeleteManager::is_destructive_delete(&argv)
        {
            return self.intercept_delete(&argv, &evaluation, started);
        }

        let (exit_code, runtime_name) = match evaluation.decision.mode {
            ExecutionMode::Host => match run_on_host(&argv).await {
                Ok(code) => (code, None),
                Err(err) => {
                    warn!(error = %err, "host execution failed");
                    (exit_codes::BACKEND_FAILURE, None)
                }
            },
            ExecutionMode::Sandbox => {
                match self.run_sandboxed(&argv, mandatory).await? {
                    SandboxOutcome::Finished { code, runtime } => (code, Some(runtime)),
                    SandboxOutcome::Failed(code) => (code, None),
                }
            }
        };

        self.record_metrics(ExecutionRecord {
            timestamp: Utc::now(),
            command: command.to_string(),
            mode: evaluation.decision.mode,
            runtime: runtime_name.map(str::to_string),
            risk_level: evaluation.decision.risk_level,
            cached: evaluation.decision.should_cache,
            duration_ms: started.elapsed().as_millis() as u64,
            exit_code,
        });

        Ok(exit_code)
    }

    async fn run_sandboxed(&self, argv: &[String], mandatory: bool) -> Result<SandboxOutcome> {
        let capabilities = sandbox::detect_capabilities();
        let environment = sandbox::detect_environment(&self.workspace);

        let runtime =
            match sandbox::select_runtime(self.config.sandbox.runtime, &capabilities, environment) {
                Ok(runtime) => runtime,
                Err(SandboxError::Unavailable(reason)) if !mandatory => {
                    // Best effort only: without a mandatory finding the
                    // command may still run on the host.
                    warn!(%reason, "no sandbox backend, falling back to host");
                    let code = run_on_host(argv)
                        .await
                        .unwrap_or(exit_codes::BACKEND_FAILURE);
                    return Ok(SandboxOutcome::Failed(code));
                }
                Err(err) => {
                    warn!(error = %err, "mandatory sandbox unsatisfiable");
                    return Ok(SandboxOutcome::Failed(exit_codes::NO_BACKEND));
                }
            };

        let request = ExecutionRequest::from_config(&self.config.sandbox, &self.workspace);
        let name = runtime.name();

        match runtime.execute(argv, &request).await {
            Ok(code) => Ok(SandboxOutcome::Finished {
                code,
                runtime: name,
            }),
            Err(SandboxError::Timeout(secs)) => {
                warn!(timeout_secs = secs, "sandbox execution timed out");
                Ok(SandboxOutcome::Failed(exit_codes::TIMEOUT))
            }
            Err(err) => {
                warn!(error = %err, "sandbox backend failed");
                Ok(SandboxOutcome::Failed(exit_codes::BACKEND_FAILURE))
            }
        }
    }

    fn intercept_delete(
        &self,
        argv: &[String],
        evaluation: &Evaluation,
        started: Instant,
    ) -> Result<i32> {
        let session_id = SessionRecorder::resume_active(&self.workspace)
            .ok()
            .flatten()
            .map(|r| r.session().id);

        let mut manager =
            SoftDeleteManager::open(&self.workspace, self.config.soft_delete.clone())?;

        let exit_code = match manager.soft_delete(argv, &self.workspace, session_id, &self.agent) {
            Ok(entry) => {
                info!(backup = %entry.id, files = entry.files.len(), "files moved to backup store");
                exit_codes::SUCCESS
            }
            Err(crate::backup::BackupError::NothingToDelete) => {
                // Nothing existed; the delete is a no-op, not a failure.
                exit_codes::SUCCESS
            }
            Err(err) => {
                warn!(error = %err, "soft delete failed, originals left in place");
                exit_codes::SOFT_DELETE_FAILED
            }
        };

        if exit_code == exit_codes::SUCCESS {
            if self.config.soft_delete.auto_cleanup {
                if let Err(err) = manager.cleanup() {
                    warn!(error = %err, "backup rotation failed");
                }
            }
            if self.config.soft_delete.auto_delete {
                if let Err(err) = manager.sweep_expired() {
                    warn!(error = %err, "backup sweep failed");
                }
            }
        }

        self.record_metrics(ExecutionRecord {
            timestamp: Utc::now(),
            command: argv.first().cloned().unwrap_or_default(),
            mode: ExecutionMode::Host,
            runtime: None,
            risk_level: evaluation.decision.risk_level,
            cached: false,
            duration_ms: started.elapsed().as_millis() as u64,
            exit_code,
        });

        Ok(exit_code)
    }

    fn record_session(&self, record: CommandRecord) {
        match SessionRecorder::resume_or_start(&self.workspace, &self.agent) {
            Ok(mut recorder) => {
                if let Err(err) = recorder.add_command(record) {
                    warn!(error = %err, "failed to record command in session");
                }
            }
            Err(err) => warn!(error = %err, "failed to open session"),
        }
    }

    fn record_metrics(&self, record: ExecutionRecord) {
        match MetricsCollector::open(&self.workspace) {
            Ok(mut collector) => {
                if let Err(err) = collector.record(record) {
                    warn!(error = %err, "failed to persist metrics");
                }
            }
            Err(err) => warn!(error = %err, "failed to open metrics"),
        }
    }
}

enum SandboxOutcome {
    Finished { code: i32, runtime: &'static str },
    Failed(i32),
}

/// Current git branch from `.git/HEAD`, without shelling out.
fn current_branch(workspace: &Path) -> Option<String> {
    let head = std::fs::read_to_string(workspace.join(".git").join("HEAD")).ok()?;
    head.trim()
        .strip_prefix("ref: refs/heads/")
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FindingCode, GuardLevel, SandboxMode, Severity};
    use tempfile::TempDir;

    fn pipeline(workspace: &TempDir, mutate: impl FnOnce(&mut GuardConfig)) -> GuardPipeline {
        let mut config = GuardConfig::default();
        config.guard_level.level = GuardLevel::Medium;
        mutate(&mut config);
        GuardPipeline::new(config, workspace.path().to_path_buf(), "test-agent")
    }

    #[test]
    fn critical_delete_is_denied_and_mandatory_sandboxed() {
        let ws = TempDir::new().unwrap();
        let pipeline = pipeline(&ws, |_| {});
        let trust = pipeline.open_trust().unwrap();

        let evaluation = pipeline.evaluate("rm", &["-r".into(), "/*".into()], &trust);

        assert!(!evaluation.verdict.approved);
        assert_eq!(evaluation.report.risk_level(), Severity::Critical);
        assert_eq!(evaluation.decision.mode, ExecutionMode::Sandbox);
        assert!(evaluation
            .decision
            .reason
            .starts_with("CRITICAL: Mandatory sandbox"));
    }

    #[test]
    fn protected_path_blocks_with_longest_prefix_in_reason() {
        let ws = TempDir::new().unwrap();
        let pipeline = pipeline(&ws, |config| {
            config.policy.protected_dirs =
                vec!["/".into(), "/etc".into(), "/usr".into(), "/bin".into()];
        });
        let trust = pipeline.open_trust().unwrap();

        let evaluation = pipeline.evaluate("rm", &["-rf".into(), "/etc/passwd".into()], &trust);

        assert!(!evaluation.verdict.approved);
        let hit = evaluation.protected.as_ref().unwrap();
        assert_eq!(hit.prefix, "/etc");
        assert!(evaluation.verdict.reason.contains("/etc"));
    }

    #[test]
    fn benign_command_is_approved_for_host() {
        let ws = TempDir::new().unwrap();
        let pipeline = pipeline(&ws, |_| {});
        let trust = pipeline.open_trust().unwrap();

        let evaluation = pipeline.evaluate("ls", &["-la".into()], &trust);

        assert!(evaluation.verdict.approved);
        assert!(evaluation.report.findings.is_empty());
        assert_eq!(evaluation.decision.mode, ExecutionMode::Host);
    }

    #[test]
    fn always_mode_routes_benign_commands_to_sandbox() {
        let ws = TempDir::new().unwrap();
        let pipeline = pipeline(&ws, |config| {
            config.sandbox.mode = SandboxMode::Always;
        });
        let trust = pipeline.open_trust().unwrap();

        let evaluation = pipeline.evaluate("ls", &[], &trust);
        assert_eq!(evaluation.decision.mode, ExecutionMode::Sandbox);
    }

    #[test]
    fn findings_summary_lands_in_session_record_shape() {
        let ws = TempDir::new().unwrap();
        let pipeline = pipeline(&ws, |_| {});
        let trust = pipeline.open_trust().unwrap();

        let evaluation = pipeline.evaluate("rm", &["-r".into(), "/*".into()], &trust);
        let summary = evaluation.report.summary();
        assert_eq!(summary, vec!["DANGEROUS_DELETE_ROOT:critical".to_string()]);
        assert!(evaluation
            .report
            .findings
            .iter()
            .any(|f| f.code == FindingCode::DangerousDeleteRoot));
    }

    #[tokio::test]
    async fn run_denies_critical_without_prompt() {
        let ws = TempDir::new().unwrap();
        let pipeline = pipeline(&ws, |config| {
            // No bypass: the denial must stand without an interactive prompt.
            config.guard_level.allow_user_bypass = false;
            config.guard_level.level = GuardLevel::Medium;
        });

        let code = pipeline
            .run("rm", &["-r".into(), "/*".into()], false)
            .await
            .unwrap();
        assert_eq!(code, exit_codes::DENIED);

        // The denial was recorded as a violation.
        let sessions = SessionRecorder::list(ws.path()).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].violations_count, 1);
        assert_eq!(sessions[0].commands.len(), 1);
        assert!(!sessions[0].commands[0].approved);
    }

    #[tokio::test]
    async fn run_executes_benign_command_on_host() {
        let ws = TempDir::new().unwrap();
        let pipeline = pipeline(&ws, |_| {});

        let code = pipeline.run("true", &[], false).await.unwrap();
        assert_eq!(code, exit_codes::SUCCESS);

        let collector = MetricsCollector::open(ws.path()).unwrap();
        assert_eq!(collector.metrics().total, 1);
        assert_eq!(collector.metrics().host_count, 1);
    }

    #[tokio::test]
    async fn run_soft_deletes_instead_of_removing() {
        let ws = TempDir::new().unwrap();
        let pipeline = pipeline(&ws, |_| {});

        let victim = ws.path().join("victim.txt");
        std::fs::write(&victim, "data").unwrap();

        let code = pipeline
            .run("rm", &["victim.txt".into()], false)
            .await
            .unwrap();
        assert_eq!(code, exit_codes::SUCCESS);
        assert!(!victim.exists());

        let manager =
            SoftDeleteManager::open(ws.path(), pipeline.config().soft_delete.clone()).unwrap();
        assert_eq!(manager.list().len(), 1);
    }

    #[test]
    fn branch_is_read_from_git_head() {
        let ws = TempDir::new().unwrap();
        let git = ws.path().join(".git");
        std::fs::create_dir(&git).unwrap();
        std::fs::write(git.join("HEAD"), "ref: refs/heads/feature/x\n").unwrap();

        assert_eq!(
            current_branch(ws.path()),
            Some("feature/x".to_string())
        );
    }
}
