//! Guard-level policy engine
//!
//! Maps findings plus an auto-detected execution context to an approval
//! decision. The engine is a pure function of its inputs: it never fails,
//! and it performs no I/O. The `auto` level resolves to a concrete level
//! from the detection context before the approval table is consulted.

use tracing::debug;

use crate::config::GuardLevelConfig;
use crate::models::{AnalysisReport, ApprovedBy, DetectionContext, GuardLevel, Severity};

/// Environment variables whose value `production` marks a production
/// context during `auto` resolution.
const ENV_MARKERS: &[&str] = &["ENV", "NODE_ENV", "APP_ENV"];

/// Deploy verbs that put a production keyword "in context" for `auto`
/// resolution, mirroring the analyzer's production heuristic.
const DEPLOY_VERBS: &[&str] = &[
    "deploy", "kubectl", "docker", "helm", "terraform", "aws", "gcloud", "ssh", "rsync",
    "systemctl",
];

/// Result of a guard evaluation.
#[derive(Debug, Clone)]
pub struct GuardVerdict {
    pub approved: bool,
    pub approved_by: ApprovedBy,
    /// The concrete level the decision was made under (never `auto`).
    pub effective_level: GuardLevel,
    pub reason: String,
}

/// Guard-level engine.
pub struct GuardEngine {
    config: GuardLevelConfig,
    prod_keywords: Vec<String>,
}

impl GuardEngine {
    pub fn new(config: GuardLevelConfig, prod_keywords: Vec<String>) -> Self {
        Self {
            config,
            prod_keywords,
        }
    }

    /// Resolve `auto` to a concrete level from the detection context.
    /// Multiple signals combine with most-dangerous-wins.
    pub fn resolve_level(&self, ctx: &DetectionContext) -> GuardLevel {
        if self.config.level != GuardLevel::Auto {
            return self.config.level;
        }

        let mut level = GuardLevel::Medium;

        if let Some(branch) = &ctx.vcs_branch {
            if self
                .config
                .production_branches
                .iter()
                .any(|b| b.eq_ignore_ascii_case(branch))
            {
                level = GuardLevel::Paranoid;
            }
        }

        let command = ctx.command_text.to_lowercase();
        let keyword_in_deploy_context = self
            .prod_keywords
            .iter()
            .any(|k| command.contains(&k.to_lowercase()))
            && DEPLOY_VERBS.iter().any(|v| command.contains(v));
        if keyword_in_deploy_context {
            level = GuardLevel::Paranoid;
        }

        let production_env = ENV_MARKERS.iter().any(|marker| {
            ctx.environment
                .get(*marker)
                .map(|v| v.eq_ignore_ascii_case("production"))
                .unwrap_or(false)
        });
        if production_env {
            level = GuardLevel::Paranoid;
        }

        debug!(resolved = %level, "auto guard level resolved");
        level
    }

    /// Evaluate the approval table for a finding set under the effective
    /// level, honoring the bypass environment variable when permitted.
    pub fn evaluate(&self, report: &AnalysisReport, ctx: &DetectionContext) -> GuardVerdict {
        let level = self.resolve_level(ctx);
        let severity = report.risk_level();
        let has_findings = !report.findings.is_empty();

        let approved = match level {
            GuardLevel::Off => true,
            GuardLevel::Low => severity != Severity::Critical,
            GuardLevel::Medium => severity < Severity::High,
            GuardLevel::High => severity == Severity::Low,
            GuardLevel::Paranoid => !has_findings && severity == Severity::Low,
            // resolve_level never returns Auto.
            GuardLevel::Auto => unreachable!("auto resolves to a concrete level"),
        };

        if approved {
            return GuardVerdict {
                approved: true,
                approved_by: ApprovedBy::Policy,
                effective_level: level,
                reason: format!("risk {severity} permitted at guard level {level}"),
            };
        }

        if self.bypass_active(ctx) {
            return GuardVerdict {
                approved: true,
                approved_by: ApprovedBy::BypassEnvVar,
                effective_level: level,
                reason: format!(
                    "risk {severity} denied at guard level {level}, overridden by {}",
                    self.config.bypass_env_var
                ),
            };
        }

        GuardVerdict {
            approved: false,
            approved_by: ApprovedBy::Policy,
            effective_level: level,
            reason: format!("risk {severity} rejected at guard level {level}"),
        }
    }

    fn bypass_active(&self, ctx: &DetectionContext) -> bool {
        self.config.allow_user_bypass
            && ctx
                .environment
                .get(&self.config.bypass_env_var)
                .map(|v| !v.is_empty())
                .unwrap_or(false)
    }
}
