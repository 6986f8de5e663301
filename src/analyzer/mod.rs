//! Static risk analysis of shell scripts and command lines
//!
//! The scanner walks a script line by line and runs a fixed sequence of
//! checks against each one. Every check emits at most one finding per line,
//! so for a given input and policy the finding multiset is deterministic:
//! rule order within a line is fixed, lines are visited in source order.
//!
//! Lines that invoke an interpreter with inline code are unwrapped by the
//! extractor registry and the inner command is re-analyzed as its own line,
//! attributed to the outer line number.

mod inline;
pub mod paths;
pub mod rules;

pub use inline::{default_extractors, InlineExtractor};
pub use paths::{check_protected_paths, ProtectedPathHit};

use std::path::Path;

use crate::config::PolicyConfig;
use crate::models::{AnalysisReport, Finding, FindingCode, Severity};

/// Bound on nested-language extraction so adversarial inputs cannot cause
/// unbounded work.
const MAX_EXTRACTION_DEPTH: usize = 4;

/// Line-oriented script analyzer.
pub struct ScriptAnalyzer {
    extractors: Vec<Box<dyn InlineExtractor>>,
}

impl Default for ScriptAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptAnalyzer {
    pub fn new() -> Self {
        Self {
            extractors: default_extractors(),
        }
    }

    /// Analyze a script file's content. The path is only consulted for the
    /// extension heuristic.
    pub fn analyze(&self, path: &Path, content: &str, policy: &PolicyConfig) -> AnalysisReport {
        let mut findings = Vec::new();

        if let Some(finding) = self.check_extension(path) {
            findings.push(finding);
        }

        self.scan_content(content, policy, &mut findings);
        AnalysisReport { findings }
    }

    /// Analyze a single command with arguments, synthesized into one line.
    /// No extension heuristic applies.
    pub fn analyze_command(
        &self,
        command: &str,
        args: &[String],
        policy: &PolicyConfig,
    ) -> AnalysisReport {
        let mut line = command.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(arg);
        }

        let mut findings = Vec::new();
        self.scan_content(&line, policy, &mut findings);
        AnalysisReport { findings }
    }

    fn scan_content(&self, content: &str, policy: &PolicyConfig, findings: &mut Vec<Finding>) {
        for (idx, raw_line) in content.lines().enumerate() {
            let line_no = (idx + 1) as u32;
            let line = raw_line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if policy.allowlist.iter().any(|p| line.contains(p.as_str())) {
                continue;
            }
            if let Some(pattern) = policy.denylist.iter().find(|p| line.contains(p.as_str())) {
                findings.push(Finding::new(
                    Severity::High,
                    FindingCode::PolicyDenylist,
                    line_no,
                    format!("Command matches denylist pattern '{pattern}'"),
                    "Remove the command or adjust the denylist",
                ));
                continue;
            }

            self.scan_line(line, line_no, 0, policy, findings);
        }
    }

    /// Run every rule against one line, then recurse into extracted inline
    /// code. Rule order here fixes the finding order within a line.
    fn scan_line(
        &self,
        line: &str,
        line_no: u32,
        depth: usize,
        policy: &PolicyConfig,
        findings: &mut Vec<Finding>,
    ) {
        let lower = line.to_lowercase();

        let checks = [
            check_dangerous_delete_root(&lower, line_no),
            check_dangerous_delete_home(&lower, line_no),
            check_fork_bomb(&lower, line_no),
            check_sudo(&lower, line_no),
            check_pipe_to_shell(&lower, line_no),
            check_system_file_write(&lower, line_no),
            // VCS flags are case-sensitive (-d vs -D), so this check reads
            // the original line.
            check_risky_vcs(line, line_no, policy),
            check_database_operation(&lower, line_no, policy),
            check_production_environment(&lower, line_no, policy),
            check_env_access(&lower, line_no),
            check_sensitive_env_access(&lower, line_no),
            check_dotenv_read(&lower, line_no),
            check_script_download(&lower, line_no),
            check_reverse_shell(&lower, line_no),
        ];
        findings.extend(checks.into_iter().flatten());

        if depth < MAX_EXTRACTION_DEPTH {
            for extractor in &self.extractors {
                for inner in extractor.extract(line) {
                    self.scan_line(&inner, line_no, depth + 1, policy, findings);
                }
            }
        }
    }

    fn check_extension(&self, path: &Path) -> Option<Finding> {
        let ext = path.extension()?.to_string_lossy();
        if ext == "sh" {
            return None;
        }
        Some(Finding::new(
            Severity::Low,
            FindingCode::NonStandardExtension,
            0,
            format!("Script has non-standard extension .{ext}"),
            "Shell scripts are expected to use the .sh extension",
        ))
    }
}

/// Targets of a recursive delete on this line, or empty when the line does
/// not contain one.
fn recursive_delete_targets(lower: &str) -> Vec<String> {
    let tokens: Vec<&str> = lower.split_whitespace().collect();
    let mut targets = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        let base = token.rsplit('/').next().unwrap_or(token);
        if base != "rm" {
            continue;
        }

        let mut recursive = false;
        for arg in &tokens[i + 1..] {
            if arg.starts_with("--") {
                if *arg == "--recursive" {
                    recursive = true;
                }
            } else if let Some(flags) = arg.strip_prefix('-') {
                if flags.contains('r') {
                    recursive = true;
                }
            } else {
                targets.push(arg.trim_matches('\'').trim_matches('"').to_string());
            }
        }

        if !recursive {
            targets.clear();
        }
        break;
    }

    targets
}

fn check_dangerous_delete_root(lower: &str, line_no: u32) -> Option<Finding> {
    for target in recursive_delete_targets(lower) {
        let is_root = target == "/" || target == "/*";
        let is_system_dir = rules::SYSTEM_DIR_PREFIXES.iter().any(|prefix| {
            target == *prefix
                || target == format!("{prefix}/")
                || target == format!("{prefix}/*")
        });
        if is_root || is_system_dir {
            return Some(Finding::new(
                Severity::Critical,
                FindingCode::DangerousDeleteRoot,
                line_no,
                format!("Recursive delete targets system path '{target}'"),
                "Never recursively delete system directories",
            ));
        }
    }
    None
}

fn check_dangerous_delete_home(lower: &str, line_no: u32) -> Option<Finding> {
    for target in recursive_delete_targets(lower) {
        if matches!(target.as_str(), "~" | "~/" | "~/*" | "$home" | "$home/" | "$home/*") {
            return Some(Finding::new(
                Severity::Critical,
                FindingCode::DangerousDeleteHome,
                line_no,
                "Recursive delete targets the home directory",
                "Delete specific files or directories instead of the whole home",
            ));
        }
    }
    None
}

fn check_fork_bomb(lower: &str, line_no: u32) -> Option<Finding> {
    let compact: String = lower.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.contains(rules::FORK_BOMB_COMPACT) {
        return Some(Finding::new(
            Severity::Critical,
            FindingCode::ForkBomb,
            line_no,
            "Fork bomb detected",
            "This command will exhaust system resources; do not run it",
        ));
    }
    None
}

fn check_sudo(lower: &str, line_no: u32) -> Option<Finding> {
    if lower.contains("sudo ") {
        return Some(Finding::new(
            Severity::Medium,
            FindingCode::SudoUsage,
            line_no,
            "Command runs with elevated privileges",
            "Verify the command needs root before approving",
        ));
    }
    None
}

fn check_pipe_to_shell(lower: &str, line_no: u32) -> Option<Finding> {
    if rules::PIPE_TO_SHELL_RE.is_match(lower) {
        return Some(Finding::new(
            Severity::High,
            FindingCode::PipeToShell,
            line_no,
            "Downloaded content is piped directly into a shell",
            "Download to a file, inspect it, then run it",
        ));
    }
    None
}

fn check_system_file_write(lower: &str, line_no: u32) -> Option<Finding> {
    if rules::SYSTEM_FILE_WRITE_RE.is_match(lower) {
        return Some(Finding::new(
            Severity::High,
            FindingCode::SystemFileWrite,
            line_no,
            "Output redirected into a system authentication file",
            "Use the platform's user management tools instead",
        ));
    }
    None
}

fn check_risky_vcs(line: &str, line_no: u32, policy: &PolicyConfig) -> Option<Finding> {
    if !policy.monitor_vcs_ops || !line.contains("git") {
        return None;
    }

    for op in rules::VCS_OPERATIONS {
        if !line.contains(op.pattern) {
            continue;
        }

        let mut severity = op.severity;
        if policy.block_force_vcs && op.force {
            severity = Severity::Critical;
        }
        if policy.detect_prod_env
            && policy
                .prod_env_keywords
                .iter()
                .any(|k| line.to_lowercase().contains(&k.to_lowercase()))
        {
            severity = severity.bumped();
        }

        return Some(Finding::new(
            severity,
            FindingCode::RiskyVcsOperation,
            line_no,
            op.description,
            op.recommendation,
        ));
    }
    None
}

fn check_database_operation(lower: &str, line_no: u32, policy: &PolicyConfig) -> Option<Finding> {
    if !rules::DB_CLIENTS.iter().any(|c| lower.contains(c)) {
        return None;
    }

    let destructive = rules::DESTRUCTIVE_SQL.iter().any(|p| lower.contains(p));
    if policy.only_destructive_sql && !destructive {
        return None;
    }

    let in_production = policy.detect_prod_env
        && policy
            .prod_env_keywords
            .iter()
            .any(|k| lower.contains(k.as_str()));

    let severity = match (destructive, in_production) {
        (true, true) => Severity::Critical,
        (_, true) => Severity::High,
        _ => Severity::Medium,
    };

    let description = if destructive {
        "Destructive database statement detected"
    } else {
        "Database client invocation detected"
    };

    Some(Finding::new(
        severity,
        FindingCode::DatabaseOperation,
        line_no,
        description,
        "Confirm the target database and take a backup first",
    ))
}

fn check_production_environment(lower: &str, line_no: u32, policy: &PolicyConfig) -> Option<Finding> {
    if !policy.detect_prod_env {
        return None;
    }

    for keyword in &policy.prod_env_keywords {
        let keyword = keyword.to_lowercase();
        if !lower.contains(&keyword) {
            continue;
        }

        let near_deploy_verb = rules::DEPLOY_CONTEXT_TOKENS
            .iter()
            .any(|t| lower.contains(t));
        let path_like = [
            format!("/{keyword}/"),
            format!("-{keyword}-"),
            format!(".{keyword}."),
            format!("@{keyword}"),
        ]
        .iter()
        .any(|form| lower.contains(form.as_str()));

        if near_deploy_verb || path_like {
            return Some(Finding::new(
                Severity::High,
                FindingCode::ProductionEnvironment,
                line_no,
                format!("Command references the production environment ('{keyword}')"),
                "Double-check the target environment before running",
            ));
        }
    }
    None
}

fn check_env_access(lower: &str, line_no: u32) -> Option<Finding> {
    let tokens: Vec<&str> = lower.split_whitespace().collect();
    let dumps_env = tokens.iter().any(|t| *t == "printenv")
        || tokens.first() == Some(&"env")
        || (tokens.contains(&"export") && tokens.contains(&"-p"));

    if dumps_env {
        return Some(Finding::new(
            Severity::High,
            FindingCode::EnvAccess,
            line_no,
            "Command dumps the process environment",
            "Environment dumps can leak credentials into logs",
        ));
    }
    None
}

fn check_sensitive_env_access(lower: &str, line_no: u32) -> Option<Finding> {
    if rules::SENSITIVE_ENV_PATTERNS
        .iter()
        .any(|p| lower.contains(p))
    {
        return Some(Finding::new(
            Severity::Critical,
            FindingCode::SensitiveEnvAccess,
            line_no,
            "Command references a sensitive environment variable",
            "Secrets must not appear in command lines or logs",
        ));
    }
    None
}

fn check_dotenv_read(lower: &str, line_no: u32) -> Option<Finding> {
    let reads_file = rules::FILE_READ_COMMANDS.iter().any(|c| lower.contains(c));
    if reads_file && (lower.contains(".env") || lower.contains("dotenv")) {
        return Some(Finding::new(
            Severity::Critical,
            FindingCode::DotenvFileRead,
            line_no,
            "Command reads a dotenv secrets file",
            "Access secrets through the deployment's secret manager",
        ));
    }
    None
}

fn check_script_download(lower: &str, line_no: u32) -> Option<Finding> {
    if rules::SCRIPT_DOWNLOAD_RE.is_match(lower) {
        return Some(Finding::new(
            Severity::High,
            FindingCode::NetworkScriptDownload,
            line_no,
            "Script downloaded from the network",
            "Pin the script to a reviewed copy or checksum",
        ));
    }
    None
}

fn check_reverse_shell(lower: &str, line_no: u32) -> Option<Finding> {
    for group in rules::REVERSE_SHELL_PATTERNS {
        if group.iter().all(|p| lower.contains(p)) {
            return Some(Finding::new(
                Severity::Critical,
                FindingCode::ReverseShell,
                line_no,
                "Reverse shell construction detected",
                "This command opens an interactive shell to a remote host",
            ));
        }
    }
    None
}
