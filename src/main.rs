//! cmdguard - Command-execution safety guard CLI

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;

use cmdguard::config::{ConfigManager, GuardConfig};
use cmdguard::logging::{self, LogConfig};
use cmdguard::metrics::MetricsCollector;
use cmdguard::models::Severity;
use cmdguard::pipeline::{exit_codes, GuardPipeline};
use cmdguard::sandbox;
use cmdguard::session::SessionRecorder;
use cmdguard::{BackupError, SoftDeleteManager};

#[derive(Parser)]
#[command(
    name = "cmdguard",
    version,
    about = "Command-execution safety guard for developer and AI-agent workflows"
)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to the configuration file
    #[arg(long, global = true, env = "CMDGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Workspace directory (defaults to the current directory)
    #[arg(long, global = true, env = "CMDGUARD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Agent name recorded in sessions and backups
    #[arg(long, global = true, env = "CMDGUARD_AGENT", default_value = "cli")]
    agent: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a command or script and print the decision without executing
    Check {
        /// Analyze a script file instead of a command line
        #[arg(long, conflicts_with = "command")]
        script: Option<PathBuf>,

        /// Command and arguments to analyze
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Evaluate and execute a command through the guard
    Run {
        /// Offer an interactive prompt when the guard denies the command
        #[arg(short, long)]
        interactive: bool,

        /// Command and arguments to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Manage the trust store of previously approved commands
    Trust {
        #[command(subcommand)]
        action: TrustAction,
    },

    /// Inspect recorded sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Manage soft-delete backups
    Backups {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Show or reset execution metrics
    Metrics {
        #[command(subcommand)]
        action: MetricsAction,
    },

    /// Report sandbox capabilities and the backend that would be selected
    Doctor,
}

#[derive(Subcommand)]
enum TrustAction {
    /// Approve a command, optionally for a limited number of hours
    Add {
        /// Hours until the approval expires (never when omitted)
        #[arg(long)]
        ttl_hours: Option<i64>,

        /// Free-form note stored with the entry
        #[arg(long, default_value = "")]
        note: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// Remove a command's approval
    Remove {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
    /// List trust entries
    List,
    /// Drop expired entries
    Clean,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Show the active session, or a specific one by id
    Show {
        id: Option<uuid::Uuid>,
    },
    /// List all sessions for the workspace
    List,
    /// End the active session
    End,
}

#[derive(Subcommand)]
enum BackupAction {
    /// List backups, newest first
    List,
    /// Restore a backup to its original paths or into --target
    Restore {
        id: String,
        #[arg(long)]
        target: Option<PathBuf>,
    },
    /// Apply the retention bounds (age, count, total size)
    Cleanup,
    /// Permanently delete one backup
    Purge {
        id: String,
    },
    /// Permanently delete backups past the auto-delete threshold
    Sweep,
}

#[derive(Subcommand)]
enum MetricsAction {
    /// Print aggregate counters
    Show,
    /// Reset all counters and history
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = logging::init(&LogConfig::from_verbosity(cli.verbose)) {
        // A second init only happens in-process; keep going.
        tracing::debug!(error = %err, "logging already initialized");
    }

    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let workspace = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };

    let manager = match cli.config {
        Some(path) => ConfigManager::with_config_path(path)?,
        None => ConfigManager::new()?,
    };
    let config = manager.load()?;

    let pipeline = GuardPipeline::new(config.clone(), workspace.clone(), cli.agent.clone());

    match cli.command {
        Commands::Check { script, command } => check(&pipeline, &config, script, command),
        Commands::Run {
            interactive,
            command,
        } => {
            let (program, args) = command
                .split_first()
                .context("run requires a command")?;
            pipeline.run(program, args, interactive).await
        }
        Commands::Trust { action } => trust(&pipeline, action),
        Commands::Session { action } => session(&workspace, action),
        Commands::Backups { action } => backups(&workspace, &config, action),
        Commands::Metrics { action } => metrics(&workspace, action),
        Commands::Doctor => doctor(&workspace, &config),
    }
}

fn check(
    pipeline: &GuardPipeline,
    config: &GuardConfig,
    script: Option<PathBuf>,
    command: Vec<String>,
) -> Result<i32> {
    if let Some(path) = script {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read script {}", path.display()))?;
        let analyzer = cmdguard::ScriptAnalyzer::new();
        let report = analyzer.analyze(&path, &content, &config.policy);

        print_findings(&report.findings);
        println!("risk level: {}", severity_label(report.risk_level()));
        return Ok(if report.findings.is_empty() {
            exit_codes::SUCCESS
        } else {
            exit_codes::DENIED
        });
    }

    let (program, args) = match command.split_first() {
        Some(split) => split,
        None => bail!("check requires a command or --script"),
    };

    let trust = pipeline.open_trust()?;
    let evaluation = pipeline.evaluate(program, args, &trust);

    print_findings(&evaluation.report.findings);
    if let Some(hit) = &evaluation.protected {
        println!(
            "{} protected path {} (prefix {})",
            "blocked:".red().bold(),
            hit.path,
            hit.prefix
        );
    }

    let verdict_label = if evaluation.verdict.approved {
        "approved".green().bold()
    } else {
        "denied".red().bold()
    };
    println!(
        "verdict: {verdict_label} under guard level {} ({})",
        evaluation.verdict.effective_level, evaluation.verdict.reason
    );
    println!(
        "execution: {} ({})",
        evaluation.decision.mode, evaluation.decision.reason
    );

    Ok(if evaluation.verdict.approved {
        exit_codes::SUCCESS
    } else {
        exit_codes::DENIED
    })
}

fn trust(pipeline: &GuardPipeline, action: TrustAction) -> Result<i32> {
    let mut store = pipeline.open_trust()?;

    match action {
        TrustAction::Add {
            ttl_hours,
            note,
            command,
        } => {
            let command = command.join(" ");
            let ttl = ttl_hours.map(chrono::Duration::hours);
            store.add(&command, ttl, note)?;
            println!("trusted: {command}");
        }
        TrustAction::Remove { command } => {
            let command = command.join(" ");
            store.remove(&command)?;
            println!("removed: {command}");
        }
        TrustAction::List => {
            let entries = store.list();
            if entries.is_empty() {
                println!("trust store is empty");
            }
            for entry in entries {
                let expiry = entry
                    .expires_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}  uses={}  expires={}  {}",
                    &entry.hash[..16],
                    entry.use_count,
                    expiry,
                    entry.note
                );
            }
        }
        TrustAction::Clean => {
            let removed = store.clean_expired()?;
            println!("removed {removed} expired entries");
        }
    }

    Ok(exit_codes::SUCCESS)
}

fn session(workspace: &PathBuf, action: SessionAction) -> Result<i32> {
    match action {
        SessionAction::Show { id } => {
            let session = match id {
                Some(id) => SessionRecorder::load(workspace, id)?,
                None => match SessionRecorder::resume_active(workspace)? {
                    Some(recorder) => recorder.session().clone(),
                    None => bail!("no active session in this workspace"),
                },
            };

            println!(
                "session {} agent={} started={}",
                session.id,
                session.agent_name,
                session.started_at.to_rfc3339()
            );
            println!(
                "commands={} violations={} risk_score={:.1}",
                session.commands.len(),
                session.violations_count,
                session.risk_score
            );
            for record in &session.commands {
                let status = if record.approved {
                    "ok".green()
                } else {
                    "denied".red()
                };
                println!(
                    "  [{}] {} {} ({})",
                    record.timestamp.format("%H:%M:%S"),
                    status,
                    record.command,
                    record.findings_summary.join(", ")
                );
            }
        }
        SessionAction::List => {
            for session in SessionRecorder::list(workspace)? {
                let state = if session.ended_at.is_some() {
                    "ended"
                } else {
                    "active"
                };
                println!(
                    "{}  {}  {}  commands={} violations={}",
                    session.id,
                    state,
                    session.started_at.format("%Y-%m-%d %H:%M"),
                    session.commands.len(),
                    session.violations_count
                );
            }
        }
        SessionAction::End => match SessionRecorder::resume_active(workspace)? {
            Some(mut recorder) => {
                recorder.end()?;
                println!("session {} ended", recorder.session().id);
            }
            None => bail!("no active session in this workspace"),
        },
    }

    Ok(exit_codes::SUCCESS)
}

fn backups(workspace: &PathBuf, config: &GuardConfig, action: BackupAction) -> Result<i32> {
    let mut manager = SoftDeleteManager::open(workspace, config.soft_delete.clone())?;

    match action {
        BackupAction::List => {
            let entries = manager.list();
            if entries.is_empty() {
                println!("no backups");
            }
            for entry in entries {
                let vcs = if entry.is_vcs_backup { " [vcs]" } else { "" };
                println!(
                    "{}  {}  files={}  {}B{}  {}",
                    entry.id,
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.files.len(),
                    entry.total_size_bytes,
                    vcs,
                    entry.original_command
                );
            }
        }
        BackupAction::Restore { id, target } => {
            let report = manager.restore(&id, target.as_deref())?;
            for path in &report.restored {
                println!("restored {}", path.display());
            }
            for path in &report.skipped {
                println!("{} {} (already exists)", "skipped".yellow(), path.display());
            }
            if !report.success() {
                bail!("nothing was restored from backup {id}");
            }
        }
        BackupAction::Cleanup => {
            let dropped = manager.cleanup()?;
            println!("rotated out {} backups", dropped.len());
        }
        BackupAction::Purge { id } => match manager.delete_backup(&id) {
            Ok(()) => println!("purged {id}"),
            Err(BackupError::NotFound(id)) => bail!("backup {id} not found"),
            Err(err) => return Err(err.into()),
        },
        BackupAction::Sweep => {
            let swept = manager.sweep_expired()?;
            println!("permanently deleted {swept} expired backups");
        }
    }

    Ok(exit_codes::SUCCESS)
}

fn metrics(workspace: &PathBuf, action: MetricsAction) -> Result<i32> {
    let mut collector = MetricsCollector::open(workspace)?;

    match action {
        MetricsAction::Show => {
            let metrics = collector.metrics();
            println!("total executions: {}", metrics.total);
            println!("  host: {}", metrics.host_count);
            println!("  sandbox: {}", metrics.sandbox_count);
            println!("  cached: {}", metrics.cached_count);
            println!("  average duration: {:.1}ms", metrics.average_duration_ms);
            if !metrics.by_risk_level.is_empty() {
                println!("by risk level:");
                let mut levels: Vec<_> = metrics.by_risk_level.iter().collect();
                levels.sort();
                for (level, count) in levels {
                    println!("  {level}: {count}");
                }
            }
            if !metrics.by_runtime.is_empty() {
                println!("by runtime:");
                let mut runtimes: Vec<_> = metrics.by_runtime.iter().collect();
                runtimes.sort();
                for (runtime, count) in runtimes {
                    println!("  {runtime}: {count}");
                }
            }
        }
        MetricsAction::Reset => {
            collector.reset()?;
            println!("metrics reset");
        }
    }

    Ok(exit_codes::SUCCESS)
}

fn doctor(workspace: &PathBuf, config: &GuardConfig) -> Result<i32> {
    let capabilities = sandbox::detect_capabilities();
    let environment = sandbox::detect_environment(workspace);

    println!("environment: {environment}");
    println!("capabilities:");
    println!("  bubblewrap: {}", yes_no(capabilities.bubblewrap));
    println!("  user namespaces: {}", yes_no(capabilities.user_namespaces));
    println!(
        "  container runtime: {}",
        capabilities
            .container_runtime
            .as_deref()
            .unwrap_or("none")
    );
    println!("  seccomp: {}", yes_no(capabilities.seccomp));
    println!("  overlayfs: {}", yes_no(capabilities.overlayfs));

    match sandbox::select_runtime(config.sandbox.runtime, &capabilities, environment) {
        Ok(runtime) => {
            println!("selected backend: {}", runtime.name().green().bold());
            Ok(exit_codes::SUCCESS)
        }
        Err(err) => {
            println!("selected backend: {} ({err})", "none".red().bold());
            Ok(exit_codes::NO_BACKEND)
        }
    }
}

fn print_findings(findings: &[cmdguard::Finding]) {
    for finding in findings {
        let severity = severity_label(finding.severity);
        let line = if finding.line == 0 {
            "file".to_string()
        } else {
            format!("line {}", finding.line)
        };
        println!(
            "{severity} {} ({}) - {}",
            finding.code, line, finding.description
        );
        if !finding.recommendation.is_empty() {
            println!("         hint: {}", finding.recommendation);
        }
    }
}

fn severity_label(severity: Severity) -> colored::ColoredString {
    match severity {
        Severity::Low => "low     ".normal(),
        Severity::Medium => "medium  ".yellow(),
        Severity::High => "high    ".bright_red(),
        Severity::Critical => "critical".red().bold(),
    }
}

fn yes_no(value: bool) -> colored::ColoredString {
    if value {
        "yes".green()
    } else {
        "no".red()
    }
}
