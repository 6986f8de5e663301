// Dangerous command pattern tables
// Substring and regex patterns consumed by the line scanner.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Severity;

/// System directory prefixes whose recursive deletion is always critical.
pub static SYSTEM_DIR_PREFIXES: &[&str] = &[
    "/bin", "/sbin", "/usr", "/etc", "/var", "/lib", "/opt", "/boot", "/root", "/sys", "/proc",
    "/dev", "/home",
];

/// A risky version-control operation. Entries are matched as substrings
/// against the lowercased line; the first match wins, so more specific
/// patterns must come before their prefixes (`--force-with-lease` before
/// `--force`).
pub struct VcsOperation {
    pub pattern: &'static str,
    pub severity: Severity,
    /// Force variants are elevated to critical when `block_force_vcs` is set.
    pub force: bool,
    pub description: &'static str,
    pub recommendation: &'static str,
}

pub static VCS_OPERATIONS: &[VcsOperation] = &[
    VcsOperation {
        pattern: "push --force-with-lease",
        severity: Severity::Medium,
        force: false,
        description: "Lease-guarded force push rewrites remote history",
        recommendation: "Confirm no collaborator pushed since your last fetch",
    },
    VcsOperation {
        pattern: "push --force",
        severity: Severity::High,
        force: true,
        description: "Force push overwrites remote history",
        recommendation: "Use --force-with-lease, or coordinate with the branch owners",
    },
    VcsOperation {
        pattern: "push -f",
        severity: Severity::High,
        force: true,
        description: "Force push overwrites remote history",
        recommendation: "Use --force-with-lease, or coordinate with the branch owners",
    },
    VcsOperation {
        pattern: "push --delete",
        severity: Severity::High,
        force: true,
        description: "Deletes a remote branch",
        recommendation: "Verify the branch is merged or archived before deleting",
    },
    VcsOperation {
        pattern: "reset --hard",
        severity: Severity::High,
        force: true,
        description: "Hard reset discards uncommitted work",
        recommendation: "Stash or commit local changes first",
    },
    VcsOperation {
        pattern: "clean -fdx",
        severity: Severity::High,
        force: true,
        description: "Aggressive clean removes untracked and ignored files",
        recommendation: "Run with -n first to preview what will be deleted",
    },
    VcsOperation {
        pattern: "clean -fd",
        severity: Severity::High,
        force: true,
        description: "Clean removes untracked files and directories",
        recommendation: "Run with -n first to preview what will be deleted",
    },
    VcsOperation {
        pattern: "clean -f",
        severity: Severity::Medium,
        force: true,
        description: "Clean removes untracked files",
        recommendation: "Run with -n first to preview what will be deleted",
    },
    VcsOperation {
        pattern: "branch -D",
        severity: Severity::High,
        force: true,
        description: "Force branch delete discards unmerged commits",
        recommendation: "Check the branch is merged, or use -d",
    },
    VcsOperation {
        pattern: "filter-branch",
        severity: Severity::High,
        force: true,
        description: "History rewrite across the whole repository",
        recommendation: "Back up the repository and coordinate with all clones",
    },
    VcsOperation {
        pattern: "filter-repo",
        severity: Severity::High,
        force: true,
        description: "History rewrite across the whole repository",
        recommendation: "Back up the repository and coordinate with all clones",
    },
    VcsOperation {
        pattern: "reflog expire",
        severity: Severity::Medium,
        force: true,
        description: "Expiring the reflog removes recovery points",
        recommendation: "Keep the reflog until you are sure nothing needs recovering",
    },
    VcsOperation {
        pattern: "gc --prune=now",
        severity: Severity::Medium,
        force: false,
        description: "Immediate prune removes unreachable objects",
        recommendation: "Let the default grace period expire instead",
    },
    VcsOperation {
        pattern: "stash clear",
        severity: Severity::Medium,
        force: false,
        description: "Clears every stash entry",
        recommendation: "List stashes and drop them individually",
    },
    VcsOperation {
        pattern: "stash drop",
        severity: Severity::Medium,
        force: false,
        description: "Drops a stash entry",
        recommendation: "Inspect the stash with `git stash show` first",
    },
    VcsOperation {
        pattern: "update-ref -d",
        severity: Severity::High,
        force: true,
        description: "Deletes a ref directly",
        recommendation: "Prefer porcelain commands that keep the reflog",
    },
];

/// Database client tokens that mark a line as a database operation.
pub static DB_CLIENTS: &[&str] = &[
    "mysql",
    "mariadb",
    "psql",
    "pg_dump",
    "sqlite3",
    "sqlite",
    "mongosh",
    "mongo",
    "redis-cli",
    "cqlsh",
    "clickhouse-client",
];

/// Destructive SQL/NoSQL phrases, matched against the lowercased line.
pub static DESTRUCTIVE_SQL: &[&str] = &[
    "drop database",
    "drop table",
    "drop schema",
    "drop index",
    "truncate",
    "delete from",
    "update ",
    "alter table",
    "grant all",
    "revoke",
    "dropdatabase()",
    "deletemany",
    "drop()",
    "flushall",
    "flushdb",
];

/// Sensitive environment-variable references whose exposure is critical.
pub static SENSITIVE_ENV_PATTERNS: &[&str] = &[
    "$password",
    "$passwd",
    "$secret",
    "$token",
    "$api_key",
    "$apikey",
    "$aws_secret",
    "$aws_access_key",
    "$private_key",
    "$db_password",
    "$database_url",
    "$github_token",
    "${password}",
    "${secret}",
    "${token}",
    "${api_key}",
];

/// Commands that read file contents, used for dotenv detection.
pub static FILE_READ_COMMANDS: &[&str] = &[
    "cat ", "head ", "tail ", "less ", "more ", "grep ", "awk ", "sed ", "strings ", "xxd ", "od ",
];

/// Deploy/ops verbs that put a production keyword "in context".
pub static DEPLOY_CONTEXT_TOKENS: &[&str] = &[
    "export", "kubectl", "docker", "helm", "aws", "gcloud", "az ", "curl", "wget", "ssh", "scp",
    "rsync", "terraform", "ansible", "systemctl", "database", "deploy", "psql", "mysql",
];

/// Download piped straight into a shell.
pub static PIPE_TO_SHELL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(curl|wget)[^|]*\|\s*(sudo\s+)?(bash|sh|zsh|fish)").expect("valid regex")
});

/// Output redirection into the password or shadow database.
pub static SYSTEM_FILE_WRITE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r">>?\s*/etc/(passwd|shadow)").expect("valid regex"));

/// Raw script download over HTTP(S) without an obvious pipe.
pub static SCRIPT_DOWNLOAD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(curl|wget)\s+[^|]*https?://\S+\.(sh|bash|py|pl|rb)\b").expect("valid regex")
});

/// Reverse-shell idioms: socket construction plus fd duplication into a
/// shell, netcat exec flags, or the /dev/tcp redirect trick.
pub static REVERSE_SHELL_PATTERNS: &[&[&str]] = &[
    &["socket.socket", "dup2"],
    &["socket.socket", "/bin/sh"],
    &["socket.socket", "/bin/bash"],
    &["bash -i", "/dev/tcp/"],
    &["nc -e"],
    &["ncat -e"],
    &["mkfifo", "/bin/sh"],
];

/// The classic fork bomb, matched with all whitespace stripped.
pub const FORK_BOMB_COMPACT: &str = ":(){:|:&};:";
