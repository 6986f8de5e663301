//! Soft-delete, restore, and retention behavior against a real filesystem.

use std::fs;

use tempfile::TempDir;

use cmdguard::backup::SoftDeleteManager;
use cmdguard::config::SoftDeleteConfig;

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

#[test]
fn delete_then_restore_roundtrips_content_and_structure() {
    let ws = TempDir::new().unwrap();
    let project = ws.path().join("app");
    fs::create_dir_all(project.join("src")).unwrap();
    fs::write(project.join("src/main.rs"), "fn main() {}").unwrap();
    fs::write(project.join("README.md"), "# app").unwrap();

    let mut manager = SoftDeleteManager::open(ws.path(), SoftDeleteConfig::default()).unwrap();
    let entry = manager
        .soft_delete(&argv(&["rm", "-rf", "app"]), ws.path(), None, "agent")
        .unwrap();

    assert!(!project.exists(), "soft delete must remove the original");
    assert_eq!(entry.files.len(), 1);
    assert!(entry.files[0].is_directory);

    let report = manager.restore(&entry.id, None).unwrap();
    assert!(report.success());
    assert_eq!(
        fs::read_to_string(project.join("src/main.rs")).unwrap(),
        "fn main() {}"
    );
    assert_eq!(fs::read_to_string(project.join("README.md")).unwrap(), "# app");
}

#[cfg(unix)]
#[test]
fn restore_preserves_file_mode() {
    use std::os::unix::fs::PermissionsExt;

    let ws = TempDir::new().unwrap();
    let script = ws.path().join("deploy.sh");
    fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

    let mut manager = SoftDeleteManager::open(ws.path(), SoftDeleteConfig::default()).unwrap();
    let entry = manager
        .soft_delete(&argv(&["rm", "deploy.sh"]), ws.path(), None, "agent")
        .unwrap();

    manager.restore(&entry.id, None).unwrap();
    let mode = fs::metadata(&script).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
}

#[test]
fn vcs_backup_outlives_regular_backups_in_sweep() {
    let ws = TempDir::new().unwrap();
    let mut config = SoftDeleteConfig::default();
    config.auto_delete_after_days = 7;
    config.protect_vcs = true;

    fs::write(ws.path().join(".gitignore"), "target/").unwrap();
    fs::write(ws.path().join("notes.txt"), "n").unwrap();

    let (vcs_id, plain_id, metadata_path) = {
        let mut manager = SoftDeleteManager::open(ws.path(), config.clone()).unwrap();
        let vcs_entry = manager
            .soft_delete(&argv(&["rm", ".gitignore"]), ws.path(), None, "agent")
            .unwrap();
        let plain_entry = manager
            .soft_delete(&argv(&["rm", "notes.txt"]), ws.path(), None, "agent")
            .unwrap();
        assert!(vcs_entry.is_vcs_backup);
        assert!(!plain_entry.is_vcs_backup);
        (
            vcs_entry.id,
            plain_entry.id,
            manager.root().join("metadata.json"),
        )
    };

    // Backdate both backups to 10 days old: past the 7-day threshold but
    // inside the doubled 14-day VCS window.
    let backdated = (chrono::Utc::now() - chrono::Duration::days(10)).to_rfc3339();
    let mut doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&metadata_path).unwrap()).unwrap();
    for backup in doc["backups"].as_array_mut().unwrap() {
        backup["timestamp"] = serde_json::Value::String(backdated.clone());
    }
    fs::write(&metadata_path, serde_json::to_string(&doc).unwrap()).unwrap();

    let mut manager = SoftDeleteManager::open(ws.path(), config).unwrap();
    let swept = manager.sweep_expired().unwrap();

    assert_eq!(swept, 1);
    let remaining: Vec<&str> = manager.list().iter().map(|e| e.id.as_str()).collect();
    assert!(remaining.contains(&vcs_id.as_str()), "vcs backup kept");
    assert!(!remaining.contains(&plain_id.as_str()), "plain backup swept");
}

#[test]
fn rotation_keeps_newest_and_is_monotone() {
    let ws = TempDir::new().unwrap();
    let mut config = SoftDeleteConfig::default();
    config.max_backups = 3;

    let mut manager = SoftDeleteManager::open(ws.path(), config).unwrap();
    let mut ids = Vec::new();
    for i in 0..5 {
        let name = format!("file{i}.txt");
        fs::write(ws.path().join(&name), "x").unwrap();
        let entry = manager
            .soft_delete(&argv(&["rm", &name]), ws.path(), None, "agent")
            .unwrap();
        ids.push(entry.id);
    }

    let dropped = manager.cleanup().unwrap();
    assert_eq!(dropped.len(), 2);
    // The oldest two are the ones that went.
    assert!(dropped.contains(&ids[0]));
    assert!(dropped.contains(&ids[1]));

    // Their directories are gone, the survivors' remain.
    for id in &dropped {
        assert!(!manager.root().join(id).exists());
    }
    for id in &ids[2..] {
        assert!(manager.root().join(id).exists());
    }

    // A dropped backup is never re-created.
    assert!(manager.cleanup().unwrap().is_empty());
    assert_eq!(manager.list().len(), 3);
}

#[test]
fn failed_restore_target_leaves_backup_intact() {
    let ws = TempDir::new().unwrap();
    let file = ws.path().join("keep.txt");
    fs::write(&file, "original").unwrap();

    let mut manager = SoftDeleteManager::open(ws.path(), SoftDeleteConfig::default()).unwrap();
    let entry = manager
        .soft_delete(&argv(&["rm", "keep.txt"]), ws.path(), None, "agent")
        .unwrap();

    // Conflict at the destination: restore skips, backup still listed.
    fs::write(&file, "conflict").unwrap();
    let report = manager.restore(&entry.id, None).unwrap();
    assert!(!report.success());
    assert_eq!(manager.list().len(), 1);

    // Second attempt after the conflict is resolved succeeds.
    fs::remove_file(&file).unwrap();
    let report = manager.restore(&entry.id, None).unwrap();
    assert!(report.success());
    assert_eq!(fs::read_to_string(&file).unwrap(), "original");
}
