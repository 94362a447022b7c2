use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn rfp_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("rfp");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    // Knowledge corpus with two categories
    let knowledge = root.join("knowledge");
    fs::create_dir_all(knowledge.join("compliance")).unwrap();
    fs::create_dir_all(knowledge.join("wins")).unwrap();
    fs::write(
        knowledge.join("compliance/veeva_policy.txt"),
        "All trials must use Veeva Vault for document management.\n\nSubmission packages follow FDA eCTD structure.",
    )
    .unwrap();
    fs::write(
        knowledge.join("wins/oncology_win.txt"),
        "Phase III oncology trial delivered across 40 countries with adaptive design and central imaging review.",
    )
    .unwrap();

    let config_content = format!(
        r#"[corpus]
root = "{root}/knowledge"
include_globs = ["**/*.txt", "**/*.md"]

[chunking]
chunk_size = 1000
chunk_overlap = 200

[index]
dir = "{root}/rag/vectorstore"

[retrieval]
top_k = 5
max_snippet_chars = 500

[audit]
log_path = "{root}/audit_log.jsonl"
"#,
        root = root.display()
    );

    let config_path = root.join("rfp.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_rfp(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = rfp_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run rfp binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_build_dry_run_counts_corpus() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rfp(&config_path, &["build", "--dry-run"]);
    assert!(success, "dry-run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("documents found: 2"));
    assert!(stdout.contains("estimated chunks: 2"));
}

#[test]
fn test_build_dry_run_with_limit() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_rfp(&config_path, &["build", "--dry-run", "--limit", "1"]);
    assert!(success);
    assert!(stdout.contains("documents found: 1"));
}

#[test]
fn test_build_requires_embedding_provider() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_rfp(&config_path, &["build"]);
    assert!(!success, "build should fail with disabled provider");
    assert!(
        stderr.contains("disabled"),
        "Should mention disabled provider, got: {}",
        stderr
    );
}

#[test]
fn test_query_without_index_reports_degraded_mode() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_rfp(&config_path, &["query", "Veeva Vault compliance"]);
    assert!(
        success,
        "query must degrade, not fail: stdout={}, stderr={}",
        stdout, stderr
    );
    assert!(
        stdout.contains("Retrieval disabled"),
        "Should report degraded mode, got: {}",
        stdout
    );
}

#[test]
fn test_query_empty_text() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_rfp(&config_path, &["query", ""]);
    assert!(success);
    assert!(stdout.contains("No results"));
}

#[test]
fn test_run_degrades_and_writes_audit_record() {
    let (tmp, config_path) = setup_test_env();

    let rfp_file = tmp.path().join("request.txt");
    fs::write(
        &rfp_file,
        "RFP Title: Phase III Oncology Trial Support\nClient: AstraZeneca\nBudget Range: $3.2M",
    )
    .unwrap();

    let (stdout, stderr, success) = run_rfp(&config_path, &["run", rfp_file.to_str().unwrap()]);
    assert!(success, "run must degrade, not crash: stderr={}", stderr);
    assert!(
        stdout.contains("ERROR: requirement extraction failed"),
        "Should surface the degraded extraction, got: {}",
        stdout
    );
    assert!(stdout.contains("audit appended to"));

    // One well-formed JSON line in the audit log.
    let log = fs::read_to_string(tmp.path().join("audit_log.jsonl")).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 1);
    let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record["tool_calls"], serde_json::json!(["extract_requirements"]));
    assert!(record["sources_cited"].as_array().unwrap().is_empty());
    assert!(record["run_id"].as_str().unwrap().starts_with("RFP-"));
}

#[test]
fn test_repeated_runs_append_to_audit_log() {
    let (tmp, config_path) = setup_test_env();

    let rfp_file = tmp.path().join("request.txt");
    fs::write(&rfp_file, "Some RFP text").unwrap();

    run_rfp(&config_path, &["run", rfp_file.to_str().unwrap()]);
    run_rfp(&config_path, &["run", rfp_file.to_str().unwrap()]);

    let log = fs::read_to_string(tmp.path().join("audit_log.jsonl")).unwrap();
    assert_eq!(log.lines().count(), 2);
    for line in log.lines() {
        let _: serde_json::Value = serde_json::from_str(line).expect("corrupt audit line");
    }
}

#[test]
fn test_audit_command_shows_recent_runs() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_rfp(&config_path, &["audit"]);
    assert!(success);
    assert!(stdout.contains("No audit records"));

    let rfp_file = tmp.path().join("request.txt");
    fs::write(&rfp_file, "Some RFP text").unwrap();
    run_rfp(&config_path, &["run", rfp_file.to_str().unwrap()]);

    let (stdout, _, success) = run_rfp(&config_path, &["audit", "--limit", "3"]);
    assert!(success);
    assert!(stdout.contains("RFP-"));
    assert!(stdout.contains("extract_requirements"));
}

#[test]
fn test_stats_reports_unbuilt_index() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_rfp(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:    2"));
    assert!(stdout.contains("NOT BUILT"));
    assert!(stdout.contains("Runs logged:  0"));
}

#[test]
fn test_fetch_without_remote_config_errors() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_rfp(&config_path, &["fetch"]);
    assert!(!success);
    assert!(
        stderr.contains("[remote]"),
        "Should point at missing remote config, got: {}",
        stderr
    );
}

#[test]
fn test_invalid_overlap_rejected() {
    let (tmp, config_path) = setup_test_env();

    let bad = fs::read_to_string(&config_path)
        .unwrap()
        .replace("chunk_overlap = 200", "chunk_overlap = 1000");
    let bad_path = tmp.path().join("bad.toml");
    fs::write(&bad_path, bad).unwrap();

    let (_, stderr, success) = run_rfp(&bad_path, &["stats"]);
    assert!(!success, "Config with overlap >= size must be rejected");
    assert!(stderr.contains("chunk_overlap"));
}

#[test]
fn test_missing_config_errors() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_rfp(&tmp.path().join("absent.toml"), &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
