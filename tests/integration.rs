use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn scribe_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("scribe");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    fs::write(
        root.join("schedule.json"),
        r#"{ "shifts": [
            { "date": "2026-03-02", "label": "ED A1", "time": "0700-1500",
              "people": [ { "name": "Ana Ruiz", "role": "Scribe" },
                          { "name": "Dr. Lee", "role": "Attending" } ] },
            { "date": "03/02/2026", "label": "FT 1", "time": "11a-7p",
              "scribe": "Ben Ode" },
            { "date": "2026-03-03", "label": "Radiology", "time": "7a-3p" }
        ] }"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/scribe.sqlite"

[server]
bind = "127.0.0.1:0"

[auth]
session_secret = "0123456789abcdef0123456789abcdef"

[logging]
level = "warn"

[shifts.zone_groups]
"ED A1" = "Acute"
"FT 1" = "Fast Track"

[shifts.source]
kind = "file"
path = "{root}/schedule.json"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("scribe.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_scribe_env(config_path: &Path, args: &[&str], env: &[(&str, &str)]) -> (String, String, bool) {
    let binary = scribe_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("SCRIBE_PASSWORD")
        .envs(env.iter().copied())
        .output()
        .unwrap_or_else(|e| panic!("Failed to run scribe binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_scribe(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    run_scribe_env(config_path, args, &[])
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_scribe(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/scribe.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_scribe(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_scribe(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_scribe(&tmp.path().join("nope.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_sync_shifts_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    run_scribe(&config_path, &["init"]);

    let (stdout, stderr, success) = run_scribe(&config_path, &["sync-shifts"]);
    assert!(success, "sync failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("fetched 3, created 2"), "got: {}", stdout);
    assert!(stdout.contains("skipped 1"));

    let (stdout, _, success) = run_scribe(&config_path, &["sync-shifts"]);
    assert!(success);
    assert!(
        stdout.contains("created 0, updated 0, unchanged 2"),
        "second sync should not create rows, got: {}",
        stdout
    );

    let (stdout, _, success) = run_scribe(&config_path, &["shifts", "dedupe"]);
    assert!(success);
    assert!(stdout.contains("Removed 0 duplicate shift(s)"));
}

#[test]
fn test_sync_shifts_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    run_scribe(&config_path, &["init"]);

    let (stdout, _, success) = run_scribe(&config_path, &["sync-shifts", "--dry-run"]);
    assert!(success);
    assert!(stdout.starts_with("dry run:"));
    assert!(stdout.contains("created 2"));

    let (stdout, _, _) = run_scribe(&config_path, &["stats"]);
    assert!(stdout.contains("Shifts:      0"), "got: {}", stdout);
}

#[test]
fn test_shifts_reset_requires_yes() {
    let (_tmp, config_path) = setup_test_env();
    run_scribe(&config_path, &["init"]);
    run_scribe(&config_path, &["sync-shifts"]);

    let (_, stderr, success) = run_scribe(&config_path, &["shifts", "reset"]);
    assert!(!success);
    assert!(stderr.contains("--yes"));

    let (stdout, _, success) = run_scribe(&config_path, &["shifts", "reset", "--yes"]);
    assert!(success);
    assert!(stdout.contains("Deleted 2 shift(s)."));
}

#[test]
fn test_user_add_and_list() {
    let (_tmp, config_path) = setup_test_env();
    run_scribe(&config_path, &["init"]);

    let (stdout, stderr, success) = run_scribe_env(
        &config_path,
        &["user", "add", "--email", "Lead@Example.com", "--name", "Lead", "--role", "admin"],
        &[("SCRIBE_PASSWORD", "password123")],
    );
    assert!(success, "user add failed: {} {}", stdout, stderr);
    assert!(stdout.contains("Created ADMIN lead@example.com"));

    // Short password is rejected.
    let (_, stderr, success) = run_scribe(
        &config_path,
        &[
            "user", "add", "--email", "ed@example.com", "--name", "Ed", "--password", "short",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("at least 8 characters"));

    let (stdout, _, success) = run_scribe(&config_path, &["user", "list"]);
    assert!(success);
    assert!(stdout.contains("lead@example.com"));
    assert!(stdout.contains("ADMIN"));
    assert!(!stdout.contains("ed@example.com"));
}

#[test]
fn test_search_and_tree_on_empty_database() {
    let (_tmp, config_path) = setup_test_env();
    run_scribe(&config_path, &["init"]);

    let (stdout, _, success) = run_scribe(&config_path, &["search", "chest pain"]);
    assert!(success);
    assert!(stdout.contains("No results"));

    let (stdout, _, success) = run_scribe(&config_path, &["search", ""]);
    assert!(success, "Empty query should not fail");
    assert!(stdout.contains("No results"));

    let (stdout, _, success) = run_scribe(&config_path, &["tree"]);
    assert!(success);
    assert!(stdout.contains("No pages."));
}

#[tokio::test]
async fn test_search_and_tree_see_seeded_pages() {
    let (tmp, config_path) = setup_test_env();
    run_scribe(&config_path, &["init"]);

    let pool = scribe_hub::db::open(&tmp.path().join("data/scribe.sqlite"))
        .await
        .unwrap();
    let mut folder = scribe_hub::pages::NewPage::new(
        "Protocols",
        scribe_hub::models::PageType::Folder,
    );
    folder.icon = Some("📁".into());
    let folder = scribe_hub::pages::create_page(&pool, folder, None, 3)
        .await
        .unwrap();
    let mut sepsis =
        scribe_hub::pages::NewPage::new("Sepsis Bundle", scribe_hub::models::PageType::Procedure)
            .under(&folder.id);
    sepsis.content = serde_json::json!({
        "type": "doc",
        "content": [{ "type": "paragraph",
                      "content": [{ "type": "text", "text": "Lactate within one hour" }] }]
    });
    scribe_hub::pages::create_page(&pool, sepsis, None, 3)
        .await
        .unwrap();
    pool.close().await;

    let (stdout, _, success) = run_scribe(&config_path, &["tree"]);
    assert!(success);
    assert!(stdout.contains("📁 Protocols [folder] /protocols"));
    assert!(stdout.contains("  Sepsis Bundle [procedure] /sepsis-bundle"));

    let (stdout, _, success) = run_scribe(&config_path, &["search", "lactate", "--type", "procedure"]);
    assert!(success);
    assert!(stdout.contains("Sepsis Bundle"), "got: {}", stdout);

    let (stdout, _, _) = run_scribe(&config_path, &["search", "lactate", "--type", "wiki"]);
    assert!(stdout.contains("No results"));
}
