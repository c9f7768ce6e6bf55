use assert_cmd::Command;
use predicates::str::contains;

fn boardsync() -> Command {
    let mut cmd = Command::cargo_bin("boardsync").expect("binary");
    cmd.env_remove("BOARDSYNC_ROOT").env_remove("RUST_LOG");
    cmd
}

#[test]
fn boardsync_help_works() {
    boardsync()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("GitHub Projects board"));
}

#[test]
fn subcommand_help_works() {
    for cmd in ["init", "sync", "push", "status", "validate"] {
        boardsync().arg(cmd).arg("--help").assert().success();
    }
}

#[test]
fn init_creates_board_layout() {
    let dir = tempfile::tempdir().expect("tempdir");

    boardsync()
        .args(["init", "--owner", "acme", "--repo", "web", "--project", "4", "--root"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(contains("initialized board"));

    assert!(dir.path().join(".boardsync.toml").is_file());
    assert!(dir.path().join(".boardsync").is_dir());
    assert!(dir.path().join("tasks").is_dir());

    let config = std::fs::read_to_string(dir.path().join(".boardsync.toml")).expect("config");
    assert!(config.contains("owner = \"acme\""));

    boardsync()
        .args(["init", "--root"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(contains("nothing to do"));
}

#[test]
fn init_json_envelope() {
    let dir = tempfile::tempdir().expect("tempdir");

    let output = boardsync()
        .args(["--json", "init", "--root"])
        .arg(dir.path())
        .output()
        .expect("run");
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["schema_version"], "boardsync.v1");
    assert_eq!(value["command"], "init");
    assert_eq!(value["status"], "success");
    assert_eq!(value["data"]["created"]["config"], true);
}

#[test]
fn sync_outside_a_board_is_a_user_error() {
    let dir = tempfile::tempdir().expect("tempdir");

    boardsync()
        .args(["sync", "--root"])
        .arg(dir.path())
        .assert()
        .code(2)
        .stderr(contains("boardsync init"));
}

#[test]
fn bad_filter_is_rejected_before_any_request() {
    let dir = tempfile::tempdir().expect("tempdir");
    boardsync()
        .args(["init", "--owner", "acme", "--repo", "web", "--project", "4", "--root"])
        .arg(dir.path())
        .assert()
        .success();

    boardsync()
        .args(["--json", "sync", "--filter", "assignee:me", "--root"])
        .arg(dir.path())
        .env("BOARDSYNC_TOKEN", "test-token")
        .env("GITHUB_TOKEN", "test-token")
        .assert()
        .code(2)
        .stdout(contains("invalid_argument"));
}

#[test]
fn missing_token_is_an_auth_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    boardsync()
        .args(["init", "--owner", "acme", "--repo", "web", "--project", "4", "--root"])
        .arg(dir.path())
        .assert()
        .success();

    boardsync()
        .args(["status", "--root"])
        .arg(dir.path())
        .env_remove("BOARDSYNC_TOKEN")
        .env_remove("GITHUB_TOKEN")
        .assert()
        .code(4)
        .stderr(contains("Authentication failed"));
}
