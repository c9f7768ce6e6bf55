mod support;

use boardsync::conflict::Resolution;
use boardsync::memory::{FailKind, FailPoint, SeedIssue};
use boardsync::remote::{parse_filters, Filter};
use boardsync::sync::{PassOutcome, PullOptions};
use support::{ts, TestBoard};

fn pull_all() -> PullOptions {
    PullOptions::default()
}

#[tokio::test]
async fn pull_writes_one_file_per_item() {
    let board = TestBoard::new();
    board.remote().seed(
        SeedIssue::new("Fix login", ts(10, 0))
            .body("Users cannot log in.")
            .status("In Progress")
            .labels(&["bug", "priority:high", "ui"]),
    );
    board
        .remote()
        .seed(SeedIssue::new("Old chore", ts(9, 0)).closed());

    let result = board.engine.pull(&pull_all()).await.unwrap();
    assert!(result.is_clean());
    assert_eq!(result.created.len(), 2);
    assert_eq!(
        board.file_names(),
        vec!["owner-repo#1-fix-login.md", "owner-repo#2-old-chore.md"]
    );

    let (task, record) = board.read_task("owner-repo#1-fix-login.md");
    assert_eq!(task.title, "Fix login");
    assert_eq!(task.body, "Users cannot log in.");
    assert_eq!(task.state, "in-progress");
    assert_eq!(task.task_type.as_deref(), Some("bug"));
    assert_eq!(task.priority.as_deref(), Some("high"));
    assert!(task.tags.contains("ui"));
    let record = record.expect("sync record");
    assert_eq!(record.remote.issue_number, 1);
    assert_eq!(record.last_synced, ts(10, 0));
    assert!(!record.push_changes);

    let (closed, _) = board.read_task("owner-repo#2-old-chore.md");
    assert_eq!(closed.state, "done");

    let order = board.local().load_order().unwrap();
    assert!(order.position("in-progress", "owner-repo#1-fix-login.md").is_some());
}

#[tokio::test]
async fn second_pull_changes_nothing() {
    let board = TestBoard::new();
    board
        .remote()
        .seed(SeedIssue::new("Fix login", ts(10, 0)).labels(&["p1"]));
    board.remote().seed(SeedIssue::new("Write docs", ts(10, 5)));

    board.engine.pull(&pull_all()).await.unwrap();
    let before = board.snapshot();

    let result = board.engine.pull(&pull_all()).await.unwrap();
    assert!(result.created.is_empty());
    assert!(result.updated.is_empty());
    assert!(result.conflicts.is_empty());
    assert_eq!(board.snapshot(), before);
}

#[tokio::test]
async fn overlapping_filters_yield_each_item_once() {
    let board = TestBoard::new();
    board
        .remote()
        .seed(SeedIssue::new("Urgent and open", ts(10, 0)).labels(&["urgent"]));
    board.remote().seed(SeedIssue::new("Just open", ts(10, 0)));
    board
        .remote()
        .seed(SeedIssue::new("Urgent but closed", ts(10, 0)).labels(&["urgent"]).closed());
    board.remote().seed(SeedIssue::new("Closed", ts(10, 0)).closed());

    let options = PullOptions {
        filters: parse_filters(&["label:urgent", "is:open"]).unwrap(),
        ..PullOptions::default()
    };
    let result = board.engine.pull(&options).await.unwrap();

    assert_eq!(result.created.len(), 3);
    assert_eq!(board.file_names().len(), 3);
    assert!(!board.exists("owner-repo#4-closed.md"));
    assert_eq!(board.remote().fetch_calls(), 1);
}

#[tokio::test]
async fn status_filter_matches_column() {
    let board = TestBoard::new();
    board.remote().seed(SeedIssue::new("A", ts(10, 0)).status("Done"));
    board.remote().seed(SeedIssue::new("B", ts(10, 0)).status("Todo"));

    let options = PullOptions {
        filters: vec![Filter::Status("done".to_string())],
        ..PullOptions::default()
    };
    let result = board.engine.pull(&options).await.unwrap();
    assert_eq!(result.created.len(), 1);
    assert_eq!(board.file_names(), vec!["owner-repo#1-a.md"]);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let board = TestBoard::new();
    board.remote().seed(SeedIssue::new("Fix login", ts(10, 0)));
    let before = board.snapshot();

    let options = PullOptions {
        dry_run: true,
        ..PullOptions::default()
    };
    let result = board.engine.pull(&options).await.unwrap();

    assert!(result.dry_run);
    assert_eq!(result.created.len(), 1);
    assert_eq!(board.snapshot(), before);
    assert!(!board.storage().lock_file().exists());
}

#[tokio::test]
async fn remote_edit_refreshes_local_file() {
    let board = TestBoard::new();
    board.remote().seed(SeedIssue::new("Fix login", ts(10, 0)));
    board.engine.pull(&pull_all()).await.unwrap();
    let (before, _) = board.read_task("owner-repo#1-fix-login.md");

    board.remote().edit(1, ts(10, 30), |issue| {
        issue.body = "Now with steps to reproduce.".to_string();
        issue.status = Some("Done".to_string());
    });

    let result = board.engine.pull(&pull_all()).await.unwrap();
    assert_eq!(result.updated.len(), 1);
    assert!(result.conflicts.is_empty());

    let (task, record) = board.read_task("owner-repo#1-fix-login.md");
    assert_eq!(task.id, before.id);
    assert_eq!(task.created, before.created);
    assert_eq!(task.body, "Now with steps to reproduce.");
    assert_eq!(task.state, "done");
    assert_eq!(record.unwrap().last_synced, ts(10, 30));
}

#[tokio::test]
async fn conflict_without_push_flag_keeps_remote() {
    let board = TestBoard::new();
    board.remote().seed(SeedIssue::new("Fix login", ts(10, 0)));
    board.engine.pull(&pull_all()).await.unwrap();

    let name = "owner-repo#1-fix-login.md";
    let (mut task, record) = board.read_task(name);
    task.body = "local notes".to_string();
    task.updated = ts(11, 0);
    board.write_task(name, &task, record.as_ref());

    board.remote().edit(1, ts(10, 30), |issue| {
        issue.body = "remote notes".to_string();
    });

    let result = board.engine.pull(&pull_all()).await.unwrap();
    assert_eq!(result.conflicts.len(), 1);
    let conflict = &result.conflicts[0];
    assert_eq!(conflict.resolution, Resolution::RemoteWins);
    assert_eq!(conflict.local_updated, ts(11, 0));
    assert_eq!(conflict.remote_updated, ts(10, 30));
    assert_eq!(conflict.last_synced, ts(10, 0));

    let (task, _) = board.read_task(name);
    assert_eq!(task.body, "remote notes");
}

#[tokio::test]
async fn conflict_with_push_flag_keeps_local() {
    let board = TestBoard::new();
    board.remote().seed(SeedIssue::new("Fix login", ts(10, 0)));
    board.engine.pull(&pull_all()).await.unwrap();

    let name = "owner-repo#1-fix-login.md";
    let (mut task, record) = board.read_task(name);
    let mut record = record.unwrap();
    record.push_changes = true;
    task.body = "local notes".to_string();
    task.updated = ts(11, 0);
    board.write_task(name, &task, Some(&record));
    let before = board.contents(name);

    board.remote().edit(1, ts(10, 30), |issue| {
        issue.body = "remote notes".to_string();
    });

    let result = board.engine.pull(&pull_all()).await.unwrap();
    assert_eq!(result.conflicts[0].resolution, Resolution::LocalWins);
    assert_eq!(result.pending_push, vec![name.to_string()]);
    assert_eq!(board.contents(name), before);
}

#[tokio::test]
async fn local_only_edit_waits_for_push() {
    let board = TestBoard::new();
    board.remote().seed(SeedIssue::new("Fix login", ts(10, 0)));
    board.engine.pull(&pull_all()).await.unwrap();

    let name = "owner-repo#1-fix-login.md";
    let (mut task, record) = board.read_task(name);
    task.title = "Fix login on Safari".to_string();
    task.updated = ts(11, 0);
    board.write_task(name, &task, record.as_ref());

    let result = board.engine.pull(&pull_all()).await.unwrap();
    assert!(result.conflicts.is_empty());
    assert!(result.updated.is_empty());
    assert_eq!(result.pending_push, vec![name.to_string()]);
    assert_eq!(board.read_task(name).0.title, "Fix login on Safari");
}

#[tokio::test]
async fn deleted_file_is_not_recreated_without_force() {
    let board = TestBoard::new();
    board.remote().seed(SeedIssue::new("Fix login", ts(10, 0)));
    board.engine.pull(&pull_all()).await.unwrap();

    let name = "owner-repo#1-fix-login.md";
    std::fs::remove_file(board.path(name)).unwrap();

    let result = board.engine.pull(&pull_all()).await.unwrap();
    assert_eq!(result.missing_locally, vec![name.to_string()]);
    assert!(!board.exists(name));

    let forced = PullOptions {
        force: true,
        ..PullOptions::default()
    };
    let result = board.engine.pull(&forced).await.unwrap();
    assert_eq!(result.created.len(), 1);
    assert!(board.exists(name));
}

#[tokio::test]
async fn malformed_file_is_skipped_and_reported() {
    let board = TestBoard::new();
    board.remote().seed(SeedIssue::new("Fix login", ts(10, 0)));
    board.write_raw("notes.md", "no frontmatter here\n");

    let result = board.engine.pull(&pull_all()).await.unwrap();
    assert_eq!(result.created.len(), 1);
    assert_eq!(result.skipped.len(), 1);
    assert!(result.skipped[0].path.ends_with("notes.md"));
    assert_eq!(board.contents("notes.md"), "no frontmatter here\n");
}

#[tokio::test]
async fn leftover_staging_file_is_swept_and_never_read() {
    let board = TestBoard::new();
    board.remote().seed(SeedIssue::new("Fix login", ts(10, 0)));
    board.write_raw("owner-repo#1-fix-login.md.tmp", "---\ntitle: half");

    let report = board.engine.status().await.unwrap();
    assert!(report.skipped.is_empty());
    assert!(report.new_files.is_empty());

    let result = board.engine.pull(&pull_all()).await.unwrap();
    assert!(result.is_clean());
    assert!(result.skipped.is_empty());
    assert_eq!(board.file_names(), vec!["owner-repo#1-fix-login.md"]);
}

#[tokio::test]
async fn fetch_failure_fails_the_pass() {
    let board = TestBoard::new();
    board.remote().seed(SeedIssue::new("Fix login", ts(10, 0)));
    board.remote().fail_on(FailPoint::Fetch, FailKind::Network);

    let err = board.engine.pull(&pull_all()).await.unwrap_err();
    assert!(err.is_transient());
    assert!(board.file_names().is_empty());
}

#[tokio::test]
async fn paging_reaches_every_item() {
    let mut config = support::test_config();
    config.remote.page_size = 2;
    let board = TestBoard::with_config(config);
    for n in 0..5 {
        board
            .remote()
            .seed(SeedIssue::new(format!("Item {n}"), ts(10, n)));
    }

    let result = board.engine.pull(&pull_all()).await.unwrap();
    assert_eq!(result.created.len(), 5);
    assert_eq!(board.remote().pages_served(), 3);
}
