mod support;

use std::path::PathBuf;

use boardsync::conflict::Resolution;
use boardsync::error::{exit_codes, Error};
use boardsync::memory::{FailKind, FailPoint, Mutation, SeedIssue};
use boardsync::sync::{PassOutcome, PullOptions, PushOptions};
use boardsync::task::Task;
use support::{ts, TestBoard};

fn push_all() -> PushOptions {
    PushOptions::default()
}

fn draft(board: &TestBoard, file_name: &str, title: &str) {
    board.write_task(file_name, &Task::new(title, "todo", ts(9, 0)), None);
}

fn created_titles(board: &TestBoard) -> Vec<String> {
    board
        .remote()
        .mutations()
        .into_iter()
        .filter_map(|mutation| match mutation {
            Mutation::Created { title, .. } => Some(title),
            _ => None,
        })
        .collect()
}

/// Pull one seeded issue so the board starts from a synced file
async fn synced_board() -> (TestBoard, String) {
    let board = TestBoard::new();
    board
        .remote()
        .seed(SeedIssue::new("Fix login", ts(10, 0)).status("Todo"));
    board.engine.pull(&PullOptions::default()).await.unwrap();
    (board, "owner-repo#1-fix-login.md".to_string())
}

#[tokio::test]
async fn new_file_is_created_and_renamed() {
    let board = TestBoard::new();
    board.remote().set_next_number(42);
    board.remote().set_now(ts(12, 0));

    let mut task = Task::new("Fix login", "todo", ts(11, 0));
    task.priority = Some("high".to_string());
    task.tags.insert("ui".to_string());
    board.write_task("fix-login.md", &task, None);

    let result = board.engine.push(&push_all()).await.unwrap();
    assert!(result.is_clean());
    assert_eq!(result.created.len(), 1);
    assert_eq!(result.renamed.len(), 1);
    assert_eq!(result.renamed[0].from, "fix-login.md");
    assert_eq!(result.renamed[0].to, "owner-repo#42-fix-login.md");

    assert!(!board.exists("fix-login.md"));
    let (local, record) = board.read_task("owner-repo#42-fix-login.md");
    assert_eq!(local.id, task.id);
    let record = record.expect("sync record");
    assert_eq!(record.remote.issue_number, 42);
    assert_eq!(record.last_synced, ts(12, 0));

    let issue = board.remote().issue(42).unwrap();
    assert_eq!(issue.status.as_deref(), Some("Todo"));
    assert!(issue.has_label("priority:high"));
    assert!(issue.has_label("ui"));
    assert_eq!(
        board.remote().mutations_for(42),
        vec![
            Mutation::Created {
                issue_number: 42,
                title: "Fix login".to_string()
            },
            Mutation::AddedToProject { issue_number: 42 },
            Mutation::StatusSet {
                issue_number: 42,
                status: "Todo".to_string()
            },
        ]
    );

    let again = board.engine.push(&push_all()).await.unwrap();
    assert!(again.created.is_empty());
    assert!(again.updated.is_empty());
    assert_eq!(board.remote().mutations().len(), 3);
}

#[tokio::test]
async fn flagged_local_edit_is_pushed() {
    let (board, name) = synced_board().await;
    let (mut task, record) = board.read_task(&name);
    let mut record = record.unwrap();
    record.push_changes = true;
    task.body = "Steps to reproduce".to_string();
    task.state = "in-progress".to_string();
    task.updated = ts(11, 0);
    board.write_task(&name, &task, Some(&record));

    board.remote().set_now(ts(11, 5));
    let result = board.engine.push(&push_all()).await.unwrap();
    assert!(result.is_clean());
    assert!(result.conflicts.is_empty());
    assert_eq!(result.updated.len(), 1);

    let mutations = board.remote().mutations_for(1);
    assert_eq!(mutations.len(), 1);
    let Mutation::Updated { update, .. } = &mutations[0] else {
        panic!("expected an update, got {mutations:?}");
    };
    assert_eq!(update.body.as_deref(), Some("Steps to reproduce"));
    assert_eq!(update.status.as_deref(), Some("In Progress"));
    assert!(update.title.is_none());

    let (_, record) = board.read_task(&name);
    let record = record.unwrap();
    assert!(!record.push_changes);
    assert_eq!(record.last_synced, ts(11, 5));

    let status = board.engine.status().await.unwrap();
    assert!(status.modified_files.is_empty());
    assert_eq!(status.unchanged, 1);
}

#[tokio::test]
async fn unflagged_local_edit_is_held() {
    let (board, name) = synced_board().await;
    let (mut task, record) = board.read_task(&name);
    task.body = "draft notes".to_string();
    task.updated = ts(11, 0);
    board.write_task(&name, &task, record.as_ref());

    let result = board.engine.push(&push_all()).await.unwrap();
    assert_eq!(result.held, vec![name.clone()]);
    assert!(result.updated.is_empty());
    assert!(board.remote().mutations().is_empty());
}

#[tokio::test]
async fn edit_on_both_sides_is_a_conflict_not_a_push() {
    let (board, name) = synced_board().await;
    let (mut task, record) = board.read_task(&name);
    task.body = "local".to_string();
    task.updated = ts(11, 0);
    board.write_task(&name, &task, record.as_ref());
    board
        .remote()
        .edit(1, ts(10, 30), |issue| issue.body = "remote".to_string());

    let result = board.engine.push(&push_all()).await.unwrap();
    assert_eq!(result.conflicts.len(), 1);
    assert_eq!(result.conflicts[0].resolution, Resolution::RemoteWins);
    assert!(result.updated.is_empty());
    assert!(board.remote().mutations().is_empty());
    assert_eq!(result.exit_code(), exit_codes::SUCCESS);
}

#[tokio::test]
async fn failed_item_does_not_stop_the_batch() {
    let board = TestBoard::new();
    draft(&board, "a.md", "Alpha");
    draft(&board, "b.md", "Bravo");
    draft(&board, "c.md", "Charlie");
    board.remote().fail_on(
        FailPoint::Create {
            title: "Bravo".to_string(),
        },
        FailKind::Network,
    );

    let result = board.engine.push(&push_all()).await.unwrap();
    assert_eq!(result.created.len(), 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].file.as_deref(), Some("b.md"));
    assert_eq!(result.errors[0].kind, "network");
    assert!(!result.aborted);
    assert_eq!(result.exit_code(), exit_codes::OPERATION_FAILED);

    assert_eq!(created_titles(&board), vec!["Alpha", "Charlie"]);
    assert!(board.exists("b.md"));
    assert!(board.read_task("b.md").1.is_none());
}

#[tokio::test]
async fn partial_create_is_reported_and_never_repeated() {
    let board = TestBoard::new();
    draft(&board, "alpha.md", "Alpha");
    board.remote().fail_on(
        FailPoint::SetStatus {
            title: "Alpha".to_string(),
        },
        FailKind::Network,
    );

    let result = board.engine.push(&push_all()).await.unwrap();
    assert_eq!(result.errors.len(), 1);
    let error = &result.errors[0];
    assert_eq!(error.kind, "partial_create");
    let details = error.details.as_ref().unwrap();
    assert_eq!(details["issue_number"], 1);
    assert_eq!(details["failed_step"], "set status");
    assert!(board.exists("alpha.md"));

    board.remote().clear_failures();
    let retry = board.engine.push(&push_all()).await.unwrap();
    assert_eq!(retry.errors[0].kind, "partial_create");
    assert_eq!(created_titles(&board), vec!["Alpha"]);

    // The issue made it onto the board, so a pull links the file to it.
    let pulled = board.engine.pull(&PullOptions::default()).await.unwrap();
    assert_eq!(pulled.created.len(), 1);
    assert_eq!(board.file_names(), vec!["owner-repo#1-alpha.md"]);
    assert!(board.index().unreconciled.is_empty());
    assert!(board.read_task("owner-repo#1-alpha.md").1.is_some());
}

#[tokio::test]
async fn auth_failure_aborts_the_pass() {
    let board = TestBoard::new();
    draft(&board, "a.md", "Alpha");
    draft(&board, "b.md", "Bravo");
    board.remote().fail_on(
        FailPoint::Create {
            title: "Alpha".to_string(),
        },
        FailKind::Auth,
    );

    let result = board.engine.push(&push_all()).await.unwrap();
    assert!(result.aborted);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind, "auth");
    assert!(board.remote().mutations().is_empty());
}

#[tokio::test]
async fn invalid_store_stops_before_any_item() {
    let board = TestBoard::new();
    draft(&board, "a.md", "Alpha");
    board.remote().remove_status_option("Done");

    let err = board.engine.push(&push_all()).await.unwrap_err();
    assert!(matches!(err, Error::StoreInvalid(_)));
    assert!(board.remote().mutations().is_empty());
}

#[tokio::test]
async fn flagged_deletion_closes_only_when_confirmed() {
    let (board, name) = synced_board().await;
    let (task, record) = board.read_task(&name);
    let mut record = record.unwrap();
    record.close_on_github = true;
    board.write_task(&name, &task, Some(&record));
    board.engine.push(&push_all()).await.unwrap();

    std::fs::remove_file(board.path(&name)).unwrap();

    let result = board.engine.push(&push_all()).await.unwrap();
    assert_eq!(result.pending_close, vec![name.clone()]);
    assert!(result.closed.is_empty());
    assert!(board.remote().mutations().is_empty());
    assert!(board.index().get("PVTI_1").is_some());

    let confirmed = PushOptions {
        allow_close: true,
        ..PushOptions::default()
    };
    let result = board.engine.push(&confirmed).await.unwrap();
    assert_eq!(result.closed.len(), 1);
    assert!(board.remote().issue(1).unwrap().closed);
    assert!(board.index().get("PVTI_1").is_none());
}

#[tokio::test]
async fn unflagged_deletion_leaves_issue_open() {
    let (board, name) = synced_board().await;
    std::fs::remove_file(board.path(&name)).unwrap();

    let confirmed = PushOptions {
        allow_close: true,
        ..PushOptions::default()
    };
    let result = board.engine.push(&confirmed).await.unwrap();
    assert_eq!(result.ignored_deletions, vec![name]);
    assert!(result.closed.is_empty());
    assert!(!board.remote().issue(1).unwrap().closed);
    assert!(board.index().get("PVTI_1").is_some());
}

#[tokio::test]
async fn dry_run_sends_and_writes_nothing() {
    let board = TestBoard::new();
    draft(&board, "a.md", "Alpha");
    let before = board.snapshot();

    let options = PushOptions {
        dry_run: true,
        ..PushOptions::default()
    };
    let result = board.engine.push(&options).await.unwrap();
    assert_eq!(result.created.len(), 1);
    assert!(result.created[0].remote.is_none());
    assert!(board.remote().mutations().is_empty());
    assert_eq!(board.snapshot(), before);
}

#[tokio::test]
async fn only_named_files_are_pushed() {
    let board = TestBoard::new();
    draft(&board, "a.md", "Alpha");
    draft(&board, "b.md", "Bravo");

    let options = PushOptions {
        files: Some(vec![board.path("a.md"), PathBuf::from("missing.md")]),
        ..PushOptions::default()
    };
    let result = board.engine.push(&options).await.unwrap();
    assert_eq!(result.created.len(), 1);
    assert_eq!(created_titles(&board), vec!["Alpha"]);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].file.as_deref(), Some("missing.md"));
    assert!(board.exists("b.md"));
}
