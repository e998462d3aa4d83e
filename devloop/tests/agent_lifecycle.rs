//! Loop-level tests for full task lifecycles.
//!
//! Each test wires the standard tool catalog to a real bare git origin, a
//! `sh`-based test runner, and scripted model replies, then drives
//! `Agent::run_task` to a terminal outcome.

use std::path::Path;
use std::rc::Rc;

use devloop::core::types::{Role, TaskOutcome};
use devloop::io::config::{DevloopConfig, VerifyConfig};
use devloop::io::delivery::Delivery;
use devloop::io::installer::PackageInstaller;
use devloop::io::verify::{CommandTestRunner, FAILURE_INSTRUCTION};
use devloop::io::workspace::Workspace;
use devloop::looping::{Agent, LoopConfig};
use devloop::test_support::{FakeChangeRequestHost, FakeTicketSource, ScriptedModel, TestRemote};
use devloop::tools::{ToolRegistry, Toolbox, standard_registry};

struct Harness {
    registry: ToolRegistry,
    config: DevloopConfig,
    host: FakeChangeRequestHost,
    tickets: FakeTicketSource,
    workspace_dir: std::path::PathBuf,
}

fn harness(remote_url: String, dir: &Path) -> Harness {
    let mut config = DevloopConfig::default();
    config.workspace.remote_url = Some(remote_url);
    config.workspace.path = dir.join("ws");
    config.verify = VerifyConfig {
        command: vec!["sh".to_string()],
        include_path_var: "DEVLOOP_TEST_INCLUDE".to_string(),
        timeout_secs: 30,
        output_limit_bytes: 4_000,
    };

    let workspace = Rc::new(Workspace::open(&config, dir).expect("open workspace"));
    let host = FakeChangeRequestHost::new();
    let tickets = FakeTicketSource::new().with_ticket("PAY-1", "--- TICKET PAY-1 ---");
    let delivery = Rc::new(Delivery::new(
        workspace.clone(),
        Box::new(host.clone()),
        &config.delivery,
    ));
    let registry = standard_registry(
        &config,
        Toolbox {
            workspace,
            delivery,
            test_runner: Box::new(CommandTestRunner::new(&config.verify)),
            installer: PackageInstaller::new(&config.installer),
            tickets: Some(Box::new(tickets.clone())),
        },
    )
    .expect("registry");
    Harness {
        registry,
        config,
        host,
        tickets,
        workspace_dir: dir.join("ws"),
    }
}

fn observation(model: &ScriptedModel, turn: usize) -> String {
    let history = &model.histories()[turn];
    let last = history.last().expect("observation");
    assert_eq!(last.role, Role::User);
    last.content.clone()
}

/// Write → failing verify → fix → passing verify → commit → push → PR → done.
#[test]
fn full_lifecycle_self_heals_and_delivers() {
    let remote = TestRemote::new();
    let temp = tempfile::tempdir().expect("tempdir");
    let h = harness(remote.url(), temp.path());

    let model = ScriptedModel::new([
        r#"I'll start by preparing the workspace.
{"name": "init_workspace", "arguments": {"branch_name": "feature/x"}}"#,
        r#"{"name": "write_file", "arguments": {"file_path": "src/a.sh", "content": "add() { echo $(($1 - $2)); }\n"}}"#,
        "Now the test.\n```json\n{\"name\": \"write_file\", \"arguments\": {\"file_path\": \"tests/test_a.sh\"}}\n```\n\
         ```sh\n. src/a.sh\n[ \"$(add 2 3)\" = 5 ] || { echo \"expected 5, got $(add 2 3)\" >&2; exit 1; }\necho ok\n```\n",
        r#"{"name": "run_tests", "arguments": {"target": "tests/test_a.sh"}}"#,
        r#"The subtraction is wrong. {"name": "write_file", "arguments": {"file_path": "src/a.sh", "content": "add() { echo $(($1 + $2)); }\n"}}"#,
        r#"{"name": "run_tests", "arguments": {"target": "tests/test_a.sh"}}"#,
        r#"{"name": "git_commit", "arguments": {"message": "add a"}}"#,
        r#"{"name": "git_push", "arguments": {"branch_name": "feature/x"}}"#,
        r#"{"name": "create_pr", "arguments": {"title": "Add a", "body": "Adds add()."}}"#,
        r#"{"name": "task_complete", "arguments": {"summary": "Added add() with a passing test."}}"#,
    ]);

    let outcome =
        Agent::new(&model, &h.registry, LoopConfig::from_config(&h.config)).run_task("add a");
    assert_eq!(
        outcome,
        TaskOutcome::Completed {
            summary: "Added add() with a passing test.".to_string(),
            steps: 10
        }
    );
    model.assert_drained();

    let failed_run = observation(&model, 4);
    assert!(failed_run.starts_with("Tool Output (run_tests):\n[error] Tests failed"));
    assert!(failed_run.contains("expected 5, got -1"));
    assert!(failed_run.contains(FAILURE_INSTRUCTION));
    let passed_run = observation(&model, 6);
    assert!(passed_run.starts_with("Tool Output (run_tests):\n[ok] Tests passed"), "{passed_run}");

    assert!(remote.has_branch("feature/x"));
    let pushed = remote.file_on_branch("feature/x", "src/a.sh").expect("pushed file");
    assert!(pushed.contains("$1 + $2"));
    assert!(remote.file_on_branch("main", "src/a.sh").is_none());

    let requests = h.host.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].head, "feature/x");
    assert_eq!(requests[0].base, "main");
    assert!(h.workspace_dir.join("tests/test_a.sh").is_file());
}

/// A `NotFound` ticket is never fetched again; the task proceeds without it.
#[test]
fn missing_ticket_is_not_looked_up_twice() {
    let remote = TestRemote::new();
    let temp = tempfile::tempdir().expect("tempdir");
    let h = harness(remote.url(), temp.path());

    let model = ScriptedModel::new([
        r#"{"name": "read_ticket", "arguments": {"issue_key": "PAY-999"}}"#,
        r#"{"name": "read_ticket", "arguments": {"issue_key": "PAY-999"}}"#,
        r#"{"name": "task_complete", "arguments": {"summary": "Proceeded from the task text."}}"#,
    ]);
    let outcome = Agent::new(&model, &h.registry, LoopConfig::from_config(&h.config))
        .run_task("implement PAY-999: add a fee");

    assert!(outcome.is_success());
    assert_eq!(h.tickets.calls(), 1);
    assert!(observation(&model, 1).contains("PAY-999 was not found"));
    assert!(observation(&model, 2).starts_with("Tool Output (read_ticket):\n[error] STOP"));
}

/// Two actions in one reply: only the first runs.
#[test]
fn second_action_in_a_reply_is_not_executed() {
    let remote = TestRemote::new();
    let temp = tempfile::tempdir().expect("tempdir");
    let h = harness(remote.url(), temp.path());

    let model = ScriptedModel::new([
        concat!(
            r#"{"name": "init_workspace", "arguments": {"branch_name": "feature/x"}}"#,
            "\n",
            r#"{"name": "write_file", "arguments": {"file_path": "sneaky.txt", "content": "x"}}"#,
        ),
        r#"{"name": "task_complete", "arguments": {"summary": "stopped"}}"#,
    ]);
    let outcome =
        Agent::new(&model, &h.registry, LoopConfig::from_config(&h.config)).run_task("task");

    assert!(outcome.is_success());
    assert!(h.workspace_dir.join("README.md").is_file());
    assert!(!h.workspace_dir.join("sneaky.txt").exists());
    assert!(observation(&model, 1).contains("1 more action(s)"));
}

/// A failed initialization stops the task on that turn.
#[test]
fn failed_initialization_is_fatal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("no-such-origin.git").display().to_string();
    let h = harness(missing, temp.path());

    let model = ScriptedModel::new([
        r#"{"name": "init_workspace", "arguments": {"branch_name": "feature/x"}}"#,
        r#"{"name": "list_files", "arguments": {}}"#,
    ]);
    let outcome =
        Agent::new(&model, &h.registry, LoopConfig::from_config(&h.config)).run_task("task");

    match outcome {
        TaskOutcome::Failed { step, reason, steps } => {
            assert_eq!(step, "init_workspace");
            assert!(reason.contains("Workspace initialization failed"));
            assert_eq!(steps, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(model.calls(), 1);
}

/// Pushing the wrong branch is rejected without touching the remote, and the
/// corrected push goes through.
#[test]
fn push_with_wrong_branch_is_corrected_by_the_model() {
    let remote = TestRemote::new();
    let temp = tempfile::tempdir().expect("tempdir");
    let h = harness(remote.url(), temp.path());

    let model = ScriptedModel::new([
        r#"{"name": "init_workspace", "arguments": {"branch_name": "feature/x"}}"#,
        r#"{"name": "write_file", "arguments": {"file_path": "a.txt", "content": "a\n"}}"#,
        r#"{"name": "git_commit", "arguments": {"message": "add a.txt"}}"#,
        r#"{"name": "git_push", "arguments": {"branch_name": "feature/y"}}"#,
        r#"{"name": "git_push", "arguments": {"branch_name": "feature/x"}}"#,
        r#"{"name": "git_commit", "arguments": {"message": "again"}}"#,
        r#"{"name": "create_pr", "arguments": {"title": "a", "body": "b"}}"#,
        r#"{"name": "create_pr", "arguments": {"title": "a", "body": "b"}}"#,
        r#"{"name": "task_complete", "arguments": {"summary": "delivered"}}"#,
    ]);
    let outcome =
        Agent::new(&model, &h.registry, LoopConfig::from_config(&h.config)).run_task("task");
    assert!(outcome.is_success(), "{outcome:?}");

    let rejected = observation(&model, 4);
    assert!(rejected.contains("'feature/x'") && rejected.contains("'feature/y'"));
    assert!(!remote.has_branch("feature/y"));
    assert!(remote.has_branch("feature/x"));
    assert!(observation(&model, 6).contains("[ok] Nothing to commit on 'feature/x'"));
    assert!(observation(&model, 8).contains("[ok] A change request"));
    assert!(observation(&model, 8).contains("already exists"));
}
