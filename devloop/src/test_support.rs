//! Test-only collaborators: scripted model, fake ticket and change-request
//! hosts, a recording VCS, and a throwaway git origin.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::types::Message;
use crate::io::delivery::{ChangeRequest, ChangeRequestHost, ChangeRequestOutcome};
use crate::io::git::{StatusEntry, Vcs};
use crate::io::model::ModelClient;
use crate::io::ticket::{TicketLookup, TicketSource};

/// Model that replays canned replies and records every history it was shown.
pub struct ScriptedModel {
    replies: RefCell<VecDeque<String>>,
    histories: RefCell<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: RefCell::new(replies.into_iter().map(Into::into).collect()),
            histories: RefCell::new(Vec::new()),
        }
    }

    pub fn histories(&self) -> Vec<Vec<Message>> {
        self.histories.borrow().clone()
    }

    pub fn calls(&self) -> usize {
        self.histories.borrow().len()
    }

    pub fn assert_drained(&self) {
        let left = self.replies.borrow().len();
        assert_eq!(left, 0, "{left} scripted replies were never consumed");
    }
}

impl ModelClient for ScriptedModel {
    fn complete(&self, history: &[Message]) -> Result<String> {
        self.histories.borrow_mut().push(history.to_vec());
        self.replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model ran out of replies"))
    }
}

/// Ticket source backed by a map; unknown keys are `NotFound`.
#[derive(Clone, Default)]
pub struct FakeTicketSource {
    tickets: Rc<RefCell<BTreeMap<String, String>>>,
    error: Rc<RefCell<Option<String>>>,
    calls: Rc<Cell<usize>>,
}

impl FakeTicketSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticket(self, key: &str, text: &str) -> Self {
        self.tickets
            .borrow_mut()
            .insert(key.to_string(), text.to_string());
        self
    }

    /// Make every fetch fail with `message`.
    pub fn failing(self, message: &str) -> Self {
        self.error.replace(Some(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl TicketSource for FakeTicketSource {
    fn fetch(&self, key: &str) -> Result<TicketLookup> {
        self.calls.set(self.calls.get() + 1);
        if let Some(message) = self.error.borrow().as_ref() {
            return Err(anyhow!("{message}"));
        }
        Ok(match self.tickets.borrow().get(key) {
            Some(text) => TicketLookup::Found(text.clone()),
            None => TicketLookup::NotFound,
        })
    }
}

/// Change-request host that remembers heads; a second create for the same
/// head reports `AlreadyExists`.
#[derive(Clone, Default)]
pub struct FakeChangeRequestHost {
    requests: Rc<RefCell<Vec<ChangeRequest>>>,
    heads: Rc<RefCell<BTreeSet<String>>>,
}

impl FakeChangeRequestHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<ChangeRequest> {
        self.requests.borrow().clone()
    }
}

impl ChangeRequestHost for FakeChangeRequestHost {
    fn create(&self, _workdir: &Path, request: &ChangeRequest) -> Result<ChangeRequestOutcome> {
        self.requests.borrow_mut().push(request.clone());
        let mut heads = self.heads.borrow_mut();
        if !heads.insert(request.head.clone()) {
            return Ok(ChangeRequestOutcome::AlreadyExists);
        }
        Ok(ChangeRequestOutcome::Created(format!(
            "https://example.test/pr/{}",
            heads.len()
        )))
    }
}

#[derive(Debug)]
struct VcsState {
    calls: Vec<String>,
    branch: String,
    dirty: Vec<String>,
    repository: bool,
    push_error: Option<String>,
}

/// In-memory [`Vcs`] that records mutating calls. Clones share state, so a
/// test can keep a handle after boxing one into a workspace.
#[derive(Debug, Clone)]
pub struct RecordingVcs {
    workdir: PathBuf,
    state: Rc<RefCell<VcsState>>,
}

impl RecordingVcs {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            state: Rc::new(RefCell::new(VcsState {
                calls: Vec::new(),
                branch: "main".to_string(),
                dirty: Vec::new(),
                repository: false,
                push_error: None,
            })),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn set_dirty(&self, paths: &[&str]) {
        self.state.borrow_mut().dirty = paths.iter().map(ToString::to_string).collect();
    }

    pub fn fail_push_with(&self, message: &str) {
        self.state.borrow_mut().push_error = Some(message.to_string());
    }

    fn record(&self, call: String) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl Vcs for RecordingVcs {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn is_repository(&self) -> bool {
        self.state.borrow().repository
    }

    fn remote_url(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn clone_from(&self, url: &str) -> Result<()> {
        self.record(format!("clone {url}"));
        self.state.borrow_mut().repository = true;
        Ok(())
    }

    fn configure_identity(&self, name: &str, email: &str) -> Result<()> {
        self.record(format!("config {name} <{email}>"));
        Ok(())
    }

    fn fetch(&self) -> Result<()> {
        self.record("fetch".to_string());
        Ok(())
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        self.record(format!("checkout {branch}"));
        self.state.borrow_mut().branch = branch.to_string();
        Ok(())
    }

    fn pull(&self, branch: &str) -> Result<()> {
        self.record(format!("pull {branch}"));
        Ok(())
    }

    fn reset_branch(&self, branch: &str) -> Result<()> {
        self.record(format!("checkout -B {branch}"));
        self.state.borrow_mut().branch = branch.to_string();
        Ok(())
    }

    fn current_branch(&self) -> Result<String> {
        Ok(self.state.borrow().branch.clone())
    }

    fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        Ok(self
            .state
            .borrow()
            .dirty
            .iter()
            .map(|path| StatusEntry {
                code: "??".to_string(),
                path: path.clone(),
            })
            .collect())
    }

    fn add_all(&self) -> Result<()> {
        self.record("add -A".to_string());
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<()> {
        self.record(format!("commit {message}"));
        self.state.borrow_mut().dirty.clear();
        Ok(())
    }

    fn push(&self, branch: &str) -> Result<()> {
        self.record(format!("push {branch}"));
        match &self.state.borrow().push_error {
            Some(message) => Err(anyhow!("git push -u origin {branch} failed: {message}")),
            None => Ok(()),
        }
    }
}

/// A bare git origin in a temp dir, seeded with one commit on `main`.
pub struct TestRemote {
    _temp: tempfile::TempDir,
    bare: PathBuf,
}

impl TestRemote {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let bare = temp.path().join("origin.git");
        let seed = temp.path().join("seed");
        fs::create_dir_all(&seed).expect("create seed dir");

        git(temp.path(), &["init", "--bare", "-q", "origin.git"]);
        git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&seed, &["init", "-q"]);
        git(&seed, &["checkout", "-q", "-b", "main"]);
        fs::write(seed.join("README.md"), "# sample project\n").expect("write README");
        git(&seed, &["add", "-A"]);
        git(
            &seed,
            &[
                "-c",
                "user.name=seed",
                "-c",
                "user.email=seed@example.com",
                "commit",
                "-q",
                "-m",
                "initial commit",
            ],
        );
        let bare_arg = bare.display().to_string();
        git(&seed, &["push", "-q", &bare_arg, "main"]);

        Self { _temp: temp, bare }
    }

    /// Clone URL (a local path).
    pub fn url(&self) -> String {
        self.bare.display().to_string()
    }

    pub fn has_branch(&self, branch: &str) -> bool {
        Command::new("git")
            .args(["rev-parse", "--verify", "-q", &format!("refs/heads/{branch}")])
            .current_dir(&self.bare)
            .output()
            .expect("git rev-parse")
            .status
            .success()
    }

    /// Contents of `path` at the tip of `branch`, if present.
    pub fn file_on_branch(&self, branch: &str, path: &str) -> Option<String> {
        let output = Command::new("git")
            .args(["show", &format!("{branch}:{path}")])
            .current_dir(&self.bare)
            .output()
            .expect("git show");
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl Default for TestRemote {
    fn default() -> Self {
        Self::new()
    }
}

fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
}
