//! The isolated working copy the agent edits, tests, and delivers from.
//!
//! A [`Workspace`] walks `Uninitialized -> Cloned -> OnBaseBranch ->
//! OnFeatureBranch` during [`Workspace::init`]. File operations are only
//! allowed once the feature branch is checked out, and every model-supplied
//! path is contained to the workspace root, both lexically and after symlink
//! resolution.

use std::cell::{Cell, RefCell};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::core::path::join_within;
use crate::io::config::{DevloopConfig, WorkspaceConfig};
use crate::io::git::{Git, Vcs};

/// Directory names never listed or descended into.
const IGNORED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    "venv",
    ".venv",
    "env",
    "site-packages",
    ".idea",
    ".vscode",
    "node_modules",
    "target",
    "build",
    "dist",
    "tmp",
    "logs",
    "coverage",
];

const IGNORED_SUFFIXES: &[&str] = &[".pyc", ".DS_Store", ".log"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    Uninitialized,
    Cloned,
    OnBaseBranch,
    OnFeatureBranch,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace is not initialized; call init_workspace first")]
    NotInitialized,
    #[error("{0}")]
    OutsideWorkspace(String),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

type WsResult<T> = std::result::Result<T, WorkspaceError>;

/// Result of a successful [`Workspace::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitReport {
    pub root: PathBuf,
    pub base_branch: String,
    pub feature_branch: String,
    /// False when an existing clone was reused.
    pub cloned: bool,
}

/// Bounded file listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    /// Workspace-relative paths with `/` separators, sorted.
    pub files: Vec<String>,
    pub truncated: bool,
}

#[derive(Debug, Clone)]
struct Branches {
    base: String,
    feature: String,
}

pub struct Workspace {
    root: PathBuf,
    config: WorkspaceConfig,
    remote_url: Option<String>,
    vcs: Box<dyn Vcs>,
    state: Cell<WorkspaceState>,
    branches: RefCell<Option<Branches>>,
}

impl Workspace {
    pub fn new(config: WorkspaceConfig, remote_url: Option<String>, vcs: Box<dyn Vcs>) -> Self {
        Self {
            root: vcs.workdir().to_path_buf(),
            config,
            remote_url,
            vcs,
            state: Cell::new(WorkspaceState::Uninitialized),
            branches: RefCell::new(None),
        }
    }

    /// Build the git-backed workspace for a project.
    ///
    /// The clone source is `workspace.remote_url` when set, otherwise the
    /// `origin` of the project root itself.
    pub fn open(config: &DevloopConfig, project_root: &Path) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.workspace.git_timeout_secs);
        let remote_url = match &config.workspace.remote_url {
            Some(url) => Some(url.clone()),
            None => Git::new(project_root, timeout).remote_url()?,
        };
        let git = Git::new(config.workspace_dir(project_root), timeout);
        Ok(Self::new(config.workspace.clone(), remote_url, Box::new(git)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> WorkspaceState {
        self.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.state.get() == WorkspaceState::OnFeatureBranch
    }

    pub fn vcs(&self) -> &dyn Vcs {
        self.vcs.as_ref()
    }

    pub fn default_base_branch(&self) -> &str {
        &self.config.base_branch
    }

    /// Feature branch created by the last successful init.
    pub fn feature_branch(&self) -> Option<String> {
        self.branches.borrow().as_ref().map(|b| b.feature.clone())
    }

    /// Base branch used by the last successful init.
    pub fn base_branch(&self) -> Option<String> {
        self.branches.borrow().as_ref().map(|b| b.base.clone())
    }

    /// Clone (if needed), sync `base_branch`, and check out a fresh `feature_branch`.
    #[instrument(skip_all, fields(feature_branch, base_branch))]
    pub fn init(
        &self,
        feature_branch: &str,
        base_branch: Option<&str>,
    ) -> anyhow::Result<InitReport> {
        let base = base_branch.unwrap_or(&self.config.base_branch).to_string();
        self.state.set(WorkspaceState::Uninitialized);
        self.branches.replace(None);

        let cloned = if self.vcs.is_repository() {
            debug!(root = %self.root.display(), "reusing existing clone");
            false
        } else {
            let url = self.remote_url.as_deref().ok_or_else(|| {
                anyhow!(
                    "no remote to clone: set workspace.remote_url or run from a project whose \
                     origin remote is configured"
                )
            })?;
            self.vcs.clone_from(url).context("clone remote")?;
            true
        };
        self.state.set(WorkspaceState::Cloned);

        self.vcs
            .configure_identity(&self.config.bot_name, &self.config.bot_email)
            .context("configure bot identity")?;
        self.vcs.fetch().context("fetch origin")?;
        self.vcs
            .checkout(&base)
            .with_context(|| format!("checkout base branch '{base}'"))?;
        self.state.set(WorkspaceState::OnBaseBranch);
        self.vcs
            .pull(&base)
            .with_context(|| format!("pull base branch '{base}'"))?;
        self.vcs
            .reset_branch(feature_branch)
            .with_context(|| format!("create feature branch '{feature_branch}'"))?;
        self.state.set(WorkspaceState::OnFeatureBranch);
        self.branches.replace(Some(Branches {
            base: base.clone(),
            feature: feature_branch.to_string(),
        }));

        info!(root = %self.root.display(), %base, feature = feature_branch, cloned, "workspace ready");
        Ok(InitReport {
            root: self.root.clone(),
            base_branch: base,
            feature_branch: feature_branch.to_string(),
            cloned,
        })
    }

    /// Resolve a model-supplied path to an absolute path inside the workspace.
    pub fn resolve(&self, relative: &str) -> WsResult<PathBuf> {
        let candidate = join_within(&self.root, relative)
            .map_err(|err| WorkspaceError::OutsideWorkspace(err.to_string()))?;
        let inner = candidate.strip_prefix(&self.root).unwrap_or(Path::new(""));
        if matches!(inner.components().next(), Some(Component::Normal(first)) if first == ".git") {
            return Err(WorkspaceError::OutsideWorkspace(format!(
                "path '{relative}' points into repository metadata"
            )));
        }
        self.check_symlinks(relative, &candidate)?;
        Ok(candidate)
    }

    fn check_symlinks(&self, relative: &str, candidate: &Path) -> WsResult<()> {
        let root = self
            .root
            .canonicalize()
            .with_context(|| format!("canonicalize {}", self.root.display()))?;
        // `symlink_metadata` sees dangling links that `exists()` reports as missing.
        let mut existing = candidate;
        while fs::symlink_metadata(existing).is_err() {
            match existing.parent() {
                Some(parent) => existing = parent,
                None => return Ok(()),
            }
        }
        let Ok(resolved) = existing.canonicalize() else {
            warn!(path = relative, "path goes through a dangling symlink");
            return Err(WorkspaceError::OutsideWorkspace(format!(
                "path '{relative}' resolves outside the workspace (dangling symlink)"
            )));
        };
        if !resolved.starts_with(&root) {
            warn!(path = relative, "path escapes workspace via symlink");
            return Err(WorkspaceError::OutsideWorkspace(format!(
                "path '{relative}' resolves outside the workspace"
            )));
        }
        Ok(())
    }

    pub fn ensure_ready(&self) -> WsResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(WorkspaceError::NotInitialized)
        }
    }

    /// Read a text file, truncated to `read_limit_bytes` on a char boundary.
    pub fn read(&self, relative: &str) -> WsResult<String> {
        let text = self.read_whole(relative)?;
        Ok(truncate_text(&text, self.config.read_limit_bytes))
    }

    /// Read a whole text file. Callers bound whatever they derive from it.
    pub fn read_whole(&self, relative: &str) -> WsResult<String> {
        self.ensure_ready()?;
        let path = self.resolve(relative)?;
        if !path.is_file() {
            return Err(anyhow!("file '{relative}' not found").into());
        }
        let bytes = fs::read(&path).with_context(|| format!("read {relative}"))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn read_limit_bytes(&self) -> usize {
        self.config.read_limit_bytes
    }

    /// Create or overwrite a file, creating parent directories. Returns bytes written.
    pub fn write(&self, relative: &str, content: &str) -> WsResult<usize> {
        self.ensure_ready()?;
        let path = self.resolve(relative)?;
        create_parent(&path)?;
        fs::write(&path, content).with_context(|| format!("write {relative}"))?;
        debug!(path = relative, bytes = content.len(), "file written");
        Ok(content.len())
    }

    /// Append to a file, creating it if missing. Returns bytes appended.
    pub fn append(&self, relative: &str, content: &str) -> WsResult<usize> {
        self.ensure_ready()?;
        let path = self.resolve(relative)?;
        create_parent(&path)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {relative} for append"))?;
        file.write_all(content.as_bytes())
            .with_context(|| format!("append {relative}"))?;
        Ok(content.len())
    }

    /// List files under `directory` (default: the root), skipping tool and
    /// build directories, bounded by `list_limit`.
    pub fn list(&self, directory: Option<&str>) -> WsResult<Listing> {
        self.ensure_ready()?;
        let dir_arg = directory.unwrap_or(".");
        let dir = self.resolve(dir_arg)?;
        if !dir.is_dir() {
            return Err(anyhow!("directory '{dir_arg}' not found").into());
        }

        let limit = self.config.list_limit;
        let mut files = Vec::new();
        let mut truncated = false;
        let walker = WalkDir::new(&dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_ignored_dir(entry));
        for entry in walker {
            let entry = entry.with_context(|| format!("walk {dir_arg}"))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if IGNORED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
                continue;
            }
            if files.len() == limit {
                truncated = true;
                break;
            }
            let rel = entry.path().strip_prefix(&self.root).unwrap_or(entry.path());
            files.push(
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
            );
        }
        Ok(Listing { files, truncated })
    }
}

fn is_ignored_dir(entry: &walkdir::DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    IGNORED_DIRS.iter().any(|ignored| *ignored == name)
}

fn create_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}

/// Truncate `text` to at most `limit` bytes on a char boundary, with a notice.
pub fn truncate_text(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n\n[truncated: showing first {cut} of {} bytes]",
        &text[..cut],
        text.len()
    )
}
