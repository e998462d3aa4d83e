//! Initialization helpers for `.devloop/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{DevloopConfig, write_config};

/// Canonical paths within `.devloop/` for a project root.
#[derive(Debug, Clone)]
pub struct DevloopPaths {
    pub root: PathBuf,
    pub devloop_dir: PathBuf,
    pub config_path: PathBuf,
    pub env_example_path: PathBuf,
}

impl DevloopPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let devloop_dir = root.join(".devloop");
        Self {
            root: root.clone(),
            devloop_dir: devloop_dir.clone(),
            config_path: devloop_dir.join("config.toml"),
            env_example_path: devloop_dir.join("env.example"),
        }
    }
}

/// Options for `init_devloop`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing devloop-owned files.
    pub force: bool,
}

/// Create `.devloop/` scaffolding in `root`.
///
/// Fails if `.devloop/` already exists unless `options.force` is set.
pub fn init_devloop(root: &Path, options: &InitOptions) -> Result<DevloopPaths> {
    let paths = DevloopPaths::new(root);
    if paths.devloop_dir.exists() && !paths.devloop_dir.is_dir() {
        return Err(anyhow!(
            "devloop init: .devloop exists but is not a directory"
        ));
    }
    if paths.devloop_dir.exists() && !options.force {
        return Err(anyhow!(
            "devloop init: .devloop already exists (use --force to overwrite)"
        ));
    }

    fs::create_dir_all(&paths.devloop_dir)
        .with_context(|| format!("create directory {}", paths.devloop_dir.display()))?;
    write_config(&paths.config_path, &DevloopConfig::default())?;
    fs::write(&paths.env_example_path, ENV_EXAMPLE)
        .with_context(|| format!("write file {}", paths.env_example_path.display()))?;

    Ok(paths)
}

const ENV_EXAMPLE: &str = "\
# Copy to the project root as `.env`. Never commit the real file.
JIRA_URL=your-domain.atlassian.net
JIRA_EMAIL=bot@example.com
JIRA_API_TOKEN=
";
