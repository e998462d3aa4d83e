//! Package installer collaborator.

use std::path::Path;
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{info, instrument};

use crate::io::config::InstallerConfig;
use crate::io::process::run_command_with_timeout;

const OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

static PACKAGE_SPEC: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"^[A-Za-z0-9][A-Za-z0-9._-]*(\[[A-Za-z0-9._-]+(,[A-Za-z0-9._-]+)*\])?((==|>=|<=|~=)[A-Za-z0-9.*+!_-]+)?$",
    )
    .unwrap()
});

/// True for specs like `requests`, `pytest-cov`, `uvicorn[standard]`, `numpy==1.26.4`.
pub fn is_valid_package_spec(spec: &str) -> bool {
    spec.len() <= 200 && PACKAGE_SPEC.is_match(spec)
}

pub struct PackageInstaller {
    command: Vec<String>,
    timeout: Duration,
}

impl PackageInstaller {
    pub fn new(config: &InstallerConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Install `spec` with the configured command, run from `workdir`.
    ///
    /// The spec is validated before any process starts. Returns the tail of
    /// the installer output on success.
    #[instrument(skip_all, fields(spec))]
    pub fn install(&self, workdir: &Path, spec: &str) -> Result<String> {
        if !is_valid_package_spec(spec) {
            return Err(anyhow!(
                "invalid package name '{spec}': use letters, digits, '.', '_', '-', optional \
                 [extras] and an optional ==, >=, <= or ~= version"
            ));
        }
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("installer.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(spec).current_dir(workdir);
        let output = run_command_with_timeout(cmd, None, self.timeout, OUTPUT_LIMIT_BYTES)?;
        let text = output.combined_text(program);
        if !output.success() {
            return Err(anyhow!("installing '{spec}' failed:\n{}", text.trim()));
        }
        info!(spec, "package installed");
        let lines: Vec<&str> = text.trim().lines().collect();
        Ok(lines[lines.len().saturating_sub(3)..].join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_specs() {
        for spec in ["requests", "pytest-cov", "uvicorn[standard]", "numpy==1.26.4", "a.b_c>=2.0"] {
            assert!(is_valid_package_spec(spec), "{spec}");
        }
    }

    #[test]
    fn rejects_shell_metacharacters_and_whitespace() {
        for spec in ["requests; rm -rf /", "a && b", "$(whoami)", "pkg name", "`id`", "-e .", "a|b", ""] {
            assert!(!is_valid_package_spec(spec), "{spec}");
        }
    }

    #[test]
    fn invalid_spec_fails_without_spawning() {
        let temp = tempfile::tempdir().expect("tempdir");
        let installer = PackageInstaller::new(&InstallerConfig {
            command: vec!["devloop-no-such-installer".to_string()],
            timeout_secs: 5,
        });
        let err = installer.install(temp.path(), "x; id").unwrap_err();
        assert!(err.to_string().contains("invalid package name"));
    }

    #[test]
    fn runs_configured_command_with_spec_appended() {
        let temp = tempfile::tempdir().expect("tempdir");
        let installer = PackageInstaller::new(&InstallerConfig {
            command: vec!["echo".to_string(), "installed".to_string()],
            timeout_secs: 5,
        });
        let out = installer.install(temp.path(), "requests==2.32.0").expect("install");
        assert_eq!(out, "installed requests==2.32.0");
    }
}
