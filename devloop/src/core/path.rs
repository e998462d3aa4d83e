//! Lexical containment of model-supplied paths inside the workspace root.

use std::path::{Component, Path, PathBuf};

use anyhow::{Result, anyhow};

/// Normalize `relative` and join it onto `root`, refusing any path that would
/// leave `root`.
///
/// Absolute paths, drive prefixes, and `..` components that climb above the
/// root are rejected. `.` components and redundant separators are dropped.
/// This is purely lexical; symlink escapes are checked by the I/O layer.
pub fn join_within(root: &Path, relative: &str) -> Result<PathBuf> {
    let normalized = normalize_relative(relative)?;
    Ok(root.join(normalized))
}

/// Normalize a relative path, returning the cleaned relative form.
pub fn normalize_relative(relative: &str) -> Result<PathBuf> {
    let trimmed = relative.trim();
    if trimmed.contains('\0') {
        return Err(anyhow!("path contains a NUL byte"));
    }
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(name) => parts.push(name),
            Component::ParentDir => {
                if parts.pop().is_none() {
                    return Err(anyhow!("path '{relative}' escapes the workspace"));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow!(
                    "path '{relative}' is absolute; use a path relative to the workspace root"
                ));
            }
        }
    }
    Ok(parts.iter().collect())
}
