//! Workspace-root path validation for executor operations.

use std::path::{Component, Path, PathBuf};

use crate::error::{CoreError, Result};

/// Resolve a caller-supplied path against the workspace root.
///
/// Rejects absolute paths, null bytes, and any `..` that would climb out
/// of the root after lexical normalization. Returns the normalized
/// workspace-relative path; callers join it onto the root for I/O.
pub fn resolve_within_root(raw: &str) -> Result<PathBuf> {
    if raw.is_empty() {
        return Err(CoreError::InvalidPath("empty path".to_string()));
    }
    if raw.contains('\0') {
        return Err(CoreError::InvalidPath(
            "path contains a null byte".to_string(),
        ));
    }

    let path = Path::new(raw);
    if path.is_absolute() {
        return Err(CoreError::InvalidPath(format!(
            "absolute paths are not allowed: {raw}"
        )));
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(CoreError::InvalidPath(format!(
                        "path escapes the workspace root: {raw}"
                    )));
                }
            }
            Component::Normal(part) => normalized.push(part),
            Component::RootDir | Component::Prefix(_) => {
                return Err(CoreError::InvalidPath(format!(
                    "absolute paths are not allowed: {raw}"
                )));
            }
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(CoreError::InvalidPath(format!(
            "path resolves to the workspace root itself: {raw}"
        )));
    }

    Ok(normalized)
}
