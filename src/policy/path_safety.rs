//! Working-directory boundary validation for tool path arguments.
//!
//! File-mutation tools may only touch paths inside the approved working
//! directory. Relative paths resolve against that directory; `..`
//! traversal and symlink targets escaping the boundary are rejected.

use std::path::{Component, Path, PathBuf};

use crate::{AppError, Result};

/// Validate that `candidate` resolves inside `working_dir`.
///
/// Lexically normalizes the candidate (collapsing `.` and `..`), anchors
/// relative paths at the working directory, and — when the path already
/// exists — canonicalizes it to catch symlink escapes. Returns the
/// resolved absolute path on success.
///
/// # Errors
///
/// Returns `AppError::PathViolation` if:
/// - the working directory cannot be canonicalized;
/// - `..` segments climb above the working directory;
/// - the resolved path lies outside the working directory;
/// - an existing path is a symlink whose target escapes the boundary.
pub fn validate_path(working_dir: &Path, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let root = working_dir.canonicalize().map_err(|err| {
        AppError::PathViolation(format!("working directory invalid: {err}"))
    })?;

    let resolved = normalize(&root, candidate.as_ref())?;

    if !resolved.starts_with(&root) {
        return Err(AppError::PathViolation(format!(
            "path outside working directory: {}",
            candidate.as_ref().display()
        )));
    }

    // An existing path may be a symlink; canonicalize resolves the target
    // and the boundary check repeats against the final location.
    if resolved.exists() {
        let canonical = resolved
            .canonicalize()
            .map_err(|err| AppError::PathViolation(format!("cannot resolve path: {err}")))?;

        if !canonical.starts_with(&root) {
            return Err(AppError::PathViolation(
                "symlink target escapes working directory".into(),
            ));
        }

        return Ok(canonical);
    }

    Ok(resolved)
}

/// Lexically normalize `candidate`, anchoring relative paths at `root`.
fn normalize(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let mut normalized = PathBuf::new();
    let mut absolute = false;

    for component in candidate.components() {
        match component {
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(AppError::PathViolation(
                        "path climbs above the working directory".into(),
                    ));
                }
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                normalized.clear();
                absolute = true;
            }
            Component::Normal(part) => normalized.push(part),
        }
    }

    if absolute {
        let mut rebuilt = PathBuf::from(Component::RootDir.as_os_str());
        rebuilt.push(normalized);
        Ok(rebuilt)
    } else {
        Ok(root.join(normalized))
    }
}
