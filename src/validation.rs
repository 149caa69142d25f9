//! Input checks run before any mutating operation is scheduled.

use crate::error::{SortError, SortResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Longest folder name accepted, in characters.
pub const MAX_FOLDER_NAME_LENGTH: usize = 50;

const ILLEGAL_FOLDER_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Accepts a non-empty string made only of ASCII letters and digits.
pub fn validate_extension(value: &str) -> SortResult<()> {
    if value.is_empty() {
        return Err(SortError::InvalidExtension {
            value: value.to_string(),
            reason: "extension cannot be empty".to_string(),
        });
    }
    if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(SortError::InvalidExtension {
            value: value.to_string(),
            reason: "extension can only contain letters and numbers".to_string(),
        });
    }
    Ok(())
}

/// Turns user input such as `" .PDF"` into the map key `"pdf"`.
pub fn normalize_extension(value: &str) -> SortResult<String> {
    let trimmed = value.trim();
    let ext = trimmed.strip_prefix('.').unwrap_or(trimmed).to_lowercase();
    validate_extension(&ext).map_err(|_| SortError::InvalidExtension {
        value: value.to_string(),
        reason: "extension can only contain letters and numbers".to_string(),
    })?;
    Ok(ext)
}

pub fn validate_folder_name(value: &str) -> SortResult<()> {
    let invalid = |reason: &str| {
        Err(SortError::InvalidFolderName {
            value: value.to_string(),
            reason: reason.to_string(),
        })
    };

    let length = value.chars().count();
    if length == 0 || value.trim().is_empty() {
        return invalid("folder name cannot be empty");
    }
    if length > MAX_FOLDER_NAME_LENGTH {
        return invalid("folder name is too long (max 50 characters)");
    }
    if value.chars().any(|c| ILLEGAL_FOLDER_CHARS.contains(&c) || c.is_control()) {
        return invalid("folder name contains invalid characters");
    }
    if value == "." || value == ".." {
        return invalid("folder name is reserved");
    }
    Ok(())
}

/// Resolves `path` to its canonical form and requires an existing directory.
pub fn validate_path(path: &Path) -> SortResult<PathBuf> {
    let canonical = fs::canonicalize(path).map_err(|e| SortError::InvalidPath {
        path: path.to_path_buf(),
        reason: format!("cannot resolve path: {e}"),
    })?;

    if !canonical.is_dir() {
        return Err(SortError::InvalidPath {
            path: path.to_path_buf(),
            reason: "path is not a directory".to_string(),
        });
    }
    Ok(canonical)
}

/// Checks that `path` lives inside `root` once `..` segments and symlinks
/// are resolved.
///
/// Only the parent directory has to exist: the leaf may be a file that is
/// about to be created. Returns the canonical parent joined with the leaf.
pub fn validate_within(path: &Path, root: &Path) -> SortResult<PathBuf> {
    let invalid = |reason: String| SortError::InvalidPath {
        path: path.to_path_buf(),
        reason,
    };

    let leaf = path
        .file_name()
        .ok_or_else(|| invalid("path has no file name component".to_string()))?;
    let parent = path
        .parent()
        .ok_or_else(|| invalid("path has no parent directory".to_string()))?;

    let canonical_root =
        fs::canonicalize(root).map_err(|e| invalid(format!("cannot resolve root: {e}")))?;
    let canonical_parent =
        fs::canonicalize(parent).map_err(|e| invalid(format!("cannot resolve parent: {e}")))?;

    if !canonical_parent.starts_with(&canonical_root) {
        return Err(invalid(format!(
            "path escapes target directory {}",
            canonical_root.display()
        )));
    }
    Ok(canonical_parent.join(leaf))
}
