//! Collision-free destination paths.
//!
//! An occupied `Documents/report.pdf` becomes `Documents/report (1).pdf`,
//! then `report (2).pdf`, and so on. The suffix goes before the last
//! extension (`a.tar (1).gz`); dot-files get it appended (`.env (1)`).

use std::path::{Path, PathBuf};

/// True when anything, including a dangling symlink, sits at `path`.
fn is_occupied(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// Returns `desired` if it is free, otherwise the first free numbered
/// variant. Must be called right before the move it is used for.
pub fn resolve(desired: &Path) -> PathBuf {
    if !is_occupied(desired) {
        return desired.to_path_buf();
    }

    let file_name = desired
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, ext) = split_name(&file_name);

    let mut counter: u64 = 1;
    loop {
        let candidate = desired.with_file_name(format!("{stem} ({counter}){ext}"));
        if !is_occupied(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Splits `name` into the part that gets the counter and the extension
/// (including its dot) that is preserved.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(idx) => name.split_at(idx),
    }
}
