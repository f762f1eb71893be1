//! Directory listing and file reads over a local model directory

use modelhost_core::{Error, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Whether a directory entry name is hidden (leading dot)
pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Names of the regular files directly under `root`
pub fn list_files(root: &Path, skip_hidden: bool) -> Result<BTreeSet<String>> {
    list_entries(root, |file_type| file_type.is_file(), skip_hidden)
}

/// Names of the subdirectories directly under `root`
pub fn list_subdirectories(root: &Path) -> Result<BTreeSet<String>> {
    list_entries(root, |file_type| file_type.is_dir(), false)
}

/// Read a whole file as opaque bytes
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::io(path, e))
}

/// Total size in bytes of every file below `path`
pub fn directory_size(path: &Path) -> Result<u64> {
    let mut total = 0;
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.map_err(|e| {
            let at = e.path().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf());
            Error::io(at, e.into())
        })?;
        if entry.file_type().is_file() {
            let metadata = entry.metadata().map_err(|e| Error::io(entry.path(), e.into()))?;
            total += metadata.len();
        }
    }
    Ok(total)
}

/// Copy the tree under `src` into `dst`, creating directories as needed
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64> {
    let mut copied = 0;
    for entry in walkdir::WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            let at = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            Error::io(at, e.into())
        })?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::internal(format!("walk escaped {}: {}", src.display(), e)))?;
        let target: PathBuf = dst.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
        } else if entry.file_type().is_file() {
            copied += std::fs::copy(entry.path(), &target).map_err(|e| Error::io(&target, e))?;
        }
    }
    Ok(copied)
}

/// Stage `src` at `dst` without duplicating its bytes when possible
///
/// Hard-links the resolved target of `src`; falls back to a copy when the
/// link fails (for example across filesystems). Returns true when linked.
pub fn link_or_copy(src: &Path, dst: &Path) -> Result<bool> {
    let resolved = std::fs::canonicalize(src).map_err(|e| Error::io(src, e))?;
    match std::fs::hard_link(&resolved, dst) {
        Ok(()) => Ok(true),
        Err(e) => {
            debug!("Hard link {} -> {} failed ({}), copying", resolved.display(), dst.display(), e);
            std::fs::copy(&resolved, dst).map_err(|e| Error::io(dst, e))?;
            Ok(false)
        }
    }
}

fn list_entries(
    root: &Path,
    keep: impl Fn(&std::fs::FileType) -> bool,
    skip_hidden: bool,
) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();

    let entries = std::fs::read_dir(root).map_err(|e| Error::io(root, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(root, e))?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(raw) => {
                warn!("Skipping non-UTF-8 entry {:?} in {}", raw, root.display());
                continue;
            }
        };
        if skip_hidden && is_hidden(&name) {
            continue;
        }

        // Follows symlinks so linked payloads classify like their targets
        let path = entry.path();
        let metadata = std::fs::metadata(&path).map_err(|e| Error::io(&path, e))?;
        if keep(&metadata.file_type()) {
            names.insert(name);
        }
    }

    Ok(names)
}
