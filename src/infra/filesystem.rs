//! Filesystem operations
//!
//! Handles artifact cleanup, wildcard path expansion and mount point checks.

use std::path::{Component, Path, PathBuf};

use crate::error::DeviceError;

/// Remove every existing file in `paths`, returning the ones removed.
///
/// Failures are logged and skipped so one stuck file does not keep the
/// others around.
pub fn remove_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for path in paths {
        if !path.exists() {
            continue;
        }
        match std::fs::remove_file(path) {
            Ok(()) => {
                tracing::debug!("Deleted {}", path.display());
                removed.push(path.clone());
            }
            Err(e) => tracing::warn!("Failed to delete {}: {e}", path.display()),
        }
    }
    removed
}

/// Whether `path` is an existing, non-empty regular file
pub fn is_non_empty_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

/// Whether `path` is the root of a mounted filesystem
#[cfg(unix)]
pub fn is_mount_point(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return false;
    };
    if !meta.is_dir() {
        return false;
    }
    let Ok(parent) = std::fs::metadata(path.join("..")) else {
        return false;
    };
    meta.dev() != parent.dev() || meta.ino() == parent.ino()
}

/// Whether `path` is the root of a mounted filesystem
#[cfg(not(unix))]
pub fn is_mount_point(path: &Path) -> bool {
    path.is_dir() && path.parent().is_none()
}

/// Check that `path` is a directory the current user may create files in
pub fn ensure_writable_dir(path: &Path) -> Result<(), DeviceError> {
    let meta = std::fs::metadata(path).map_err(|e| DeviceError::Io {
        path: path.to_path_buf(),
        error: e.to_string(),
    })?;
    if !meta.is_dir() || !can_write(path, &meta) {
        return Err(DeviceError::NotWritable {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn can_write(path: &Path, _meta: &std::fs::Metadata) -> bool {
    use nix::unistd::{access, AccessFlags};
    access(path, AccessFlags::W_OK | AccessFlags::X_OK).is_ok()
}

#[cfg(not(unix))]
fn can_write(_path: &Path, meta: &std::fs::Metadata) -> bool {
    !meta.permissions().readonly()
}

/// Expand a path pattern where `*` inside a component matches any run of
/// characters in that single component. Results are sorted per level.
pub fn expand_pattern(pattern: &str) -> Vec<PathBuf> {
    let pattern = Path::new(pattern);
    let mut candidates = vec![PathBuf::new()];

    for component in pattern.components() {
        let Component::Normal(part) = component else {
            for candidate in &mut candidates {
                candidate.push(component.as_os_str());
            }
            continue;
        };
        let part = part.to_string_lossy();

        if !part.contains('*') {
            for candidate in &mut candidates {
                candidate.push(&*part);
            }
            candidates.retain(|candidate| candidate.exists());
            continue;
        }

        let mut next = Vec::new();
        for dir in &candidates {
            let mut matches: Vec<PathBuf> = walkdir::WalkDir::new(dir)
                .min_depth(1)
                .max_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
                .filter(|entry| wildcard_match(&part, &entry.file_name().to_string_lossy()))
                .map(walkdir::DirEntry::into_path)
                .collect();
            next.append(&mut matches);
        }
        candidates = next;
    }

    candidates.retain(|candidate| candidate.exists());
    candidates
}

/// Match `name` against `pattern`, where `*` matches any run of characters
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !name.starts_with(first) || name.len() < first.len() + last.len() {
        return false;
    }

    let mut rest = &name[first.len()..];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(index) => rest = &rest[index + middle.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}
