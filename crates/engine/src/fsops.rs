//! Filesystem operations the policy engine relies on
//!
//! Path classification, copies that refuse to overwrite, backup moves,
//! relative symlinks, and two RAII guards: a uuid-named temporary directory
//! and a partial-output cleanup guard.

use std::fs;
use std::path::{Component, Path, PathBuf};
use log::{debug, info};
use uuid::Uuid;
use crate::error::EncodeError;

/// What a path points at, without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Missing,
    RegularFile,
    SymbolicLink,
    Directory,
    Other,
}

/// Classify a path without following symlinks
pub fn classify(path: &Path) -> PathKind {
    match fs::symlink_metadata(path) {
        Err(_) => PathKind::Missing,
        Ok(meta) => {
            let ft = meta.file_type();
            if ft.is_symlink() {
                PathKind::SymbolicLink
            } else if ft.is_file() {
                PathKind::RegularFile
            } else if ft.is_dir() {
                PathKind::Directory
            } else {
                PathKind::Other
            }
        }
    }
}

/// File size in bytes
pub fn file_size(path: &Path) -> Result<u64, EncodeError> {
    Ok(fs::metadata(path)?.len())
}

/// Byte-for-byte copy that refuses to overwrite an existing destination
pub fn copy_file(src: &Path, dst: &Path) -> Result<(), EncodeError> {
    if classify(dst) != PathKind::Missing {
        return Err(EncodeError::OutputExists(dst.to_path_buf()));
    }
    info!("copying '{}' to '{}'", src.display(), dst.display());
    fs::copy(src, dst)?;
    Ok(())
}

/// Move a file into a backup directory created next to it, returning the
/// backup path
pub fn backup_original(input: &Path, backup_dir_name: &str) -> Result<PathBuf, EncodeError> {
    let parent = input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let backup_dir = parent.join(backup_dir_name);
    fs::create_dir_all(&backup_dir)?;

    let file_name = input
        .file_name()
        .ok_or_else(|| EncodeError::invalid_input(input, "input path has no file name"))?;
    let backup_path = backup_dir.join(file_name);
    if classify(&backup_path) != PathKind::Missing {
        return Err(EncodeError::OutputExists(backup_path));
    }

    info!("backing up '{}' to '{}'", input.display(), backup_path.display());
    fs::rename(input, &backup_path)?;
    Ok(backup_path)
}

/// Compute the relative path from `base` (a directory) to `target`
///
/// Both paths must be absolute. Walks up with `..` past the shared prefix.
pub fn relative_path_from(base: &Path, target: &Path) -> PathBuf {
    let base_parts: Vec<Component> = base.components().collect();
    let target_parts: Vec<Component> = target.components().collect();

    let common = base_parts
        .iter()
        .zip(target_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base_parts.len() {
        rel.push("..");
    }
    for part in &target_parts[common..] {
        rel.push(part);
    }
    if rel.as_os_str().is_empty() {
        rel.push(".");
    }
    rel
}

/// Create a symlink at `link` pointing to `target` via a relative path
pub fn relative_symlink(target: &Path, link: &Path) -> Result<(), EncodeError> {
    let cwd = std::env::current_dir()?;
    let abs_target = if target.is_absolute() {
        target.to_path_buf()
    } else {
        cwd.join(target)
    };
    let abs_link = if link.is_absolute() {
        link.to_path_buf()
    } else {
        cwd.join(link)
    };
    let link_dir = abs_link
        .parent()
        .ok_or_else(|| EncodeError::invalid_input(link, "link path has no parent directory"))?;

    let rel = relative_path_from(link_dir, &abs_target);
    info!("linking '{}' -> '{}'", link.display(), rel.display());

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(&rel, &abs_link)?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = rel;
        Err(EncodeError::ConversionFailed(
            "symlink replacement is only supported on unix".to_string(),
        ))
    }
}

/// A uuid-named temporary directory, removed recursively on drop
#[derive(Debug)]
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn create() -> Result<Self, EncodeError> {
        let path = std::env::temp_dir().join(format!("reencode-{}", Uuid::new_v4()));
        fs::create_dir_all(&path)?;
        debug!("created temp dir {}", path.display());
        Ok(TempDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            debug!("failed to remove temp dir {}: {}", self.path.display(), e);
        }
    }
}

/// Deletes a partially written output file on drop unless disarmed
///
/// Armed before the external encoder is invoked and disarmed once it has
/// exited successfully, so a failure at any point between the two leaves no
/// partial output behind.
#[derive(Debug)]
pub struct CleanupGuard {
    path: PathBuf,
    armed: bool,
}

impl CleanupGuard {
    pub fn arm(path: &Path) -> Self {
        CleanupGuard {
            path: path.to_path_buf(),
            armed: true,
        }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if self.armed && classify(&self.path) != PathKind::Missing {
            debug!("removing partial output {}", self.path.display());
            let _ = fs::remove_file(&self.path);
        }
    }
}
