//! Destination paths: turning untrusted relative addresses into files
//! that provably live under the destination root.
//!
//! Lexical checks reject absolute paths and `..`. Directory creation then
//! walks one component at a time and refuses to pass through a symlink,
//! so nothing is created outside the root before the check fails.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("empty relative path")]
    Empty,

    #[error("absolute path not allowed: {0}")]
    Absolute(String),

    #[error("parent traversal not allowed: {0}")]
    ParentTraversal(String),

    #[error("path escapes destination root: {0}")]
    EscapesRoot(String),

    #[error("filesystem error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> PathError + '_ {
    move |source| PathError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `<root>/<rel>` after lexical checks. Does not touch the filesystem.
pub fn resolve_destination(root: &Path, rel: &str) -> Result<PathBuf, PathError> {
    Ok(root.join(clean_relative(rel)?))
}

fn clean_relative(rel: &str) -> Result<PathBuf, PathError> {
    let mut clean = PathBuf::new();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir => return Err(PathError::ParentTraversal(rel.to_string())),
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Absolute(rel.to_string()))
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }
    Ok(clean)
}

/// Write `data` to `<root>/<rel>`, creating parent directories. Overwrites
/// an existing regular file.
pub fn write_file(root: &Path, rel: &str, data: &[u8]) -> Result<PathBuf, PathError> {
    let clean = clean_relative(rel)?;
    fs::create_dir_all(root).map_err(io_err(root))?;

    let mut current = root.to_path_buf();
    if let Some(parent) = clean.parent() {
        for part in parent.components() {
            current.push(part);
            ensure_real_dir(&current, rel)?;
        }
    }

    let canonical_root = root.canonicalize().map_err(io_err(root))?;
    let canonical_parent = current.canonicalize().map_err(io_err(&current))?;
    if !canonical_parent.starts_with(&canonical_root) {
        return Err(PathError::EscapesRoot(rel.to_string()));
    }

    let dest = root.join(&clean);
    if let Ok(meta) = fs::symlink_metadata(&dest) {
        if meta.file_type().is_symlink() {
            return Err(PathError::EscapesRoot(rel.to_string()));
        }
    }
    fs::write(&dest, data).map_err(io_err(&dest))?;
    Ok(dest)
}

/// Make sure `dir` is a real directory (not a symlink), creating it if absent.
fn ensure_real_dir(dir: &Path, rel: &str) -> Result<(), PathError> {
    match fs::symlink_metadata(dir) {
        Ok(meta) if meta.file_type().is_symlink() => Err(PathError::EscapesRoot(rel.to_string())),
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(PathError::Io {
            path: dir.to_path_buf(),
            source: io::Error::new(io::ErrorKind::Other, "not a directory"),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => match fs::create_dir(dir) {
            Ok(()) => Ok(()),
            // Another delivery created it first.
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(io_err(dir)(e)),
        },
        Err(e) => Err(io_err(dir)(e)),
    }
}
