use filetime::{set_file_mtime, FileTime};
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use walkdir::WalkDir;

pub const MODS_DIR_NAME: &str = "mods";

#[derive(Debug, Error)]
pub enum ReplaceError {
    #[error("no 'mods' folder found at {path}; pick the folder that CONTAINS 'mods'")]
    SourceNotFound { path: PathBuf },
    #[error("source and destination overlap at {path}")]
    SameLocation { path: PathBuf },
    #[error("could not remove the destination mods folder {path}: {source}")]
    DestinationCleanupFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not copy the mods folder to {path}: {source}")]
    CopyFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceRequest {
    pub origin_root: PathBuf,
    pub destination_root: PathBuf,
}

impl ReplaceRequest {
    pub fn new(origin_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            origin_root: origin_root.into(),
            destination_root: destination_root.into(),
        }
    }

    pub fn source_mods(&self) -> PathBuf {
        self.origin_root.join(MODS_DIR_NAME)
    }

    pub fn destination_mods(&self) -> PathBuf {
        self.destination_root.join(MODS_DIR_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Success { destination: PathBuf, files: usize },
    Cancelled,
}

/// Gate consulted once before anything in the destination is touched.
pub trait ConfirmReplace {
    fn confirm(&mut self, source: &Path, destination: &Path) -> bool;
}

impl<F> ConfirmReplace for F
where
    F: FnMut(&Path, &Path) -> bool,
{
    fn confirm(&mut self, source: &Path, destination: &Path) -> bool {
        self(source, destination)
    }
}

/// Replaces `destination_root/mods` with a full copy of `origin_root/mods`.
///
/// Nothing is rolled back: a failed removal or copy leaves the destination
/// in whatever state the filesystem reached.
pub fn replace(
    request: &ReplaceRequest,
    confirm: &mut dyn ConfirmReplace,
) -> Result<ReplaceOutcome, ReplaceError> {
    let source = request.source_mods();
    let destination = request.destination_mods();

    if !source.is_dir() {
        return Err(ReplaceError::SourceNotFound { path: source });
    }
    if overlaps(&source, &destination) {
        return Err(ReplaceError::SameLocation { path: destination });
    }

    if !confirm.confirm(&source, &destination) {
        tracing::info!(source = %source.display(), "replace cancelled");
        return Ok(ReplaceOutcome::Cancelled);
    }

    if fs::symlink_metadata(&destination).is_ok() {
        remove_existing(&destination).map_err(|source| ReplaceError::DestinationCleanupFailed {
            path: destination.clone(),
            source,
        })?;
        tracing::info!(path = %destination.display(), "removed destination mods");
    }

    let files = copy_dir(&source, &destination).map_err(|source| ReplaceError::CopyFailed {
        path: destination.clone(),
        source,
    })?;
    tracing::info!(
        source = %source.display(),
        destination = %destination.display(),
        files,
        "mods folder replaced"
    );

    Ok(ReplaceOutcome::Success { destination, files })
}

// Links are removed, never followed. Windows directory links and junctions
// need `remove_dir` rather than `remove_file`.
fn remove_existing(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return fs::remove_file(path).or_else(|err| {
            if path.is_dir() {
                fs::remove_dir(path)
            } else {
                Err(err)
            }
        });
    }
    if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Recursively copies `source` into `dest`, returning the number of files.
pub fn copy_dir(source: &Path, dest: &Path) -> io::Result<usize> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut files = 0;
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            preserve_mtime(entry.path(), &target);
            files += 1;
        }
    }
    Ok(files)
}

fn preserve_mtime(source: &Path, dest: &Path) {
    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    let mtime = FileTime::from_last_modification_time(&meta);
    let _ = set_file_mtime(dest, mtime);
}

fn overlaps(source: &Path, destination: &Path) -> bool {
    let Ok(source) = source.canonicalize() else {
        return false;
    };
    let Some(destination) = resolve_lenient(destination) else {
        return false;
    };
    source.starts_with(&destination) || destination.starts_with(&source)
}

// Canonicalizes the deepest existing ancestor so not-yet-created
// destinations still compare correctly.
fn resolve_lenient(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = path.canonicalize() {
        return Some(resolved);
    }
    let parent = path.parent()?;
    let name = path.file_name()?;
    Some(resolve_lenient(parent)?.join(name))
}
