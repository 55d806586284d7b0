//! Filesystem utilities

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};

const MAX_PUBLISH_ATTEMPTS: usize = 1000;

/// Create a directory and all parent directories if they don't exist
pub fn create_dir_all(path: &Path) -> io::Result<()> {
    if !path.is_dir() {
        fs::create_dir_all(path)?;
        info!("Created directory: {}", path.display());
    }
    Ok(())
}

/// Hidden sibling of `target` used to stage a file before it is published.
///
/// The process id is part of the name so two processes staging the same
/// target never share a temp file.
pub fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

/// Publish a fully written `staged` file under `target` without clobbering.
///
/// The file becomes visible under its final name in a single link operation.
/// When `target` is taken, `_1`, `_2`, ... is appended to the file stem.
/// The staged file is removed whether or not publishing succeeds. Returns the
/// path the file was published under.
pub fn publish_file(staged: &Path, target: &Path) -> io::Result<PathBuf> {
    let result = link_first_free(staged, target);
    if let Err(e) = fs::remove_file(staged) {
        debug!("could not remove staged file {}: {}", staged.display(), e);
    }
    result
}

fn link_first_free(staged: &Path, target: &Path) -> io::Result<PathBuf> {
    for attempt in 0..MAX_PUBLISH_ATTEMPTS {
        let candidate = suffixed(target, attempt);
        match fs::hard_link(staged, &candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("{} already exists, trying next name", candidate.display());
            }
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name left for {}", target.display()),
    ))
}

fn suffixed(target: &Path, attempt: usize) -> PathBuf {
    if attempt == 0 {
        return target.to_path_buf();
    }
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match target.extension() {
        Some(ext) => format!("{}_{}.{}", stem, attempt, ext.to_string_lossy()),
        None => format!("{}_{}", stem, attempt),
    };
    target.with_file_name(name)
}
