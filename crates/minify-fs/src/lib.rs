//! Filesystem helpers for the ingestion pipeline.
//!
//! - [`StagedFile`] / [`atomic_write`]: write to a temp file in the destination
//!   directory, sync, then rename into place. Downloads use this so an
//!   interrupted transfer never leaves a file that looks present.
//! - [`ScratchArea`]: a per-source-file directory for intermediate artifacts
//!   (filtered rows, spatial indexer output). Everything in it is
//!   removed when the guard drops, on success and failure paths alike.

#![forbid(unsafe_code)]

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtomicWriteError<E>
where
    E: std::error::Error + 'static,
{
    #[error("failed to publish file: {0}")]
    Io(#[from] io::Error),
    #[error("writer failed: {0}")]
    Writer(#[source] E),
}

fn parent_dir_or_dot(path: &Path) -> &Path {
    // `Path::parent` is `Some("")` for bare names like `GaiaSource_000000-003111.csv.gz`.
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// A temp file created next to its destination.
///
/// Nothing is visible at the destination until [`StagedFile::publish`];
/// dropping an unpublished file removes it.
#[derive(Debug)]
pub struct StagedFile {
    tmp: NamedTempFile,
    dest: PathBuf,
}

impl StagedFile {
    pub fn new(dest: impl AsRef<Path>) -> io::Result<Self> {
        let dest = dest.as_ref();
        let dir = parent_dir_or_dot(dest);
        fs::create_dir_all(dir)?;
        let tmp = NamedTempFile::new_in(dir)?;
        Ok(Self {
            tmp,
            dest: dest.to_path_buf(),
        })
    }

    pub fn dest(&self) -> &Path {
        &self.dest
    }

    pub fn file_mut(&mut self) -> &mut File {
        self.tmp.as_file_mut()
    }

    /// Flush and sync the contents, then rename over the destination.
    pub fn publish(self) -> io::Result<()> {
        let Self { mut tmp, dest } = self;
        tmp.as_file_mut().flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|err| err.error)?;

        // The rename itself already happened; a failed directory sync only
        // weakens durability across a crash.
        if let Err(err) = File::open(parent_dir_or_dot(&dest)).and_then(|dir| dir.sync_all()) {
            log::debug!("could not sync directory of {}: {err}", dest.display());
        }
        Ok(())
    }
}

/// Write `dest` through a [`StagedFile`].
///
/// If `write_fn` fails, `dest` is left untouched and the temp file is removed.
pub fn atomic_write<T, E>(
    dest: impl AsRef<Path>,
    write_fn: impl FnOnce(&mut File) -> Result<T, E>,
) -> Result<T, AtomicWriteError<E>>
where
    E: std::error::Error + 'static,
{
    let mut staged = StagedFile::new(dest)?;
    let out = write_fn(staged.file_mut()).map_err(AtomicWriteError::Writer)?;
    staged.publish()?;
    Ok(out)
}

/// File name of a source identifier with any `.gz` suffix removed.
///
/// `GaiaSource_000000-003111.csv.gz` → `GaiaSource_000000-003111.csv`.
pub fn source_stem(source_file_id: &str) -> String {
    let name = Path::new(source_file_id)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_file_id.to_string());
    match name.strip_suffix(".gz") {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

/// Scoped directory holding one source file's intermediate artifacts.
///
/// Artifact names follow the `sm`/`in` prefix convention: `sm<stem>` holds
/// filtered rows handed to the spatial indexer, `in<stem>` its output.
#[derive(Debug)]
pub struct ScratchArea {
    dir: TempDir,
    stem: String,
}

impl ScratchArea {
    /// Create a fresh scratch directory under `root` (created if missing).
    pub fn new_in(root: impl AsRef<Path>, source_file_id: &str) -> io::Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let stem = source_stem(source_file_id);
        let dir = tempfile::Builder::new()
            .prefix(&format!(".minify-{stem}-"))
            .tempdir_in(root)?;
        Ok(Self { dir, stem })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn artifact(&self, prefix: &str) -> PathBuf {
        self.dir.path().join(format!("{prefix}{}", self.stem))
    }

    pub fn filtered_path(&self) -> PathBuf {
        self.artifact("sm")
    }

    pub fn indexed_path(&self) -> PathBuf {
        self.artifact("in")
    }

    /// Remove the directory now and report failures; dropping does the same silently.
    pub fn close(self) -> io::Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|err| {
            log::warn!("failed to remove scratch area {}: {err}", path.display());
            err
        })
    }
}
