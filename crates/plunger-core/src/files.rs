//! # Record File Discovery
//!
//! Picks the most recently created record file in a directory and recovers
//! example counts from the `-<count>-Records.` marker in file names, so the
//! split sizes are known without scanning file contents.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use regex::Regex;
use tracing::debug;

use crate::error::{PlungerError, Result};

/// Return the entry of `dir` with the latest creation time.
///
/// Hidden entries and subdirectories are ignored. Filesystems that do not
/// report a birth time fall back to the modification time. Ties are broken
/// by file name so the choice is stable.
pub fn latest_file<P: AsRef<Path>>(dir: P) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'));
        if hidden {
            continue;
        }

        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let stamp = meta.created().or_else(|_| meta.modified())?;
        debug!(?path, ?stamp, "record file candidate");

        let replace = match &newest {
            None => true,
            Some((best, best_path)) => stamp > *best || (stamp == *best && path > *best_path),
        };
        if replace {
            newest = Some((stamp, path));
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| PlungerError::EmptyDirectory {
            dir: dir.to_path_buf(),
        })
}

/// Recovers record counts embedded in record file names.
#[derive(Debug, Clone)]
pub struct RecordCounter {
    re_count: Regex,
}

impl RecordCounter {
    /// Create a new counter.
    ///
    /// # Errors
    /// Returns `PlungerError::RegexError` if the pattern fails to compile
    /// (should never happen with the static pattern).
    pub fn new() -> Result<Self> {
        Ok(Self {
            re_count: Regex::new(r"-([0-9]+)-Records\.")?,
        })
    }

    /// Record count embedded in a single file name.
    pub fn count_in<P: AsRef<Path>>(&self, file: P) -> Result<usize> {
        let file = file.as_ref();
        let missing = || PlungerError::RecordCountMissing {
            file: file.to_path_buf(),
        };

        let name = file.file_name().and_then(|n| n.to_str()).ok_or_else(missing)?;
        let caps = self.re_count.captures(name).ok_or_else(missing)?;
        caps[1].parse::<usize>().map_err(|_| missing())
    }

    /// Total record count across `files`. Fails on the first file without a
    /// count marker.
    pub fn count_data_items<P: AsRef<Path>>(&self, files: &[P]) -> Result<usize> {
        files.iter().map(|f| self.count_in(f)).sum()
    }
}

/// Shorthand for [`RecordCounter::count_data_items`].
pub fn count_data_items<P: AsRef<Path>>(files: &[P]) -> Result<usize> {
    RecordCounter::new()?.count_data_items(files)
}
