//! Bounded run log
//!
//! Every invocation appends to one log file. Rotation is an explicit step run
//! at start and end of a run; it keeps only the newest `max_lines` lines.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Append-only log file with a line budget
#[derive(Debug, Clone)]
pub struct RunLog {
    path: PathBuf,
    max_lines: usize,
}

impl RunLog {
    /// Create a handle; nothing touches the disk yet
    pub fn new(path: impl Into<PathBuf>, max_lines: usize) -> Self {
        Self {
            path: path.into(),
            max_lines,
        }
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop the oldest lines beyond the budget. Returns how many were dropped.
    pub fn rotate(&self) -> io::Result<usize> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let lines: Vec<&str> = content.lines().collect();
        if lines.len() <= self.max_lines {
            return Ok(0);
        }

        let dropped = lines.len() - self.max_lines;
        let mut kept = lines[dropped..].join("\n");
        if !kept.is_empty() {
            kept.push('\n');
        }

        let staging = self.path.with_extension("log.tmp");
        fs::write(&staging, kept)?;
        fs::rename(&staging, &self.path)?;
        Ok(dropped)
    }

    /// Open the file for appending, creating it and its directory if needed
    pub fn open_appender(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }
}
