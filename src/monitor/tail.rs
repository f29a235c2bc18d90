//! Incremental reader for a growing log file
//!
//! Starts at the end of the file, hands out complete lines as they are
//! appended, and restarts from the beginning when the file shrinks.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Longest line kept in memory; longer lines are dropped
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Read cursor into the monitored file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogPosition {
    /// Bytes consumed so far (including a pending partial line)
    pub offset: u64,
    /// Last observed file size, never below `offset`
    pub size: u64,
}

/// Tail reader over a single log file
#[derive(Debug)]
pub struct LogTail {
    path: PathBuf,
    reader: BufReader<File>,
    position: LogPosition,
    /// Bytes of a line whose newline has not been written yet
    partial: Vec<u8>,
    max_line_bytes: usize,
    /// Skipping the remainder of an oversized line
    discarding: bool,
}

impl LogTail {
    /// Open the file with the cursor at its current end, so old lines are skipped
    pub fn open_at_end(path: &Path) -> Result<Self> {
        let file = open_log(path)?;
        let size = file
            .metadata()
            .with_context(|| format!("Failed to stat log file: {}", path.display()))?
            .len();

        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(size))
            .with_context(|| format!("Failed to seek log file: {}", path.display()))?;

        debug!("Tailing {} from byte {}", path.display(), size);

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            position: LogPosition { offset: size, size },
            partial: Vec::new(),
            max_line_bytes: MAX_LINE_BYTES,
            discarding: false,
        })
    }

    pub fn with_max_line_bytes(mut self, max_line_bytes: usize) -> Self {
        self.max_line_bytes = max_line_bytes.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn position(&self) -> LogPosition {
        self.position
    }

    /// Next complete line without its line terminator, or `None` if nothing new.
    ///
    /// A trailing fragment without newline is buffered until the rest arrives.
    /// A line longer than the limit is dropped up to its newline. Invalid UTF-8
    /// is replaced rather than rejected.
    pub fn next_line(&mut self) -> Result<Option<String>> {
        loop {
            // Room for a full-length line plus its newline
            let limit = (self.max_line_bytes + 1).saturating_sub(self.partial.len());
            let read = (&mut self.reader)
                .take(limit as u64)
                .read_until(b'\n', &mut self.partial)
                .with_context(|| format!("Failed to read log file: {}", self.path.display()))?;

            self.position.offset += read as u64;
            self.position.size = self.position.size.max(self.position.offset);

            let complete = self.partial.last() == Some(&b'\n');

            if self.discarding {
                self.partial.clear();
                self.discarding = !complete;
                if read == 0 {
                    return Ok(None);
                }
                continue;
            }

            if !complete {
                if self.partial.len() > self.max_line_bytes {
                    warn!(
                        "Dropping log line longer than {} bytes at byte {} of {}",
                        self.max_line_bytes,
                        self.position.offset,
                        self.path.display()
                    );
                    self.partial.clear();
                    self.discarding = true;
                    continue;
                }
                return Ok(None);
            }

            let bytes = std::mem::take(&mut self.partial);
            let line = String::from_utf8_lossy(&bytes);
            return Ok(Some(line.trim_end_matches(['\n', '\r']).to_string()));
        }
    }

    /// Compare the file's current size with the last known one.
    ///
    /// Returns `true` when the file shrank; the file is then reopened and read
    /// from byte 0. A file that is truncated and regrown past the old size
    /// between two checks goes unnoticed. A vanished file is an error.
    pub fn check_rotation(&mut self) -> Result<bool> {
        let current = std::fs::metadata(&self.path)
            .with_context(|| format!("Log file is no longer accessible: {}", self.path.display()))?
            .len();

        if current >= self.position.size {
            self.position.size = current;
            return Ok(false);
        }

        info!(
            "Log file shrank from {} to {} bytes, reading from the start: {}",
            self.position.size,
            current,
            self.path.display()
        );

        // Reopen so a replaced file is followed instead of the old handle
        let file = open_log(&self.path)?;
        self.reader = BufReader::new(file);
        self.partial.clear();
        self.discarding = false;
        self.position = LogPosition {
            offset: 0,
            size: current,
        };

        Ok(true)
    }
}

fn open_log(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open log file: {}", path.display()))
}
