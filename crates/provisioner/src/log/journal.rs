//! JSON-lines journal backing [`super::LocalLog`].
//!
//! Every mutation is appended as one line and synced before it is applied in
//! memory. On open the journal is replayed; a torn final line (crash mid-write)
//! is skipped and cut off the file so later writes start on a clean line.
//! [`Journal::rewrite`] replaces the file with a compacted snapshot.

use super::LogError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const JOURNAL_FILE: &str = "log.journal";
const SNAPSHOT_FILE: &str = "log.journal.tmp";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEntry {
    Append {
        topic: String,
        partition: i32,
        offset: i64,
        /// Base64 (standard alphabet).
        key: String,
        value: String,
        appended_at: DateTime<Utc>,
    },
    Commit {
        group: String,
        topic: String,
        partition: i32,
        offset: i64,
    },
    Trim {
        topic: String,
        partition: i32,
        log_start: i64,
    },
}

impl JournalEntry {
    pub fn append(
        topic: &str,
        partition: i32,
        offset: i64,
        key: &[u8],
        value: &[u8],
        appended_at: DateTime<Utc>,
    ) -> Self {
        JournalEntry::Append {
            topic: topic.to_string(),
            partition,
            offset,
            key: STANDARD.encode(key),
            value: STANDARD.encode(value),
            appended_at,
        }
    }
}

/// Decode the base64 payload of a replayed `Append` entry.
pub fn decode_bytes(encoded: &str) -> Result<Vec<u8>, LogError> {
    STANDARD
        .decode(encoded)
        .map_err(|e| LogError::Io(format!("corrupt journal payload: {e}")))
}

pub struct Journal {
    dir: PathBuf,
    file: File,
    /// Entries currently in the file.
    lines: usize,
}

/// What replay found in an existing journal file.
#[derive(Debug, Default)]
struct Replayed {
    entries: Vec<JournalEntry>,
    /// Bytes up to and including the last entry that parsed.
    valid_len: u64,
    /// The last good entry was written without its trailing newline.
    missing_newline: bool,
}

impl Journal {
    /// Open (creating if needed) the journal in `dir` and return the entries
    /// it already holds, oldest first.
    pub fn open(dir: &Path) -> Result<(Self, Vec<JournalEntry>), LogError> {
        fs::create_dir_all(dir).map_err(io_err)?;
        let path = dir.join(JOURNAL_FILE);

        let replayed = if path.exists() {
            read_entries(&path)?
        } else {
            Replayed::default()
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        let on_disk = file.metadata().map_err(io_err)?.len();
        if on_disk > replayed.valid_len {
            warn!(
                target: "provisioner.log",
                discarded_bytes = on_disk - replayed.valid_len,
                "Truncating torn journal tail"
            );
            file.set_len(replayed.valid_len).map_err(io_err)?;
        }
        if replayed.missing_newline {
            file.write_all(b"\n").map_err(io_err)?;
        }
        if on_disk > replayed.valid_len || replayed.missing_newline {
            file.sync_data().map_err(io_err)?;
        }

        Ok((
            Self {
                dir: dir.to_path_buf(),
                file,
                lines: replayed.entries.len(),
            },
            replayed.entries,
        ))
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn write(&mut self, entry: &JournalEntry) -> Result<(), LogError> {
        let mut line =
            serde_json::to_vec(entry).map_err(|e| LogError::Io(format!("encode entry: {e}")))?;
        line.push(b'\n');
        self.file.write_all(&line).map_err(io_err)?;
        self.file.sync_data().map_err(io_err)?;
        self.lines += 1;
        Ok(())
    }

    /// Replace the journal with `entries`. Written to a temporary file first
    /// and renamed over the live journal.
    pub fn rewrite(&mut self, entries: &[JournalEntry]) -> Result<(), LogError> {
        let tmp_path = self.dir.join(SNAPSHOT_FILE);
        let path = self.dir.join(JOURNAL_FILE);

        {
            let mut tmp = File::create(&tmp_path).map_err(io_err)?;
            for entry in entries {
                let mut line = serde_json::to_vec(entry)
                    .map_err(|e| LogError::Io(format!("encode entry: {e}")))?;
                line.push(b'\n');
                tmp.write_all(&line).map_err(io_err)?;
            }
            tmp.sync_all().map_err(io_err)?;
        }

        fs::rename(&tmp_path, &path).map_err(io_err)?;
        self.file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(io_err)?;
        self.lines = entries.len();
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<Replayed, LogError> {
    let bytes = fs::read(path).map_err(io_err)?;
    let mut replayed = Replayed::default();
    let mut consumed = 0u64;

    let mut lines = bytes.split_inclusive(|b| *b == b'\n').enumerate().peekable();
    while let Some((index, raw)) = lines.next() {
        consumed += raw.len() as u64;
        let is_last = lines.peek().is_none();
        let line = raw.strip_suffix(b"\n");
        let terminated = line.is_some();
        let line = line.unwrap_or(raw);

        if line.iter().all(u8::is_ascii_whitespace) {
            if terminated {
                replayed.valid_len = consumed;
                replayed.missing_newline = false;
            }
            continue;
        }

        match serde_json::from_slice::<JournalEntry>(line) {
            Ok(entry) => {
                replayed.entries.push(entry);
                replayed.valid_len = consumed;
                replayed.missing_newline = !terminated;
            }
            Err(e) if is_last => {
                warn!(
                    target: "provisioner.log",
                    error = %e,
                    "Skipping torn journal entry at end of file"
                );
            }
            Err(e) => {
                return Err(LogError::Io(format!(
                    "corrupt journal entry at line {}: {e}",
                    index + 1
                )));
            }
        }
    }
    Ok(replayed)
}

fn io_err(e: std::io::Error) -> LogError {
    LogError::Io(e.to_string())
}
