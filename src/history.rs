/// Bounded history of completed moves.
///
/// Every successful move is recorded as a [`HistoryEntry`]. The log keeps the most
/// recent [`HISTORY_LIMIT`] entries, drops the oldest on overflow, and is persisted
/// as a JSON array next to the organized files so it survives restarts.
use crate::hasher::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum number of entries kept in the log.
pub const HISTORY_LIMIT: usize = 100;

/// Name of the history file inside the organized folder.
pub const HISTORY_FILE_NAME: &str = ".smartsort_history.json";

/// Errors reading or writing the history file.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Failed to write history file.
    #[error("Failed to write history file {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to read history file.
    #[error("Failed to read history file {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// History file has invalid format.
    #[error("Invalid history file format: {reason}")]
    InvalidFormat { reason: String },
}

/// A record of one completed move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonically increasing sequence number.
    pub seq: u64,
    /// When the move completed.
    pub timestamp: DateTime<Utc>,
    /// Where the file was before the move.
    pub source: PathBuf,
    /// Where the file was moved to.
    pub destination: PathBuf,
    /// Category folder the file went to (the duplicates folder for duplicates).
    pub category: String,
    /// Content digest, when duplicate detection was enabled.
    #[serde(default)]
    pub digest: Option<ContentHash>,
}

/// The fields of a move that the caller knows; sequence and time are assigned on record.
#[derive(Debug, Clone)]
pub struct MoveRecord {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: String,
    pub digest: Option<ContentHash>,
}

/// Append-only log of moves, capped at [`HISTORY_LIMIT`] entries.
#[derive(Debug, Clone)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    next_seq: u64,
    generation: u64,
}

impl HistoryLog {
    /// Creates an empty log whose first entry gets sequence number 1.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(HISTORY_LIMIT),
            next_seq: 1,
            generation: 0,
        }
    }

    /// Rebuilds a log from previously persisted entries.
    ///
    /// Entries are ordered by sequence number and only the newest
    /// [`HISTORY_LIMIT`] are kept.
    pub fn from_entries(mut entries: Vec<HistoryEntry>) -> Self {
        entries.sort_by_key(|e| e.seq);
        let next_seq = entries.last().map(|e| e.seq + 1).unwrap_or(1);
        let skip = entries.len().saturating_sub(HISTORY_LIMIT);

        Self {
            entries: entries.into_iter().skip(skip).collect(),
            next_seq,
            generation: 0,
        }
    }

    /// Appends a move, evicting the oldest entry if the log is full.
    pub fn record(&mut self, record: MoveRecord) -> HistoryEntry {
        let entry = HistoryEntry {
            seq: self.next_seq,
            timestamp: Utc::now(),
            source: record.source,
            destination: record.destination,
            category: record.category,
            digest: record.digest,
        };
        self.next_seq += 1;

        if self.entries.len() == HISTORY_LIMIT {
            self.entries.pop_front();
        }
        self.entries.push_back(entry.clone());
        self.generation += 1;
        entry
    }

    /// The most recent entry, if any.
    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.back()
    }

    /// Removes and returns the most recent entry.
    pub fn pop_last(&mut self) -> Option<HistoryEntry> {
        let entry = self.entries.pop_back();
        if entry.is_some() {
            self.generation += 1;
        }
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Copies out all entries, oldest first.
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Counter that changes whenever the log is modified.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the path to the history file for a given folder.
    pub fn file_path(root: &Path) -> PathBuf {
        root.join(HISTORY_FILE_NAME)
    }

    /// Loads a log from `path`; a missing file yields an empty log.
    pub fn load(path: &Path) -> Result<Self, HistoryError> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let json = fs::read_to_string(path).map_err(|source| HistoryError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;

        let entries: Vec<HistoryEntry> =
            serde_json::from_str(&json).map_err(|e| HistoryError::InvalidFormat {
                reason: format!("JSON parse error: {}", e),
            })?;

        Ok(Self::from_entries(entries))
    }

    /// Saves the log to `path` as pretty-printed JSON.
    ///
    /// The file is written under a temporary name and renamed into place, so a
    /// crash mid-write never leaves a truncated history behind.
    pub fn save(&self, path: &Path) -> Result<(), HistoryError> {
        let entries: Vec<&HistoryEntry> = self.entries.iter().collect();
        let json =
            serde_json::to_string_pretty(&entries).map_err(|e| HistoryError::InvalidFormat {
                reason: format!("JSON serialization failed: {}", e),
            })?;

        let write_err = |source| HistoryError::WriteFailed {
            path: path.to_path_buf(),
            source,
        };

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(write_err)?;
        fs::rename(&tmp_path, path).map_err(write_err)?;
        Ok(())
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new()
    }
}
