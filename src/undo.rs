/// Undo functionality for reverting the most recent move.
///
/// Undo is strictly single-step: it moves the file recorded by the newest
/// [`HistoryEntry`] back to where it came from. Nothing is overwritten; if the
/// original location is taken or the moved file is gone, the log is left as it was.
use crate::history::{HistoryEntry, HistoryLog};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// Why an undo could not be performed.
#[derive(Debug, Error)]
pub enum UndoError {
    /// There is nothing to undo.
    #[error("No operations to undo")]
    EmptyHistory,
    /// The file is no longer where it was moved to.
    #[error("File no longer exists at {}", destination.display())]
    DestinationMissing { destination: PathBuf },
    /// Something now occupies the original location.
    #[error("Cannot restore: {} already exists", source_path.display())]
    SourceOccupied { source_path: PathBuf },
    /// Undo is turned off in the configuration.
    #[error("Undo is disabled")]
    Disabled,
    /// The move back failed.
    #[error("Failed to move {} back to {}: {error}", destination.display(), source_path.display())]
    Io {
        destination: PathBuf,
        source_path: PathBuf,
        #[source]
        error: std::io::Error,
    },
}

/// The entry that was reversed.
#[derive(Debug, Clone)]
pub struct UndoneEntry {
    pub entry: HistoryEntry,
}

impl UndoneEntry {
    /// Path the file was restored to.
    pub fn restored_path(&self) -> &std::path::Path {
        &self.entry.source
    }
}

/// Reverses history entries.
pub struct UndoManager;

impl UndoManager {
    /// Undoes the most recent move recorded in `log`.
    ///
    /// Checks are made in this order:
    /// 1. **Empty log**: [`UndoError::EmptyHistory`]
    /// 2. **File gone from its destination**: [`UndoError::DestinationMissing`]
    /// 3. **Original path taken**: [`UndoError::SourceOccupied`]
    ///
    /// A missing parent folder of the original path is recreated. The entry is
    /// removed from the log only after the file is back in place.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use smartsort::history::HistoryLog;
    /// use smartsort::undo::UndoManager;
    /// use std::path::Path;
    ///
    /// let path = HistoryLog::file_path(Path::new("/path/to/inbox"));
    /// let mut log = HistoryLog::load(&path).unwrap();
    /// match UndoManager::undo_last(&mut log) {
    ///     Ok(undone) => println!("Restored {}", undone.restored_path().display()),
    ///     Err(e) => eprintln!("Undo failed: {}", e),
    /// }
    /// ```
    pub fn undo_last(log: &mut HistoryLog) -> Result<UndoneEntry, UndoError> {
        let entry = log.last().ok_or(UndoError::EmptyHistory)?;

        if !entry.destination.is_file() {
            return Err(UndoError::DestinationMissing {
                destination: entry.destination.clone(),
            });
        }

        // symlink_metadata so a dangling link at the source still counts as taken
        if fs::symlink_metadata(&entry.source).is_ok() {
            return Err(UndoError::SourceOccupied {
                source_path: entry.source.clone(),
            });
        }

        let io_err = |error| UndoError::Io {
            destination: entry.destination.clone(),
            source_path: entry.source.clone(),
            error,
        };

        if let Some(parent) = entry.source.parent()
            && !parent.exists()
        {
            debug!("Recreating {}", parent.display());
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        fs::rename(&entry.destination, &entry.source).map_err(io_err)?;

        info!(
            "Undone: {} -> {}",
            entry.destination.display(),
            entry.source.display()
        );

        let entry = log.pop_last().ok_or(UndoError::EmptyHistory)?;
        Ok(UndoneEntry { entry })
    }
}
