//! smartsort - keeps a folder tidy by sorting its files into category subfolders
//!
//! This library provides the pieces behind the `smartsort` binary: an extension
//! based rule table, content hashing for duplicate detection, an organizer that
//! moves files without ever overwriting, a bounded history with single-step undo,
//! and a watcher that organizes files once they stop changing.

pub mod cli;
pub mod config;
pub mod file_category;
pub mod file_organizer;
pub mod hasher;
pub mod history;
pub mod instance_lock;
pub mod logging;
pub mod output;
pub mod stats;
pub mod undo;
pub mod watcher;

pub use config::{AppConfig, CompiledFilters, ConfigError};
pub use file_category::{RuleTable, SharedRules};
pub use file_organizer::{Organizer, OrganizerOptions, Outcome, SkipReason};
pub use history::{HistoryEntry, HistoryLog};
pub use undo::{UndoError, UndoManager};
pub use watcher::{FileAppeared, Watcher, WatcherSettings};

pub use cli::{OrganizeCommand, run_cli};
