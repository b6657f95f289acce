/// File organization: deciding where a file goes and moving it there.
///
/// An [`Organizer`] owns one watched folder. For each file it resolves a category
/// from the extension, optionally checks the content digest against files it has
/// already sorted, moves the file into `root/<category>` (or `root/Duplicates`)
/// without overwriting anything, and records the move for undo and statistics.
///
/// The organizer is shared between the watcher thread and the interactive
/// commands, so all of its methods take `&self`.
use crate::config::{AppConfig, CompiledFilters};
use crate::file_category::{DUPLICATES_DIR, RuleTable, SharedRules, extension_of};
use crate::hasher::{self, ContentHash};
use crate::history::{HISTORY_FILE_NAME, HistoryEntry, HistoryLog, MoveRecord};
use crate::instance_lock::LOCK_FILE_NAME;
use crate::stats::{CategoryStats, StatsAggregator};
use crate::undo::{UndoError, UndoManager, UndoneEntry};
use crate::watcher::FileAppeared;
use dashmap::{DashMap, DashSet};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long a file restored by undo is left alone by the watcher.
pub const RESTORE_GRACE: Duration = Duration::from_secs(30);

/// Errors that can occur while moving a file.
#[derive(Debug, Error)]
pub enum OrganizeError {
    /// Failed to create a category directory.
    #[error("Failed to create directory {}: {source}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to move a file to its category directory.
    #[error("Failed to move {} to {}: {error}", source_path.display(), destination.display())]
    FileMoveFailure {
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        error: std::io::Error,
    },
    /// The base directory path is invalid or doesn't exist.
    #[error("Invalid base path {}: {source}", path.display())]
    InvalidBasePath {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for file organization operations.
pub type OrganizeResult<T> = Result<T, OrganizeError>;

/// Why a file was left where it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Not a regular file, or it vanished.
    NotAFile,
    /// Not directly inside the organized folder.
    OutsideRoot,
    /// One of smartsort's own bookkeeping files.
    Internal,
    /// Excluded by the configured filters.
    Filtered,
    /// Another invocation is already handling this path.
    InFlight,
    /// The file was just put back by undo.
    RecentlyRestored,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::NotAFile => "not a regular file",
            SkipReason::OutsideRoot => "not in the organized folder",
            SkipReason::Internal => "internal file",
            SkipReason::Filtered => "excluded by filters",
            SkipReason::InFlight => "already being organized",
            SkipReason::RecentlyRestored => "recently restored by undo",
        };
        f.write_str(reason)
    }
}

/// What happened to one file.
#[derive(Debug)]
pub enum Outcome {
    /// Moved into its category folder.
    Moved {
        destination: PathBuf,
        category: String,
    },
    /// Same content as an already organized file; moved into the duplicates folder.
    Duplicate {
        destination: PathBuf,
        existing: PathBuf,
    },
    /// Left in place.
    Skipped(SkipReason),
    /// The move failed; the file is still at its original path.
    Failed(OrganizeError),
}

impl Outcome {
    /// Where the file ended up, for moved and duplicate outcomes.
    pub fn destination(&self) -> Option<&Path> {
        match self {
            Outcome::Moved { destination, .. } | Outcome::Duplicate { destination, .. } => {
                Some(destination)
            }
            _ => None,
        }
    }

    pub fn is_moved(&self) -> bool {
        self.destination().is_some()
    }
}

/// Everything learned about one file while organizing it.
#[derive(Debug)]
pub struct FileRecord {
    pub source: PathBuf,
    /// Normalized extension, empty if none.
    pub extension: String,
    /// Category from the rule table (before any duplicate redirection).
    pub category: String,
    /// Content digest, when duplicate detection ran and succeeded.
    pub digest: Option<ContentHash>,
    pub outcome: Outcome,
}

impl FileRecord {
    fn skipped(source: &Path, reason: SkipReason) -> Self {
        Self {
            source: source.to_path_buf(),
            extension: extension_of(source),
            category: String::new(),
            digest: None,
            outcome: Outcome::Skipped(reason),
        }
    }
}

/// Outcome of organizing a whole folder.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub records: Vec<FileRecord>,
}

impl BatchReport {
    pub fn moved(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Moved { .. }))
    }

    pub fn duplicates(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Duplicate { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// A dry-run prediction for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub source: PathBuf,
    /// Folder name the file would go to.
    pub folder: String,
    /// Predicted destination, after collision resolution.
    pub destination: PathBuf,
    /// Already organized file with the same content, if any.
    pub duplicate_of: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IndexSlot {
    /// A move with this content is in progress.
    Reserved(PathBuf),
    /// A file with this content was moved here.
    Placed(PathBuf),
}

impl IndexSlot {
    fn path(&self) -> &Path {
        match self {
            IndexSlot::Reserved(p) | IndexSlot::Placed(p) => p,
        }
    }
}

/// Result of checking a digest against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestClaim {
    /// First file with this content; the planned destination is now reserved.
    Reserved,
    /// Content already seen at this path.
    Duplicate(PathBuf),
}

/// Maps content digests to the first destination that content was moved to.
///
/// Not persisted; it is rebuilt from the history log when an organizer starts.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    slots: HashMap<ContentHash, IndexSlot>,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the index from history, oldest entry first.
    ///
    /// Entries in the duplicates folder and files that no longer exist are ignored.
    pub fn rehydrate<'a>(entries: impl IntoIterator<Item = &'a HistoryEntry>) -> Self {
        let mut index = Self::new();
        for entry in entries {
            let Some(digest) = entry.digest else { continue };
            if entry.category == DUPLICATES_DIR || !entry.destination.is_file() {
                continue;
            }
            index
                .slots
                .entry(digest)
                .or_insert_with(|| IndexSlot::Placed(entry.destination.clone()));
        }
        index
    }

    /// Looks up where content with `digest` was first placed.
    pub fn lookup(&self, digest: &ContentHash) -> Option<&Path> {
        self.slots.get(digest).map(IndexSlot::path)
    }

    /// Checks `digest` and reserves `planned` for it if it is new.
    ///
    /// A placed file that has since disappeared no longer counts.
    pub fn claim(&mut self, digest: ContentHash, planned: PathBuf) -> DigestClaim {
        match self.slots.get(&digest) {
            Some(IndexSlot::Placed(existing)) if existing.is_file() => {
                DigestClaim::Duplicate(existing.clone())
            }
            Some(IndexSlot::Reserved(existing)) => DigestClaim::Duplicate(existing.clone()),
            _ => {
                self.slots.insert(digest, IndexSlot::Reserved(planned));
                DigestClaim::Reserved
            }
        }
    }

    /// Marks a reservation as done, at the path the file actually landed on.
    pub fn confirm(&mut self, digest: ContentHash, destination: PathBuf) {
        self.slots.insert(digest, IndexSlot::Placed(destination));
    }

    /// Drops a reservation after a failed move.
    pub fn release(&mut self, digest: &ContentHash) {
        if matches!(self.slots.get(digest), Some(IndexSlot::Reserved(_))) {
            self.slots.remove(digest);
        }
    }

    /// Forgets `digest` if it points at `destination` (the file was moved away).
    pub fn forget(&mut self, digest: &ContentHash, destination: &Path) {
        if self.lookup(digest) == Some(destination) {
            self.slots.remove(digest);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Behaviour switches for an [`Organizer`].
#[derive(Debug, Clone)]
pub struct OrganizerOptions {
    pub enable_duplicates: bool,
    pub enable_undo: bool,
    pub filters: CompiledFilters,
}

impl Default for OrganizerOptions {
    fn default() -> Self {
        Self {
            enable_duplicates: true,
            enable_undo: true,
            filters: CompiledFilters::default(),
        }
    }
}

struct State {
    history: HistoryLog,
    duplicates: DuplicateIndex,
}

/// Claim on a source path; released when dropped.
struct InFlightClaim<'a> {
    set: &'a DashSet<PathBuf>,
    path: PathBuf,
}

impl<'a> InFlightClaim<'a> {
    fn acquire(set: &'a DashSet<PathBuf>, path: &Path) -> Option<Self> {
        set.insert(path.to_path_buf()).then(|| Self {
            set,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.path);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sorts files of one folder into category subfolders.
pub struct Organizer {
    root: PathBuf,
    rules: SharedRules,
    options: OrganizerOptions,
    history_path: PathBuf,
    state: Mutex<State>,
    /// Serializes picking a free destination name with the rename that takes it.
    placement: Mutex<()>,
    in_flight: DashSet<PathBuf>,
    restored: DashMap<PathBuf, Instant>,
    stats: StatsAggregator,
}

impl Organizer {
    /// Creates an organizer for `root`, loading its history file.
    ///
    /// # Errors
    ///
    /// Returns [`OrganizeError::InvalidBasePath`] if `root` is not an existing folder.
    pub fn new(root: &Path, rules: RuleTable, options: OrganizerOptions) -> OrganizeResult<Self> {
        let invalid = |source| OrganizeError::InvalidBasePath {
            path: root.to_path_buf(),
            source,
        };
        let root = root.canonicalize().map_err(invalid)?;
        if !root.is_dir() {
            return Err(invalid(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                "base path is not a directory",
            )));
        }

        let history_path = HistoryLog::file_path(&root);
        let history = HistoryLog::load(&history_path).unwrap_or_else(|e| {
            warn!("{}; starting with empty history", e);
            HistoryLog::new()
        });
        let duplicates = DuplicateIndex::rehydrate(history.iter());
        debug!(
            "Loaded {} history entries, {} known digests for {}",
            history.len(),
            duplicates.len(),
            root.display()
        );

        Ok(Self {
            root,
            rules: SharedRules::new(rules),
            options,
            history_path,
            state: Mutex::new(State {
                history,
                duplicates,
            }),
            placement: Mutex::new(()),
            in_flight: DashSet::new(),
            restored: DashMap::new(),
            stats: StatsAggregator::new(),
        })
    }

    /// Creates an organizer from application configuration.
    ///
    /// Invalid rules or filters are logged and replaced with defaults.
    pub fn from_config(root: &Path, config: &AppConfig) -> OrganizeResult<Self> {
        let rules = config.rule_table().unwrap_or_else(|e| {
            warn!("{}; using default categories", e);
            RuleTable::default()
        });
        let filters = config.compile_filters().unwrap_or_else(|e| {
            warn!("{}; using default filters", e);
            CompiledFilters::default()
        });

        Self::new(
            root,
            rules,
            OrganizerOptions {
                enable_duplicates: config.enable_duplicates,
                enable_undo: config.enable_undo,
                filters,
            },
        )
    }

    /// The organized folder (canonicalized).
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Swaps in a new rule table; in-progress moves keep the table they started with.
    pub fn update_rules(&self, rules: RuleTable) {
        self.rules.replace(rules);
        info!("Category rules updated");
    }

    /// Organizes one file. Never panics and never aborts on I/O errors; failures
    /// are reported as [`Outcome::Failed`] with the file left in place.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use smartsort::file_category::RuleTable;
    /// use smartsort::file_organizer::{Organizer, OrganizerOptions, Outcome};
    /// use std::path::Path;
    ///
    /// let organizer = Organizer::new(
    ///     Path::new("/path/to/inbox"),
    ///     RuleTable::default(),
    ///     OrganizerOptions::default(),
    /// )
    /// .unwrap();
    ///
    /// match organizer.organize(Path::new("/path/to/inbox/photo.png")) {
    ///     Outcome::Moved { destination, .. } => println!("Moved to {}", destination.display()),
    ///     other => println!("{:?}", other),
    /// }
    /// ```
    pub fn organize(&self, path: &Path) -> Outcome {
        self.process(path).outcome
    }

    /// Organizes one file and returns the full record of what was decided.
    pub fn process(&self, path: &Path) -> FileRecord {
        if let Some(reason) = self.skip_reason(path) {
            debug!("Skipping {}: {}", path.display(), reason);
            return FileRecord::skipped(path, reason);
        }

        let Some(_claim) = InFlightClaim::acquire(&self.in_flight, path) else {
            debug!("Skipping {}: {}", path.display(), SkipReason::InFlight);
            return FileRecord::skipped(path, SkipReason::InFlight);
        };

        // Another invocation may have moved it while we waited for the claim.
        if !is_regular_file(path) {
            return FileRecord::skipped(path, SkipReason::NotAFile);
        }
        self.restored.remove(path);

        let rules = self.rules.snapshot();
        let extension = extension_of(path);
        let category = rules.resolve_category(&extension).to_string();

        let digest = if self.options.enable_duplicates {
            match hasher::digest(path) {
                Ok(hash) => Some(hash),
                Err(e) => {
                    warn!("Cannot determine duplicate status: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let Some(file_name) = path.file_name() else {
            return FileRecord::skipped(path, SkipReason::NotAFile);
        };

        // Name choice, duplicate claim, rename and history record form one step, so
        // history order is move order and a claim always names the final path.
        let placement = lock(&self.placement);
        let category_dir = self.root.join(&category);
        let planned = unique_destination(&category_dir, file_name, |_| false);
        let claim = digest.map(|hash| lock(&self.state).duplicates.claim(hash, planned.clone()));

        let (destination, folder_name) = match &claim {
            Some(DigestClaim::Duplicate(_)) => (
                unique_destination(&self.root.join(DUPLICATES_DIR), file_name, |_| false),
                DUPLICATES_DIR,
            ),
            _ => (planned, category.as_str()),
        };

        let outcome = match place(path, &destination) {
            Ok(()) => {
                let mut state = lock(&self.state);
                if let (Some(hash), Some(DigestClaim::Reserved)) = (digest, &claim) {
                    state.duplicates.confirm(hash, destination.clone());
                }
                let entry = state.history.record(MoveRecord {
                    source: path.to_path_buf(),
                    destination: destination.clone(),
                    category: folder_name.to_string(),
                    digest,
                });
                self.persist(&state.history);
                drop(state);
                drop(placement);

                info!(
                    "#{} {} -> {}",
                    entry.seq,
                    path.display(),
                    destination.display()
                );
                match claim {
                    Some(DigestClaim::Duplicate(existing)) => Outcome::Duplicate {
                        destination,
                        existing,
                    },
                    _ => Outcome::Moved {
                        destination,
                        category: category.clone(),
                    },
                }
            }
            Err(e) => {
                if let (Some(hash), Some(DigestClaim::Reserved)) = (digest, &claim) {
                    lock(&self.state).duplicates.release(&hash);
                }
                drop(placement);
                warn!("{}", e);
                Outcome::Failed(e)
            }
        };

        FileRecord {
            source: path.to_path_buf(),
            extension,
            category,
            digest,
            outcome,
        }
    }

    /// Lists the files directly inside the root that are candidates for organizing,
    /// sorted by name.
    pub fn pending_files(&self) -> OrganizeResult<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.root).map_err(|source| OrganizeError::InvalidBasePath {
            path: self.root.clone(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.path())
            .filter(|path| self.skip_reason(path).is_none())
            .collect();
        files.sort();
        Ok(files)
    }

    /// Organizes every given path, calling `on_each` after each file.
    ///
    /// A failure on one file never stops the rest of the batch.
    pub fn organize_paths(
        &self,
        paths: &[PathBuf],
        mut on_each: impl FnMut(&FileRecord),
    ) -> BatchReport {
        let mut report = BatchReport::default();
        for path in paths {
            let record = self.process(path);
            on_each(&record);
            report.records.push(record);
        }
        report
    }

    /// "Organize now": sorts every file currently in the root folder.
    pub fn organize_folder(&self, on_each: impl FnMut(&FileRecord)) -> OrganizeResult<BatchReport> {
        let files = self.pending_files()?;
        info!("Organizing {} files in {}", files.len(), self.root.display());
        Ok(self.organize_paths(&files, on_each))
    }

    /// Predicts where a file would go without touching anything.
    pub fn plan(&self, path: &Path) -> Result<Plan, SkipReason> {
        self.plan_with(path, &mut HashMap::new(), &mut HashSet::new())
    }

    /// Dry run over the whole folder. Files with identical content inside the batch
    /// are predicted as duplicates of the first one.
    pub fn plan_folder(&self) -> OrganizeResult<Vec<Result<Plan, SkipReason>>> {
        let mut seen = HashMap::new();
        let mut taken = HashSet::new();
        Ok(self
            .pending_files()?
            .iter()
            .map(|path| self.plan_with(path, &mut seen, &mut taken))
            .collect())
    }

    fn plan_with(
        &self,
        path: &Path,
        seen: &mut HashMap<ContentHash, PathBuf>,
        taken: &mut HashSet<PathBuf>,
    ) -> Result<Plan, SkipReason> {
        if let Some(reason) = self.skip_reason(path) {
            return Err(reason);
        }
        let file_name = path.file_name().ok_or(SkipReason::NotAFile)?;

        let category = self.rules.snapshot().category_for_path(path).to_string();
        let digest = if self.options.enable_duplicates {
            hasher::digest(path).ok()
        } else {
            None
        };
        let duplicate_of = digest.and_then(|hash| {
            lock(&self.state)
                .duplicates
                .lookup(&hash)
                .map(Path::to_path_buf)
                .or_else(|| seen.get(&hash).cloned())
        });

        let folder = if duplicate_of.is_some() {
            DUPLICATES_DIR.to_string()
        } else {
            category
        };
        let destination =
            unique_destination(&self.root.join(&folder), file_name, |p| taken.contains(p));
        taken.insert(destination.clone());
        if let Some(hash) = digest
            && duplicate_of.is_none()
        {
            seen.insert(hash, destination.clone());
        }

        Ok(Plan {
            source: path.to_path_buf(),
            folder,
            destination,
            duplicate_of,
        })
    }

    /// Undoes the most recent move.
    ///
    /// # Errors
    ///
    /// See [`UndoError`]; on any error the history is unchanged.
    pub fn undo_last(&self) -> Result<UndoneEntry, UndoError> {
        if !self.options.enable_undo {
            return Err(UndoError::Disabled);
        }

        // Same lock order as `process`: placement before state.
        let _placement = lock(&self.placement);
        let mut state = lock(&self.state);
        let undone = UndoManager::undo_last(&mut state.history)?;

        if let Some(hash) = undone.entry.digest {
            state.duplicates.forget(&hash, &undone.entry.destination);
        }
        self.persist(&state.history);
        self.restored
            .insert(undone.entry.source.clone(), Instant::now());

        Ok(undone)
    }

    /// Consistent copy of the history, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.state).history.snapshot()
    }

    /// Per-category counts, recomputed only when the history changed.
    pub fn stats(&self) -> CategoryStats {
        let state = lock(&self.state);
        self.stats.current(&state.history)
    }

    /// True if undo put `path` back within the last [`RESTORE_GRACE`].
    fn recently_restored(&self, path: &Path) -> bool {
        let recent = self
            .restored
            .get(path)
            .is_some_and(|at| at.elapsed() < RESTORE_GRACE);
        if !recent {
            self.restored.remove(path);
        }
        recent
    }

    fn skip_reason(&self, path: &Path) -> Option<SkipReason> {
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return Some(SkipReason::NotAFile);
        };
        if !is_direct_child(&self.root, path) {
            return Some(SkipReason::OutsideRoot);
        }
        if file_name.starts_with(HISTORY_FILE_NAME) || file_name == LOCK_FILE_NAME {
            return Some(SkipReason::Internal);
        }
        if !is_regular_file(path) {
            return Some(SkipReason::NotAFile);
        }
        if !self.options.filters.should_include(path) {
            return Some(SkipReason::Filtered);
        }
        None
    }

    fn persist(&self, history: &HistoryLog) {
        if !self.options.enable_undo {
            return;
        }
        if let Err(e) = history.save(&self.history_path) {
            warn!("{}", e);
        }
    }
}

impl FileAppeared for Organizer {
    fn on_file_appeared(&self, path: &Path) -> Outcome {
        if self.recently_restored(path) {
            debug!("Skipping {}: {}", path.display(), SkipReason::RecentlyRestored);
            return Outcome::Skipped(SkipReason::RecentlyRestored);
        }
        self.organize(path)
    }
}

/// Creates the destination's folder if needed and renames `source` onto it.
///
/// Callers hold the placement lock, so `destination` is still free.
fn place(source: &Path, destination: &Path) -> OrganizeResult<()> {
    if let Some(folder) = destination.parent() {
        // create_dir_all treats an existing directory as success
        fs::create_dir_all(folder).map_err(|source| OrganizeError::DirectoryCreationFailed {
            path: folder.to_path_buf(),
            source,
        })?;
    }
    fs::rename(source, destination).map_err(|error| OrganizeError::FileMoveFailure {
        source_path: source.to_path_buf(),
        destination: destination.to_path_buf(),
        error,
    })
}

fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.is_file())
}

fn is_direct_child(root: &Path, path: &Path) -> bool {
    let Some(parent) = path.parent() else {
        return false;
    };
    parent == root || parent.canonicalize().is_ok_and(|p| p == root)
}

/// Picks `name.ext`, then `name_1.ext`, `name_2.ext`, ... until a name is free in
/// `folder` and not rejected by `reserved`.
fn unique_destination(
    folder: &Path,
    file_name: &std::ffi::OsStr,
    reserved: impl Fn(&Path) -> bool,
) -> PathBuf {
    let is_free = |p: &Path| fs::symlink_metadata(p).is_err() && !reserved(p);

    let candidate = folder.join(file_name);
    if is_free(&candidate) {
        return candidate;
    }

    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = as_path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut counter = 1u64;
    loop {
        let name = match &extension {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = folder.join(name);
        if is_free(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HISTORY_LIMIT;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    fn organizer(root: &Path, enable_duplicates: bool) -> Organizer {
        Organizer::new(
            root,
            RuleTable::default(),
            OrganizerOptions {
                enable_duplicates,
                ..Default::default()
            },
        )
        .expect("Failed to create organizer")
    }

    fn write(root: &Path, name: &str, content: &str) -> PathBuf {
        let path = root.join(name);
        fs::write(&path, content).expect("Failed to write test file");
        path
    }

    #[test]
    fn test_organize_moves_into_category() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), true);
        let file = write(org.root(), "photo.PNG", "pixels");

        match org.organize(&file) {
            Outcome::Moved {
                destination,
                category,
            } => {
                assert_eq!(category, "Images");
                assert_eq!(destination, org.root().join("Images").join("photo.PNG"));
                assert!(destination.exists());
            }
            other => panic!("Expected Moved, got {:?}", other),
        }
        assert!(!file.exists());
        assert_eq!(org.history().len(), 1);
    }

    #[test]
    fn test_unknown_extension_goes_to_others() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), false);
        let file = write(org.root(), "data.xyz", "?");

        let outcome = org.organize(&file);
        assert_eq!(
            outcome.destination(),
            Some(org.root().join("Others").join("data.xyz").as_path())
        );
    }

    #[test]
    fn test_duplicate_detected() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), true);
        let first = write(org.root(), "a.txt", "same");
        let second = write(org.root(), "b.txt", "same");

        let first_dest = org.organize(&first).destination().unwrap().to_path_buf();
        match org.organize(&second) {
            Outcome::Duplicate {
                destination,
                existing,
            } => {
                assert_eq!(existing, first_dest);
                assert_eq!(destination, org.root().join(DUPLICATES_DIR).join("b.txt"));
            }
            other => panic!("Expected Duplicate, got {:?}", other),
        }

        let history = org.history();
        assert_eq!(history[1].category, DUPLICATES_DIR);
        assert_eq!(history[0].digest, history[1].digest);
    }

    #[test]
    fn test_duplicates_disabled_both_moved() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), false);
        let first = write(org.root(), "a.txt", "same");
        let second = write(org.root(), "b.txt", "same");

        assert!(matches!(org.organize(&first), Outcome::Moved { .. }));
        assert!(matches!(org.organize(&second), Outcome::Moved { .. }));
        assert!(org.root().join("Documents").join("a.txt").exists());
        assert!(org.root().join("Documents").join("b.txt").exists());
        assert!(org.history().iter().all(|e| e.digest.is_none()));
    }

    #[test]
    fn test_name_collision_never_overwrites() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), false);
        fs::create_dir(org.root().join("Documents")).unwrap();
        fs::write(org.root().join("Documents").join("a.txt"), "existing").unwrap();
        fs::write(org.root().join("Documents").join("a_1.txt"), "existing too").unwrap();

        let file = write(org.root(), "a.txt", "incoming");
        let destination = org.organize(&file).destination().unwrap().to_path_buf();

        assert_eq!(destination, org.root().join("Documents").join("a_2.txt"));
        assert_eq!(
            fs::read_to_string(org.root().join("Documents").join("a.txt")).unwrap(),
            "existing"
        );
        assert_eq!(fs::read_to_string(destination).unwrap(), "incoming");
    }

    #[test]
    fn test_unique_destination_without_extension() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        fs::write(temp_dir.path().join("README"), "x").unwrap();
        let dest = unique_destination(temp_dir.path(), std::ffi::OsStr::new("README"), |_| false);
        assert_eq!(dest, temp_dir.path().join("README_1"));
    }

    #[test]
    fn test_skips() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), true);
        fs::create_dir(org.root().join("Images")).unwrap();
        let nested = write(&org.root().join("Images"), "inner.png", "x");
        let hidden = write(org.root(), ".hidden.txt", "x");

        assert!(matches!(
            org.organize(&org.root().join("missing.txt")),
            Outcome::Skipped(SkipReason::NotAFile)
        ));
        assert!(matches!(
            org.organize(&org.root().join("Images")),
            Outcome::Skipped(SkipReason::NotAFile)
        ));
        assert!(matches!(
            org.organize(&nested),
            Outcome::Skipped(SkipReason::OutsideRoot)
        ));
        assert!(matches!(
            org.organize(&hidden),
            Outcome::Skipped(SkipReason::Filtered)
        ));
        assert!(org.history().is_empty());
    }

    #[test]
    fn test_history_file_is_never_organized() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut options = OrganizerOptions::default();
        options.filters = CompiledFilters::allow_all();
        let org = Organizer::new(temp_dir.path(), RuleTable::default(), options).unwrap();
        let file = write(org.root(), "a.txt", "a");
        org.organize(&file);

        let history_file = org.root().join(HISTORY_FILE_NAME);
        assert!(history_file.exists());
        assert!(matches!(
            org.organize(&history_file),
            Outcome::Skipped(SkipReason::Internal)
        ));
    }

    #[test]
    fn test_failed_move_records_nothing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), true);
        // A plain file where the category folder should be makes the move fail.
        fs::write(org.root().join("Documents"), "in the way").unwrap();
        let file = write(org.root(), "a.txt", "content");

        assert!(matches!(
            org.organize(&file),
            Outcome::Failed(OrganizeError::DirectoryCreationFailed { .. })
        ));
        assert!(file.exists());
        assert!(org.history().is_empty());
        assert!(lock(&org.state).duplicates.is_empty());
    }

    #[test]
    fn test_history_bounded() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), false);
        for i in 0..(HISTORY_LIMIT + 5) {
            let file = write(org.root(), &format!("f{}.txt", i), "x");
            assert!(org.organize(&file).is_moved());
        }
        let history = org.history();
        assert_eq!(history.len(), HISTORY_LIMIT);
        assert_eq!(history[0].seq, 6);
    }

    #[test]
    fn test_undo_restores_and_forgets_digest() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), true);
        let file = write(org.root(), "a.txt", "content");
        org.organize(&file);

        let undone = org.undo_last().expect("Undo failed");
        assert_eq!(undone.restored_path(), file.as_path());
        assert!(file.exists());
        assert!(org.history().is_empty());

        // Organizing it again is not a duplicate of its former self.
        assert!(matches!(org.organize(&file), Outcome::Moved { .. }));
    }

    #[test]
    fn test_undo_empty_and_disabled() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), true);
        assert!(matches!(org.undo_last(), Err(UndoError::EmptyHistory)));

        let no_undo = Organizer::new(
            temp_dir.path(),
            RuleTable::default(),
            OrganizerOptions {
                enable_undo: false,
                ..Default::default()
            },
        )
        .unwrap();
        let file = write(no_undo.root(), "a.txt", "content");
        no_undo.organize(&file);
        assert!(matches!(no_undo.undo_last(), Err(UndoError::Disabled)));
        assert!(!no_undo.root().join(HISTORY_FILE_NAME).exists());
    }

    #[test]
    fn test_restored_file_skipped_by_watcher_callback() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), true);
        let file = write(org.root(), "a.txt", "content");
        org.organize(&file);
        org.undo_last().unwrap();

        assert!(matches!(
            org.on_file_appeared(&file),
            Outcome::Skipped(SkipReason::RecentlyRestored)
        ));
        // Explicitly organizing still works.
        assert!(org.organize(&file).is_moved());
    }

    #[test]
    fn test_duplicate_index_rehydrated_from_history() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let first_dest = {
            let org = organizer(temp_dir.path(), true);
            let file = write(org.root(), "a.txt", "same");
            org.organize(&file).destination().unwrap().to_path_buf()
        };

        let org = organizer(temp_dir.path(), true);
        let file = write(org.root(), "copy.txt", "same");
        match org.organize(&file) {
            Outcome::Duplicate { existing, .. } => assert_eq!(existing, first_dest),
            other => panic!("Expected Duplicate, got {:?}", other),
        }
    }

    #[test]
    fn test_stale_index_entry_ignored() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), true);
        let file = write(org.root(), "a.txt", "same");
        let dest = org.organize(&file).destination().unwrap().to_path_buf();
        fs::remove_file(dest).unwrap();

        let again = write(org.root(), "b.txt", "same");
        assert!(matches!(org.organize(&again), Outcome::Moved { .. }));
    }

    #[test]
    fn test_update_rules() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), false);
        let mut categories = BTreeMap::new();
        categories.insert("Pictures".to_string(), vec![".png".to_string()]);
        org.update_rules(RuleTable::from_categories(&categories).unwrap());

        let file = write(org.root(), "p.png", "x");
        assert_eq!(
            org.organize(&file).destination(),
            Some(org.root().join("Pictures").join("p.png").as_path())
        );
    }

    #[test]
    fn test_plan_folder_has_no_side_effects() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), true);
        write(org.root(), "a.txt", "same");
        write(org.root(), "b.txt", "same");
        write(org.root(), "c.png", "img");

        let plans: Vec<Plan> = org.plan_folder().unwrap().into_iter().flatten().collect();
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].folder, "Documents");
        assert_eq!(plans[1].folder, DUPLICATES_DIR);
        assert_eq!(plans[1].duplicate_of.as_ref(), Some(&plans[0].destination));
        assert_eq!(plans[2].folder, "Images");
        assert!(org.root().join("a.txt").exists());
        assert!(!org.root().join("Documents").exists());
        assert!(org.history().is_empty());
    }

    #[test]
    fn test_organize_folder_isolates_results() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), true);
        write(org.root(), "a.txt", "same");
        write(org.root(), "b.txt", "same");
        write(org.root(), "c.mp3", "audio");
        write(org.root(), ".hidden", "h");

        let mut seen = 0;
        let report = org.organize_folder(|_| seen += 1).unwrap();
        assert_eq!(seen, 3);
        assert_eq!(report.moved(), 2);
        assert_eq!(report.duplicates(), 1);
        assert_eq!(report.failed(), 0);
        assert!(org.root().join(".hidden").exists());
    }

    #[test]
    fn test_concurrent_organize_same_path_records_once() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = Arc::new(organizer(temp_dir.path(), true));
        let file = write(org.root(), "big.bin", &"x".repeat(1 << 20));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let org = Arc::clone(&org);
                let file = file.clone();
                thread::spawn(move || org.organize(&file))
            })
            .collect();
        let moved = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(Outcome::is_moved)
            .count();

        assert_eq!(moved, 1);
        assert_eq!(org.history().len(), 1);
    }

    #[test]
    fn test_concurrent_same_name_from_different_sources() {
        // Two different files racing for the same destination name.
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = Arc::new(organizer(temp_dir.path(), false));
        let names: Vec<PathBuf> = (0..8)
            .map(|i| write(org.root(), &format!("doc{}.txt", i), &format!("{}", i)))
            .collect();

        let handles: Vec<_> = names
            .into_iter()
            .map(|file| {
                let org = Arc::clone(&org);
                thread::spawn(move || org.organize(&file))
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_moved());
        }
        let count = fs::read_dir(org.root().join("Documents")).unwrap().count();
        assert_eq!(count, 8);
    }

    #[test]
    fn test_concurrent_duplicate_names_the_real_copy() {
        for _ in 0..20 {
            let temp_dir = TempDir::new().expect("Failed to create temp directory");
            let org = Arc::new(organizer(temp_dir.path(), true));
            // Unrelated file sitting where the first copy would naively go.
            fs::create_dir(org.root().join("Documents")).unwrap();
            fs::write(org.root().join("Documents").join("a.txt"), "unrelated").unwrap();
            fs::write(org.root().join("Documents").join("b.txt"), "unrelated").unwrap();

            let handles: Vec<_> = ["a.txt", "b.txt"]
                .into_iter()
                .map(|name| {
                    let org = Arc::clone(&org);
                    let file = write(org.root(), name, "same");
                    thread::spawn(move || org.organize(&file))
                })
                .collect();
            let outcomes: Vec<Outcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

            let existing = outcomes
                .iter()
                .find_map(|outcome| match outcome {
                    Outcome::Duplicate { existing, .. } => Some(existing.clone()),
                    _ => None,
                })
                .expect("One copy should be a duplicate");
            assert_eq!(outcomes.iter().filter(|o| o.is_moved()).count(), 1);
            assert_eq!(fs::read_to_string(&existing).unwrap(), "same");
        }
    }

    #[test]
    fn test_history_stays_consistent_with_concurrent_undo() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = Arc::new(organizer(temp_dir.path(), false));
        let files: Vec<PathBuf> = (0..16)
            .map(|i| write(org.root(), &format!("f{}.txt", i), "x"))
            .collect();

        let mut handles: Vec<_> = files
            .chunks(4)
            .map(|chunk| {
                let org = Arc::clone(&org);
                let chunk = chunk.to_vec();
                thread::spawn(move || {
                    for file in chunk {
                        assert!(org.organize(&file).is_moved());
                    }
                })
            })
            .collect();
        let undoer = Arc::clone(&org);
        handles.push(thread::spawn(move || {
            for _ in 0..5 {
                let _ = undoer.undo_last();
                thread::yield_now();
            }
        }));
        for h in handles {
            h.join().unwrap();
        }

        let history = org.history();
        assert!(history.windows(2).all(|w| w[0].seq < w[1].seq));
        assert!(history.iter().all(|entry| entry.destination.exists()));
        // Every file is either recorded in its category or back in the root.
        let restored = files.iter().filter(|f| f.exists()).count();
        assert_eq!(restored + history.len(), files.len());
        for file in files.iter().filter(|f| f.exists()) {
            assert!(history.iter().all(|entry| &entry.source != file));
        }

        // Draining the log puts every remaining file back.
        while org.undo_last().is_ok() {}
        assert!(files.iter().all(|f| f.exists()));
    }

    #[test]
    fn test_stats_follow_history() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let org = organizer(temp_dir.path(), false);
        org.organize(&write(org.root(), "a.txt", "a"));
        org.organize(&write(org.root(), "b.txt", "b"));
        org.organize(&write(org.root(), "c.png", "c"));

        let stats = org.stats();
        assert_eq!(stats.count("Documents"), 2);
        assert_eq!(stats.count("Images"), 1);
        assert_eq!(stats.total(), 3);

        org.undo_last().unwrap();
        assert_eq!(org.stats().count("Images"), 0);
        assert_eq!(org.stats().total(), 2);
    }
}
