//! Application configuration and file filtering rules.
//!
//! This module loads the settings that drive sorting: the category table, the
//! watched folder, feature flags, watcher timing, and exclusion filters. Files are
//! TOML by default; a path ending in `.json` is read as JSON with the same shape.
//!
//! # Configuration File Format
//!
//! ```toml
//! watched_folder = "/home/me/Downloads"
//! enable_duplicates = true
//! enable_undo = true
//!
//! [categories]
//! Images = [".jpg", ".png"]
//! Others = []
//!
//! [watcher]
//! settle_delay_ms = 500
//! poll_interval_ms = 250
//! workers = 4
//!
//! [filters]
//! enable_hidden_files = false
//!
//! [filters.exclude]
//! filenames = ["desktop.ini"]
//! patterns = ["*.part", "*.crdownload"]
//! extensions = ["tmp"]
//! regex = []
//!
//! [filters.include]
//! patterns = []
//! ```

use crate::file_category::RuleTable;
use crate::instance_lock::InstanceLock;
use crate::watcher::WatcherSettings;
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur during configuration loading and rule compilation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("Configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),
    /// Invalid TOML/JSON syntax or structure.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),
    /// Invalid glob pattern provided.
    #[error("Invalid glob pattern '{0}': expected *.ext or dir/**")]
    InvalidGlobPattern(String),
    /// Invalid regex pattern provided with the actual error reason.
    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern {
        /// The regex pattern that failed to compile.
        pattern: String,
        /// The reason why the pattern is invalid.
        reason: String,
    },
    /// A category name that cannot be used as a folder.
    #[error("Invalid category '{name}': {reason}")]
    InvalidCategory { name: String, reason: String },
    /// An empty or otherwise unusable extension.
    #[error("Invalid extension '{extension}' in category '{category}'")]
    InvalidExtension { category: String, extension: String },
    /// The same extension was assigned to two categories.
    #[error("Extension '{extension}' is mapped to both '{first}' and '{second}'")]
    DuplicateExtension {
        extension: String,
        first: String,
        second: String,
    },
    /// IO error while reading configuration.
    #[error("IO error reading configuration: {0}")]
    IoError(String),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Category name to list of extensions.
    #[serde(default = "RuleTable::default_categories")]
    pub categories: BTreeMap<String, Vec<String>>,

    /// Folder to organize when none is given on the command line.
    #[serde(default)]
    pub watched_folder: Option<PathBuf>,

    /// Redirect files with already-seen content to the duplicates folder.
    #[serde(default = "default_true")]
    pub enable_duplicates: bool,

    /// Record moves so they can be undone.
    #[serde(default = "default_true")]
    pub enable_undo: bool,

    /// Watcher timing.
    #[serde(default)]
    pub watcher: WatcherTiming,

    /// Rules for skipping files.
    #[serde(default)]
    pub filters: FilterRules,

    /// Single-instance lock file; defaults to one in the system temp directory.
    #[serde(default)]
    pub lock_file: Option<PathBuf>,

    /// File this configuration was read from, if any.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

/// Watcher timing as stored on disk, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherTiming {
    pub settle_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub max_retries: u32,
    pub workers: usize,
}

impl Default for WatcherTiming {
    fn default() -> Self {
        let settings = WatcherSettings::default();
        Self {
            settle_delay_ms: settings.settle_delay.as_millis() as u64,
            poll_interval_ms: settings.poll_interval.as_millis() as u64,
            retry_delay_ms: settings.retry_delay.as_millis() as u64,
            max_retries: settings.max_retries,
            workers: settings.workers,
        }
    }
}

impl WatcherTiming {
    pub fn to_settings(&self) -> WatcherSettings {
        WatcherSettings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            max_retries: self.max_retries,
            workers: self.workers.max(1),
        }
    }
}

/// Root-level filter rules configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRules {
    /// Whether to include hidden files (starting with "."). Defaults to false.
    #[serde(default)]
    pub enable_hidden_files: bool,

    /// Rules for excluding files.
    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Rules for including files (whitelist, overrides exclude rules).
    #[serde(default)]
    pub include: IncludeRules,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: false,
            exclude: ExcludeRules {
                // Partial downloads are still being written by the browser.
                patterns: vec![
                    "*.part".to_string(),
                    "*.crdownload".to_string(),
                    "*.download".to_string(),
                ],
                ..Default::default()
            },
            include: IncludeRules::default(),
        }
    }
}

/// Rules for excluding files from organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExcludeRules {
    /// Exact filenames to exclude (e.g., "desktop.ini", "Thumbs.db").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns matched against the file name (e.g., "*.part").
    #[serde(default)]
    pub patterns: Vec<String>,

    /// File extensions to exclude (e.g., "bak", "tmp").
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regex patterns to exclude (for advanced users).
    #[serde(default)]
    pub regex: Vec<String>,
}

/// Rules for including files, overriding exclude rules (whitelist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncludeRules {
    /// Glob patterns that override exclude rules.
    #[serde(default)]
    pub patterns: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            categories: RuleTable::default_categories(),
            watched_folder: None,
            enable_duplicates: true,
            enable_undo: true,
            watcher: WatcherTiming::default(),
            filters: FilterRules::default(),
            lock_file: None,
            source: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a file, with fallback to defaults.
    ///
    /// Attempts to load configuration in the following order:
    /// 1. If `config_path` is provided, load from that file
    /// 2. Look for `.smartsortrc.toml` in the current directory
    /// 3. Look for `~/.config/smartsort/config.toml` in home directory
    /// 4. Fall back to default configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file is found but cannot be read or parsed.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        match Self::locate(config_path) {
            Some(path) => Self::load_from_file(&path),
            None => Ok(Self::default()),
        }
    }

    /// Like [`AppConfig::load`], but a broken file is logged and replaced by defaults.
    ///
    /// The rule table is validated too, so the returned configuration always
    /// compiles into a [`RuleTable`].
    pub fn load_or_default(config_path: Option<&Path>) -> Self {
        let config = match Self::load(config_path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}; using default configuration", e);
                return Self::default();
            }
        };

        if let Err(e) = config.rule_table() {
            warn!("{}; using default categories", e);
            return Self {
                categories: RuleTable::default_categories(),
                ..config
            };
        }
        config
    }

    fn locate(config_path: Option<&Path>) -> Option<PathBuf> {
        // If explicitly specified, load from that path even if it is missing
        if let Some(path) = config_path {
            return Some(path.to_path_buf());
        }

        let local_config = PathBuf::from(".smartsortrc.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        Self::user_config_path().filter(|path| path.exists())
    }

    /// `~/.config/smartsort/config.toml`, if `HOME` is set.
    pub fn user_config_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("smartsort")
                .join("config.toml")
        })
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if file does not exist.
    /// Returns `ConfigError::ConfigInvalid` if parsing fails.
    /// Returns `ConfigError::IoError` if file cannot be read.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config: Self = if is_json(path) {
            serde_json::from_str(&content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?
        };
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Reads the file this configuration came from again, or the default
    /// locations if it did not come from a file.
    pub fn reload(&self) -> Self {
        Self::load_or_default(self.source.as_deref())
    }

    /// Writes this configuration to `path`, as JSON or TOML depending on its extension.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = if is_json(path) {
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?
        } else {
            toml::to_string_pretty(self).map_err(|e| ConfigError::ConfigInvalid(e.to_string()))?
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }
        fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Saves `folder` as the watched folder, into the file this configuration was
    /// loaded from or else the per-user file. Returns the path written.
    pub fn remember_folder(&self, folder: &Path) -> Result<PathBuf, ConfigError> {
        let path = self
            .source
            .clone()
            .or_else(Self::user_config_path)
            .ok_or_else(|| ConfigError::IoError("HOME is not set".to_string()))?;

        let mut updated = self.clone();
        updated.watched_folder = Some(folder.to_path_buf());
        updated.save(&path)?;
        info!("Remembered {} as the watched folder", folder.display());
        Ok(path)
    }

    /// Where the single-instance lock lives.
    pub fn lock_path(&self) -> PathBuf {
        self.lock_file
            .clone()
            .unwrap_or_else(InstanceLock::default_path)
    }

    /// Builds the rule table described by `categories`.
    pub fn rule_table(&self) -> Result<RuleTable, ConfigError> {
        RuleTable::from_categories(&self.categories)
    }

    /// Compile filter rules into optimized structures for matching.
    ///
    /// # Errors
    ///
    /// Returns an error if any regex or glob patterns are invalid.
    pub fn compile_filters(&self) -> Result<CompiledFilters, ConfigError> {
        CompiledFilters::new(&self.filters)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Compiled, optimized filter structures for efficient file matching.
///
/// This struct pre-processes all filter rules (glob patterns, regex patterns, etc.)
/// so that matching does not reparse patterns on each file.
#[derive(Debug, Clone)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    /// Create compiled filters from filter rules.
    ///
    /// # Errors
    ///
    /// Returns an error if any glob or regex patterns are invalid.
    pub fn new(rules: &FilterRules) -> Result<Self, ConfigError> {
        let compile_globs = |patterns: &[String]| {
            patterns
                .iter()
                .map(|pattern| {
                    Pattern::new(pattern)
                        .map_err(|_| ConfigError::InvalidGlobPattern(pattern.clone()))
                })
                .collect::<Result<Vec<_>, _>>()
        };

        let exclude_patterns = compile_globs(&rules.exclude.patterns)?;
        let include_patterns = compile_globs(&rules.include.patterns)?;

        let exclude_regexes = rules
            .exclude
            .regex
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.iter().cloned().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns,
            exclude_regexes,
            include_patterns,
        })
    }

    /// Filters that let every file through.
    pub fn allow_all() -> Self {
        Self {
            enable_hidden_files: true,
            exclude_filenames: HashSet::new(),
            exclude_extensions: HashSet::new(),
            exclude_patterns: Vec::new(),
            exclude_regexes: Vec::new(),
            include_patterns: Vec::new(),
        }
    }

    /// Check if a file should be organized (not excluded).
    ///
    /// Globs and regexes are matched against the file name only, since the
    /// organizer only ever looks at direct children of the watched folder.
    ///
    /// Checks are performed in this order, with early termination:
    /// 1. Include patterns (whitelist) - if matched, always include
    /// 2. Hidden file filter - if hidden and disabled, exclude
    /// 3. Exact filename match - if matched, exclude
    /// 4. File extension match - if matched, exclude
    /// 5. Glob pattern match - if matched, exclude
    /// 6. Regex pattern match - if matched, exclude
    /// 7. Default: include
    pub fn should_include(&self, file_path: &Path) -> bool {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self.include_patterns.iter().any(|p| p.matches(&file_name)) {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = file_path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self.exclude_patterns.iter().any(|p| p.matches(&file_name)) {
            return false;
        }

        if self.exclude_regexes.iter().any(|r| r.is_match(&file_name)) {
            return false;
        }

        true
    }
}

impl Default for CompiledFilters {
    fn default() -> Self {
        // The default rules contain only literal, valid patterns.
        Self::new(&FilterRules::default()).unwrap_or_else(|_| Self::allow_all())
    }
}
