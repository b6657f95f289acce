//! Extension based categorization for sorting files into folders.
//!
//! This module maps file extensions to category names (e.g., ".png" to "Images").
//! Every category name doubles as the folder name files are moved into.
//!
//! # Examples
//!
//! ```
//! use smartsort::file_category::RuleTable;
//!
//! let rules = RuleTable::default();
//! assert_eq!(rules.resolve_category(".png"), "Images");
//! assert_eq!(rules.resolve_category("PDF"), "Documents");
//! assert_eq!(rules.resolve_category(".unknown"), "Others");
//! ```

use crate::config::ConfigError;
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path};
use std::sync::{Arc, RwLock};

/// Category that catches every extension without a rule.
pub const DEFAULT_CATEGORY: &str = "Others";

/// Folder that receives files whose content was already organized.
pub const DUPLICATES_DIR: &str = "Duplicates";

/// Normalizes an extension to its lookup key: trimmed, lowercase, leading dot.
///
/// Returns an empty string for an empty extension.
///
/// # Examples
///
/// ```
/// use smartsort::file_category::normalize_extension;
///
/// assert_eq!(normalize_extension("PNG"), ".png");
/// assert_eq!(normalize_extension(" .Jpg "), ".jpg");
/// assert_eq!(normalize_extension(""), "");
/// ```
pub fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return String::new();
    }
    format!(".{}", trimmed.to_lowercase())
}

/// Returns the normalized extension of a path, or an empty string if it has none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| normalize_extension(&ext.to_string_lossy()))
        .unwrap_or_default()
}

/// A single extension to category mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRule {
    /// Normalized extension, e.g. ".png".
    pub extension: String,
    /// Category (and folder) name, e.g. "Images".
    pub category: String,
}

/// Ordered, immutable mapping from file extension to category name.
///
/// Lookups are case-insensitive. Anything without a rule resolves to
/// [`DEFAULT_CATEGORY`].
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<CategoryRule>,
    index: HashMap<String, usize>,
    categories: Vec<String>,
}

impl RuleTable {
    /// Builds a rule table from a category to extension list mapping.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidCategory`] for a category name that cannot be
    /// used as a single folder name, [`ConfigError::InvalidExtension`] for an empty
    /// extension, and [`ConfigError::DuplicateExtension`] when one extension is
    /// claimed by two categories.
    ///
    /// # Examples
    ///
    /// ```
    /// use smartsort::file_category::RuleTable;
    /// use std::collections::BTreeMap;
    ///
    /// let mut categories = BTreeMap::new();
    /// categories.insert("Images".to_string(), vec![".png".to_string()]);
    /// let rules = RuleTable::from_categories(&categories).unwrap();
    /// assert_eq!(rules.resolve_category("PNG"), "Images");
    /// ```
    pub fn from_categories(categories: &BTreeMap<String, Vec<String>>) -> Result<Self, ConfigError> {
        let mut table = Self {
            rules: Vec::new(),
            index: HashMap::new(),
            categories: Vec::new(),
        };

        for (category, extensions) in categories {
            validate_category_name(category)?;
            table.categories.push(category.clone());

            for raw in extensions {
                let extension = normalize_extension(raw);
                if extension.is_empty() {
                    return Err(ConfigError::InvalidExtension {
                        category: category.clone(),
                        extension: raw.clone(),
                    });
                }
                if let Some(&existing) = table.index.get(&extension) {
                    let first = &table.rules[existing].category;
                    // Repeating an extension inside one category is harmless.
                    if first == category {
                        continue;
                    }
                    return Err(ConfigError::DuplicateExtension {
                        extension,
                        first: first.clone(),
                        second: category.clone(),
                    });
                }
                table.index.insert(extension.clone(), table.rules.len());
                table.rules.push(CategoryRule {
                    extension,
                    category: category.clone(),
                });
            }
        }

        if !table.categories.iter().any(|c| c == DEFAULT_CATEGORY) {
            table.categories.push(DEFAULT_CATEGORY.to_string());
        }

        Ok(table)
    }

    /// The category mapping used when no configuration overrides it.
    pub fn default_categories() -> BTreeMap<String, Vec<String>> {
        let defaults: [(&str, &[&str]); 8] = [
            (
                "Images",
                &[".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".webp", ".ico", ".tiff"],
            ),
            (
                "Documents",
                &[
                    ".pdf", ".doc", ".docx", ".txt", ".rtf", ".odt", ".xls", ".xlsx", ".ppt",
                    ".pptx",
                ],
            ),
            (
                "Videos",
                &[".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".webm", ".m4v"],
            ),
            (
                "Audio",
                &[".mp3", ".wav", ".flac", ".aac", ".ogg", ".wma", ".m4a"],
            ),
            (
                "Archives",
                &[".zip", ".rar", ".7z", ".tar", ".gz", ".bz2", ".xz"],
            ),
            (
                "Code",
                &[
                    ".py", ".js", ".html", ".css", ".java", ".cpp", ".c", ".h", ".json", ".xml",
                    ".sql",
                ],
            ),
            (
                "Executables",
                &[".exe", ".msi", ".app", ".dmg", ".deb", ".rpm"],
            ),
            (DEFAULT_CATEGORY, &[]),
        ];

        defaults
            .iter()
            .map(|(category, exts)| {
                (
                    category.to_string(),
                    exts.iter().map(|e| e.to_string()).collect(),
                )
            })
            .collect()
    }

    /// Resolves an extension (with or without leading dot, any case) to its category.
    pub fn resolve_category(&self, extension: &str) -> &str {
        let key = normalize_extension(extension);
        self.index
            .get(&key)
            .map(|&i| self.rules[i].category.as_str())
            .unwrap_or(DEFAULT_CATEGORY)
    }

    /// Resolves the category of a file from its path's extension.
    pub fn category_for_path(&self, path: &Path) -> &str {
        self.resolve_category(&extension_of(path))
    }

    /// All rules in table order.
    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    /// All category names, including the default category.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        // The built-in table is known to be valid.
        Self::from_categories(&Self::default_categories())
            .unwrap_or_else(|_| unreachable!("built-in category table is valid"))
    }
}

fn validate_category_name(name: &str) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidCategory {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if name == DUPLICATES_DIR {
        return Err(invalid("name is reserved for the duplicates folder"));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid("name must be a single folder name")),
    }
}

/// A rule table shared between the organizer and configuration reloads.
///
/// Readers take an `Arc` snapshot, so a [`SharedRules::replace`] never exposes a
/// half-updated table to an in-progress lookup.
#[derive(Debug, Default)]
pub struct SharedRules {
    current: RwLock<Arc<RuleTable>>,
}

impl SharedRules {
    pub fn new(table: RuleTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    /// Returns the table in effect right now.
    pub fn snapshot(&self) -> Arc<RuleTable> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Atomically swaps in a new table.
    pub fn replace(&self, table: RuleTable) {
        let table = Arc::new(table);
        match self.current.write() {
            Ok(mut guard) => *guard = table,
            Err(poisoned) => *poisoned.into_inner() = table,
        }
    }
}
