/// Per-category counts derived from the move history.
use crate::history::{HistoryEntry, HistoryLog};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Number of recorded moves per destination folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryStats {
    counts: BTreeMap<String, usize>,
}

impl CategoryStats {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a HistoryEntry>) -> Self {
        let mut counts = BTreeMap::new();
        for entry in entries {
            *counts.entry(entry.category.clone()).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn count(&self, category: &str) -> usize {
        self.counts.get(category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Categories ordered by count, highest first; ties by name.
    pub fn sorted_by_count(&self) -> Vec<(&str, usize)> {
        let mut rows: Vec<(&str, usize)> =
            self.counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        rows
    }
}

/// Caches [`CategoryStats`] until the history changes.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    cached: Mutex<Option<(u64, CategoryStats)>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stats for `log`, recomputed only if the log changed since the last call.
    pub fn current(&self, log: &HistoryLog) -> CategoryStats {
        let mut cached = self
            .cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some((generation, stats)) = cached.as_ref()
            && *generation == log.generation()
        {
            return stats.clone();
        }

        let stats = CategoryStats::from_entries(log.iter());
        *cached = Some((log.generation(), stats.clone()));
        stats
    }
}
