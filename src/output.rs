//! Output formatting and styling module.
//!
//! Provides a centralized interface for all CLI output, including colored output,
//! progress tracking, and formatted tables. Diagnostics go through `tracing`; this
//! module is only for what the user asked to see.

use crate::file_category::RuleTable;
use crate::file_organizer::{FileRecord, Outcome, Plan};
use crate::history::HistoryEntry;
use crate::stats::CategoryStats;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;

/// Manages all CLI output with consistent styling and formatting.
///
/// This struct provides methods for:
/// - Success messages (green with ✓)
/// - Error messages (red with ✗)
/// - Warning messages (yellow with ⚠)
/// - Info messages (cyan)
/// - Progress bars for operations
/// - Summary tables with statistics
pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use smartsort::output::OutputFormatter;
    /// OutputFormatter::success("File organized successfully!");
    /// ```
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    /// Prints a warning message in yellow with a warning symbol.
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    /// Prints an info message in cyan.
    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    /// Prints a regular message without styling.
    pub fn plain(message: &str) {
        println!("{}", message);
    }

    /// Prints a section header.
    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    /// Creates and returns a progress bar for file operations.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use smartsort::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(100);
    /// pb.inc(1);
    /// pb.finish_with_message("Completed!");
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("█▓░"));
        }
        pb
    }

    /// One line describing what happened to a file, relative to `root`.
    pub fn outcome_line(root: &Path, record: &FileRecord) -> String {
        let name = display_relative(root, &record.source);
        match &record.outcome {
            Outcome::Moved { destination, .. } => format!(
                "{} {} → {}",
                "✓".green(),
                name,
                display_relative(root, destination)
            ),
            Outcome::Duplicate {
                destination,
                existing,
            } => format!(
                "{} {} → {} (duplicate of {})",
                "≡".yellow(),
                name,
                display_relative(root, destination),
                display_relative(root, existing)
            ),
            Outcome::Skipped(reason) => format!("{} {} ({})", "-".dimmed(), name, reason),
            Outcome::Failed(e) => format!("{} {}: {}", "✗".red(), name, e),
        }
    }

    /// Prints a dry-run prediction.
    pub fn plan_line(root: &Path, plan: &Plan) {
        let mut line = format!(
            "   → {} would move to {}",
            display_relative(root, &plan.source),
            display_relative(root, &plan.destination)
        );
        if let Some(existing) = &plan.duplicate_of {
            line.push_str(&format!(" (duplicate of {})", display_relative(root, existing)));
        }
        println!("{}", line);
    }

    /// Prints a summary table of moves per category, busiest first.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use smartsort::output::OutputFormatter;
    /// use smartsort::stats::CategoryStats;
    ///
    /// OutputFormatter::summary_table(&CategoryStats::default());
    /// ```
    pub fn summary_table(stats: &CategoryStats) {
        Self::header("SUMMARY");

        let rows = stats.sorted_by_count();
        let max_category_len = rows
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0)
            .max(8); // At least "Category" width

        println!(
            "{:<width$} | {}",
            "Category".bold(),
            "Files".bold(),
            width = max_category_len
        );
        println!("{}", "-".repeat(max_category_len + 10));

        for (category, count) in &rows {
            println!(
                "{:<width$} | {} {}",
                category,
                count.to_string().green(),
                plural(*count),
                width = max_category_len
            );
        }

        let total = stats.total();
        println!("{}", "-".repeat(max_category_len + 10));
        println!(
            "{:<width$} | {} {}",
            "Total".bold(),
            total.to_string().green().bold(),
            plural(total),
            width = max_category_len
        );
    }

    /// Prints the most recent `limit` history entries, newest first.
    pub fn history_table(root: &Path, entries: &[HistoryEntry], limit: usize) {
        Self::header("HISTORY");
        if entries.is_empty() {
            Self::plain("No moves recorded.");
            return;
        }

        for entry in entries.iter().rev().take(limit) {
            println!(
                "{:>5}  {}  {} → {}",
                format!("#{}", entry.seq).dimmed(),
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                display_relative(root, &entry.source),
                display_relative(root, &entry.destination).cyan()
            );
        }
        if entries.len() > limit {
            Self::plain(&format!("... and {} older", entries.len() - limit));
        }
    }

    /// Prints each category with its extensions, in table order.
    pub fn rules_table(rules: &RuleTable) {
        Self::header("CATEGORIES");
        for category in rules.categories() {
            let extensions: Vec<&str> = rules
                .rules()
                .iter()
                .filter(|rule| &rule.category == category)
                .map(|rule| rule.extension.as_str())
                .collect();
            let listed = if extensions.is_empty() {
                "(everything else)".dimmed().to_string()
            } else {
                extensions.join(" ")
            };
            println!("{:<12} {}", category.bold(), listed);
        }
    }

    /// Prints a dry-run notice message.
    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }
}

fn plural(count: usize) -> &'static str {
    if count == 1 { "file" } else { "files" }
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}
