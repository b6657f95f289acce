//! Command-line interface module for smartsort.
//!
//! This module handles all CLI-related functionality including:
//! - Command parsing
//! - One-shot organization and dry runs
//! - Live watching with an interactive prompt
//! - Undo, statistics and history display

use crate::config::AppConfig;
use crate::file_organizer::Organizer;
use crate::instance_lock::InstanceLock;
use crate::output::OutputFormatter;
use crate::undo::UndoError;
use crate::watcher::Watcher;
use clap::{Parser, Subcommand};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use tracing::debug;

/// Sorts files in a folder into category subfolders by extension.
#[derive(Debug, Parser)]
#[command(name = "smartsort", version, about)]
pub struct Cli {
    /// Configuration file (TOML, or JSON if it ends in .json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: OrganizeCommand,
}

/// Represents a CLI command to execute.
#[derive(Debug, Clone, Subcommand)]
pub enum OrganizeCommand {
    /// Organize every file currently in the folder.
    Organize {
        /// Folder to organize (defaults to the configured watched folder)
        dir: Option<PathBuf>,
        /// Show what would happen without moving anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Watch the folder and organize files as they appear.
    Watch {
        dir: Option<PathBuf>,
        /// Organize files already in the folder before watching
        #[arg(long)]
        initial: bool,
        /// Save DIR as the watched folder in the configuration file
        #[arg(long, requires = "dir")]
        remember: bool,
    },
    /// Undo the most recent move.
    Undo { dir: Option<PathBuf> },
    /// Show how many files went to each category.
    Stats { dir: Option<PathBuf> },
    /// List recent moves.
    History {
        dir: Option<PathBuf>,
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Print the extension to category table in effect.
    Rules,
}

impl OrganizeCommand {
    fn dir(&self) -> Option<&Path> {
        match self {
            OrganizeCommand::Organize { dir, .. }
            | OrganizeCommand::Watch { dir, .. }
            | OrganizeCommand::Undo { dir }
            | OrganizeCommand::Stats { dir }
            | OrganizeCommand::History { dir, .. } => dir.as_deref(),
            OrganizeCommand::Rules => None,
        }
    }

    /// Whether the command moves files, and so must be the only instance running.
    fn moves_files(&self) -> bool {
        matches!(
            self,
            OrganizeCommand::Organize { dry_run: false, .. }
                | OrganizeCommand::Watch { .. }
                | OrganizeCommand::Undo { .. }
        )
    }
}

/// Runs the CLI application with the given command.
///
/// Configuration is looked up from `config_path` or the default locations; a
/// broken configuration file is reported and replaced by defaults.
///
/// # Examples
///
/// ```no_run
/// use smartsort::cli::{run_cli, OrganizeCommand};
/// use std::path::PathBuf;
///
/// let command = OrganizeCommand::Organize {
///     dir: Some(PathBuf::from("/path/to/directory")),
///     dry_run: true,
/// };
/// if let Err(e) = run_cli(command, None) {
///     eprintln!("Error: {}", e);
/// }
/// ```
pub fn run_cli(command: OrganizeCommand, config_path: Option<&Path>) -> Result<(), String> {
    let config = AppConfig::load_or_default(config_path);
    run_cli_with_config(command, &config)
}

/// Runs the CLI application with an already loaded configuration.
pub fn run_cli_with_config(command: OrganizeCommand, config: &AppConfig) -> Result<(), String> {
    if let OrganizeCommand::Rules = command {
        let rules = config.rule_table().map_err(|e| e.to_string())?;
        OutputFormatter::rules_table(&rules);
        return Ok(());
    }

    let dir = resolve_folder(command.dir(), config)?;
    let organizer = Organizer::from_config(&dir, config).map_err(|e| e.to_string())?;

    let _lock = if command.moves_files() {
        Some(InstanceLock::acquire(&config.lock_path()).map_err(|e| e.to_string())?)
    } else {
        None
    };

    match command {
        OrganizeCommand::Organize { dry_run: true, .. } => dry_run(&organizer),
        OrganizeCommand::Organize { .. } => organize_now(&organizer),
        OrganizeCommand::Watch {
            initial, remember, ..
        } => {
            if remember {
                remember_folder(organizer.root(), config);
            }
            watch(organizer, config, initial)
        }
        OrganizeCommand::Undo { .. } => undo(&organizer),
        OrganizeCommand::Stats { .. } => {
            OutputFormatter::summary_table(&organizer.stats());
            Ok(())
        }
        OrganizeCommand::History { limit, .. } => {
            OutputFormatter::history_table(organizer.root(), &organizer.history(), limit);
            Ok(())
        }
        OrganizeCommand::Rules => Ok(()),
    }
}

fn resolve_folder(dir: Option<&Path>, config: &AppConfig) -> Result<PathBuf, String> {
    dir.map(Path::to_path_buf)
        .or_else(|| config.watched_folder.clone())
        .ok_or_else(|| "No folder given and no watched_folder configured".to_string())
}

/// Organizes every file in the folder, with a progress bar.
fn organize_now(organizer: &Organizer) -> Result<(), String> {
    OutputFormatter::info(&format!(
        "Organizing contents of: {}",
        organizer.root().display()
    ));

    let files = organizer.pending_files().map_err(|e| e.to_string())?;
    if files.is_empty() {
        OutputFormatter::plain("No files found to organize.");
        return Ok(());
    }

    let pb = OutputFormatter::create_progress_bar(files.len() as u64);
    let report = organizer.organize_paths(&files, |record| {
        pb.println(OutputFormatter::outcome_line(organizer.root(), record));
        pb.inc(1);
    });
    pb.finish_and_clear();

    OutputFormatter::success(&format!(
        "Moved {}, duplicates {}, skipped {}",
        report.moved(),
        report.duplicates(),
        report.skipped()
    ));
    if report.failed() > 0 {
        OutputFormatter::warning(&format!(
            "{} files could not be organized; they were left in place",
            report.failed()
        ));
    }
    OutputFormatter::summary_table(&organizer.stats());
    Ok(())
}

/// Shows where each file would go without moving anything.
fn dry_run(organizer: &Organizer) -> Result<(), String> {
    OutputFormatter::dry_run_notice(&format!(
        "Analyzing contents of: {}",
        organizer.root().display()
    ));

    let plans = organizer.plan_folder().map_err(|e| e.to_string())?;
    let plans: Vec<_> = plans.into_iter().flatten().collect();
    if plans.is_empty() {
        OutputFormatter::plain("No files found to organize.");
        return Ok(());
    }

    for plan in &plans {
        OutputFormatter::plan_line(organizer.root(), plan);
    }
    OutputFormatter::dry_run_notice(&format!(
        "{} files would be moved. No files were modified.",
        plans.len()
    ));
    Ok(())
}

fn undo(organizer: &Organizer) -> Result<(), String> {
    match organizer.undo_last() {
        Ok(undone) => {
            OutputFormatter::success(&format!(
                "Restored {} (from {})",
                undone.restored_path().display(),
                undone.entry.destination.display()
            ));
            Ok(())
        }
        Err(UndoError::EmptyHistory) => {
            OutputFormatter::plain("Nothing to undo.");
            Ok(())
        }
        Err(e) => Err(e.to_string()),
    }
}

/// Stores `folder` as the watched folder. Failing to save does not stop watching.
fn remember_folder(folder: &Path, config: &AppConfig) {
    match config.remember_folder(folder) {
        Ok(path) => OutputFormatter::success(&format!(
            "Saved {} as the watched folder in {}",
            folder.display(),
            path.display()
        )),
        Err(e) => OutputFormatter::warning(&format!("Could not save watched folder: {}", e)),
    }
}

/// Re-reads the configuration and swaps in its category rules.
fn reload_rules(organizer: &Organizer, config: &AppConfig) -> Result<(), String> {
    let rules = config.reload().rule_table().map_err(|e| e.to_string())?;
    organizer.update_rules(rules);
    OutputFormatter::success("Category rules reloaded");
    Ok(())
}

enum Control {
    Line(String),
    Quit,
}

/// Watches the folder until Ctrl-C or `quit`, accepting commands on stdin.
fn watch(organizer: Organizer, config: &AppConfig, initial: bool) -> Result<(), String> {
    let organizer = Arc::new(organizer);

    if initial {
        organize_now(&organizer)?;
    }

    let mut watcher = Watcher::start(
        organizer.root(),
        organizer.clone(),
        config.watcher.to_settings(),
    )
    .map_err(|e| e.to_string())?;

    let (tx, rx) = mpsc::channel();
    let quit_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = quit_tx.send(Control::Quit);
    })
    .map_err(|e| format!("Failed to install Ctrl-C handler: {}", e))?;

    // Stdin blocks, so it gets its own thread; it ends with the process.
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(Control::Line(line)).is_err() {
                break;
            }
        }
        let _ = tx.send(Control::Quit);
    });

    OutputFormatter::info(&format!(
        "Watching {} (commands: organize, undo, stats, history, reload, quit)",
        organizer.root().display()
    ));

    while let Ok(Control::Line(line)) = rx.recv() {
        debug!("Command: {}", line.trim());
        let result = match line.trim() {
            "" => Ok(()),
            "o" | "organize" => organize_now(&organizer),
            "u" | "undo" => undo(&organizer),
            "s" | "stats" => {
                OutputFormatter::summary_table(&organizer.stats());
                Ok(())
            }
            "r" | "reload" => reload_rules(&organizer, config),
            "h" | "history" => {
                OutputFormatter::history_table(organizer.root(), &organizer.history(), 10);
                Ok(())
            }
            "q" | "quit" | "exit" => break,
            other => {
                OutputFormatter::warning(&format!("Unknown command: {}", other));
                Ok(())
            }
        };
        if let Err(e) = result {
            OutputFormatter::error(&e);
        }
    }

    watcher.stop();
    OutputFormatter::summary_table(&organizer.stats());
    Ok(())
}
