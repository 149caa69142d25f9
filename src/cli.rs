//! Command-line interface module for foldersort.
//!
//! This module handles all CLI-related functionality including:
//! - Argument parsing
//! - Loading settings and building sort requests
//! - Driving sort and undo runs with a progress bar
//! - Reporting results

use crate::config::Settings;
use crate::jobs::{JobHandle, Organizer};
use crate::output::OutputFormatter;
use crate::progress::{CancelToken, EngineEvent};
use crate::sort_engine::SortRequest;
use crate::undo::UndoOutcome;
use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};

/// Sort the files of a directory into folders by extension, or undo it.
#[derive(Parser, Debug)]
#[command(name = "foldersort", version, about)]
pub struct Cli {
    /// Directory whose files should be sorted
    pub directory: PathBuf,

    /// Show what would be moved without touching anything
    #[arg(long, conflicts_with_all = ["undo", "status"])]
    pub dry_run: bool,

    /// Move the files of the last sort back where they were
    #[arg(long, conflicts_with = "status")]
    pub undo: bool,

    /// Show whether the directory has a sort that can be undone
    #[arg(long)]
    pub status: bool,

    /// Settings file to use instead of the default lookup
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn organize_command(&self) -> OrganizeCommand {
        if self.undo {
            OrganizeCommand::Undo
        } else if self.status {
            OrganizeCommand::Status
        } else {
            OrganizeCommand::Organize {
                dry_run: self.dry_run,
            }
        }
    }
}

/// Represents a CLI command to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganizeCommand {
    /// Sort files in a directory.
    Organize {
        /// If true, only report what would happen.
        dry_run: bool,
    },
    /// Undo the previous sort.
    Undo,
    /// Report the pending session, if any.
    Status,
}

/// Runs the CLI application with the given command and directory path.
///
/// # Examples
///
/// ```no_run
/// use foldersort::cli::{run_cli, OrganizeCommand};
/// use std::path::Path;
///
/// let command = OrganizeCommand::Organize { dry_run: false };
/// let result = run_cli(command, Path::new("/path/to/directory"));
/// match result {
///     Ok(()) => println!("Operation completed successfully"),
///     Err(e) => eprintln!("Error: {:#}", e),
/// }
/// ```
pub fn run_cli(command: OrganizeCommand, dir_path: &Path) -> Result<()> {
    run_cli_with_config(command, dir_path, None)
}

/// Runs the CLI application with an optional settings file.
pub fn run_cli_with_config(
    command: OrganizeCommand,
    dir_path: &Path,
    config_path: Option<&Path>,
) -> Result<()> {
    run_cli_interruptible(command, dir_path, config_path, &CancelToken::new())
}

/// Like [`run_cli_with_config`], stopping a running sort or undo once
/// `interrupt` is cancelled. The binary cancels it on Ctrl-C.
pub fn run_cli_interruptible(
    command: OrganizeCommand,
    dir_path: &Path,
    config_path: Option<&Path>,
    interrupt: &CancelToken,
) -> Result<()> {
    let organizer = Organizer::new();
    match command {
        OrganizeCommand::Organize { dry_run } => {
            let settings = Settings::load(config_path).context("Error loading configuration")?;
            let request = build_request(dir_path, &settings)?;
            if dry_run {
                preview_directory(&organizer, &request)
            } else {
                sort_directory(&organizer, request, interrupt)
            }
        }
        OrganizeCommand::Undo => undo_sort(&organizer, dir_path, interrupt),
        OrganizeCommand::Status => show_status(&organizer, dir_path),
    }
}

fn build_request(dir_path: &Path, settings: &Settings) -> Result<SortRequest> {
    let extension_map = settings
        .extension_map()
        .context("Invalid folder mapping in configuration")?;
    let default_folder = settings
        .default_folder()
        .context("Invalid default folder in configuration")?;
    let filters = settings
        .compile_filters()
        .context("Error compiling filters")?;
    Ok(SortRequest::new(dir_path, extension_map, default_folder).with_filters(filters))
}

fn sort_directory(
    organizer: &Organizer,
    request: SortRequest,
    interrupt: &CancelToken,
) -> Result<()> {
    let dir_path = request.target_directory.clone();
    OutputFormatter::info(&format!("Sorting contents of: {}", dir_path.display()));

    let job = organizer
        .spawn_sort_with(request, interrupt.clone())
        .with_context(|| format!("Cannot sort {}", dir_path.display()))?;
    follow_job(&job);
    let summary = job.wait().context("Sort stopped")?;

    if summary.total == 0 {
        if summary.was_cancelled() {
            OutputFormatter::warning("Sort was cancelled before any file was moved.");
        } else {
            OutputFormatter::plain("No files found to sort.");
        }
        return Ok(());
    }

    OutputFormatter::summary_table(&summary.moved_by_folder, summary.moved);

    if summary.was_cancelled() {
        OutputFormatter::warning(&format!(
            "Sort was cancelled after {} of {} files.",
            summary.moved, summary.total
        ));
    }
    let unsorted = summary.skipped.len() + summary.failed.len();
    if unsorted > 0 {
        OutputFormatter::warning(&format!(
            "{} files were left in place. See the messages above.",
            unsorted
        ));
    }
    if summary.moved > 0 {
        OutputFormatter::success(&format!(
            "Sort complete. Use 'foldersort {} --undo' to revert changes.",
            dir_path.display()
        ));
    }
    Ok(())
}

fn preview_directory(organizer: &Organizer, request: &SortRequest) -> Result<()> {
    let plan = organizer
        .preview(request)
        .with_context(|| format!("Cannot analyze {}", request.target_directory.display()))?;

    OutputFormatter::dry_run_notice(&format!(
        "Analyzing contents of: {}",
        plan.target_directory.display()
    ));
    if plan.moves.is_empty() && plan.skipped.is_empty() {
        OutputFormatter::plain("No files found to sort.");
        return Ok(());
    }

    OutputFormatter::header("Files would be sorted as follows:");
    for planned in &plan.moves {
        let name = planned
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        OutputFormatter::plain(&format!(" - {} → {}/", name, planned.folder));
    }
    for issue in &plan.skipped {
        OutputFormatter::plain(&OutputFormatter::issue_line(issue));
    }

    OutputFormatter::summary_table(&plan.folder_counts(), plan.moves.len());
    OutputFormatter::dry_run_notice("No files were modified.");
    Ok(())
}

fn undo_sort(organizer: &Organizer, dir_path: &Path, interrupt: &CancelToken) -> Result<()> {
    OutputFormatter::info("Undoing previous sort...");

    let job = organizer
        .spawn_undo_with(dir_path.to_path_buf(), interrupt.clone())
        .with_context(|| format!("Cannot undo in {}", dir_path.display()))?;
    follow_job(&job);
    let report = job.wait().context("Undo stopped")?;

    OutputFormatter::plain(&format!("  Restored: {}", report.restored_files));
    if report.already_in_place > 0 {
        OutputFormatter::plain(&format!("  Already in place: {}", report.already_in_place));
    }
    for renamed in &report.renamed_on_restore {
        OutputFormatter::plain(&format!("  Restored under new name: {}", renamed.display()));
    }
    for folder in &report.removed_folders {
        OutputFormatter::plain(&format!("  Removed empty folder: {}", folder.display()));
    }

    match report.outcome {
        UndoOutcome::Complete => OutputFormatter::success("Undo complete!"),
        UndoOutcome::Partial => {
            OutputFormatter::warning(&format!(
                "{} files could not be restored. The session was kept; \
                 fix the issues and run --undo again.",
                report.failed_restores.len()
            ));
        }
        UndoOutcome::Cancelled => {
            OutputFormatter::warning("Undo was cancelled. Run --undo again to finish.");
        }
    }
    Ok(())
}

fn show_status(organizer: &Organizer, dir_path: &Path) -> Result<()> {
    let session = organizer
        .pending_session(dir_path)
        .with_context(|| format!("Cannot read session in {}", dir_path.display()))?;

    match session {
        Some(session) => {
            OutputFormatter::info(&format!(
                "Last sort of {} started at {}",
                session.target_directory.display(),
                session.started_at.format("%Y-%m-%d %H:%M:%S UTC")
            ));
            OutputFormatter::plain(&format!(
                "  Files that can be restored: {}",
                session.records.len()
            ));
            OutputFormatter::plain(&format!(
                "  Folders created: {}",
                session.created_folders.len()
            ));
        }
        None => OutputFormatter::plain("Nothing to undo."),
    }
    Ok(())
}

/// Draws the job's events on a progress bar until the job ends.
fn follow_job<T: Send + 'static>(job: &JobHandle<T>) {
    let pb = OutputFormatter::create_progress_bar(0);
    for event in job.events().iter() {
        draw_event(&pb, &event);
    }
    pb.finish_and_clear();
}

fn draw_event(pb: &ProgressBar, event: &EngineEvent) {
    match event {
        EngineEvent::Progress(progress) => {
            pb.set_length(progress.total_count as u64);
            pb.set_position(progress.processed_count as u64);
            pb.set_message(progress.current_filename.clone());
        }
        EngineEvent::Issue(issue) => pb.println(OutputFormatter::issue_line(issue)),
        EngineEvent::State(_) => {}
    }
}
