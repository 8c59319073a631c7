use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};

use imgdedup::{
    DuplicateReport, ExportFormat, ScanConfig, ScanHandle, Scanner, UndoManager,
    DEFAULT_MAX_DISTANCE,
};

#[derive(Parser, Debug)]
#[command(name = "imgdedup", version, about = "Find and remove visually duplicate images")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a folder and list duplicate groups
    Scan {
        /// Directory to scan
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        /// Do not descend into subdirectories
        #[arg(long)]
        no_recursive: bool,
        /// Hamming distance threshold in bits
        #[arg(long, default_value_t = DEFAULT_MAX_DISTANCE)]
        threshold: u32,
        /// Glob patterns to exclude (repeatable)
        #[arg(long, value_name = "PATTERN")]
        exclude: Vec<String>,
        /// Fingerprint cache file
        #[arg(long, value_name = "FILE")]
        cache: Option<PathBuf>,
        /// Write the report in this format
        #[arg(long, value_enum)]
        export: Option<ExportArg>,
        /// Where to write the exported report (defaults to stdout)
        #[arg(long, value_name = "FILE", requires = "export")]
        output: Option<PathBuf>,
    },

    /// Scan, then move every non-representative duplicate into the staging area
    Cull {
        #[arg(short, long, value_name = "DIR")]
        path: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_DISTANCE)]
        threshold: u32,
        /// Only show what would be moved
        #[arg(long)]
        dry_run: bool,
        /// Staging directory (default: ~/.imgdedup-trash)
        #[arg(long, value_name = "DIR")]
        staging_dir: Option<PathBuf>,
    },

    /// Restore staged files
    Undo {
        /// Staging directory (default: ~/.imgdedup-trash)
        #[arg(long, value_name = "DIR")]
        staging_dir: Option<PathBuf>,
        /// Restore everything, not just the last operation
        #[arg(long)]
        all: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ExportArg {
    Csv,
    Json,
}

impl From<ExportArg> for ExportFormat {
    fn from(arg: ExportArg) -> Self {
        match arg {
            ExportArg::Csv => ExportFormat::Csv,
            ExportArg::Json => ExportFormat::Json,
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            path,
            no_recursive,
            threshold,
            exclude,
            cache,
            export,
            output,
        } => {
            let mut config = ScanConfig::new(&path)
                .recursive(!no_recursive)
                .max_distance(threshold);
            config.exclude_patterns = exclude;
            config.cache_path = cache;

            let report = scan_with_progress(config)?;
            print_report(&report);

            if let Some(format) = export {
                let bytes = report.export(format.into())?;
                match output {
                    Some(out) => {
                        fs::write(&out, bytes)
                            .with_context(|| format!("failed to write {}", out.display()))?;
                        println!("Report written to {}", out.display());
                    }
                    None => print!("{}", String::from_utf8_lossy(&bytes)),
                }
            }
        }

        Commands::Cull {
            path,
            threshold,
            dry_run,
            staging_dir,
        } => {
            let report = scan_with_progress(ScanConfig::new(&path).max_distance(threshold))?;
            if report.is_empty() {
                println!("No duplicates found.");
                return Ok(());
            }

            let mut manager = open_manager(staging_dir)?;
            let mut moved = 0usize;
            for group in &report.groups {
                println!("Group {}: keeping {}", group.id, group.representative().path.display());
                for dup in group.duplicates() {
                    if dry_run {
                        println!("  [dry-run] would stage {}", dup.path.display());
                    } else {
                        let entry = manager.record_delete(&dup.path)?;
                        println!(
                            "  staged {} -> {}",
                            dup.path.display(),
                            entry.staged_path.display()
                        );
                        moved += 1;
                    }
                }
            }
            if !dry_run {
                println!(
                    "\nStaged {moved} file(s); run `imgdedup undo` to restore the last one."
                );
            }
        }

        Commands::Undo { staging_dir, all } => {
            let mut manager = open_manager(staging_dir)?;
            if !manager.can_undo() {
                println!("Nothing to undo.");
                return Ok(());
            }
            loop {
                match manager.undo_last()? {
                    Some(entry) => {
                        println!("Restored {}", entry.original_path.display());
                    }
                    None => break,
                }
                if !all {
                    break;
                }
            }
        }
    }

    Ok(())
}

fn open_manager(staging_dir: Option<PathBuf>) -> Result<UndoManager> {
    Ok(match staging_dir {
        Some(dir) => UndoManager::with_staging_dir(dir)?,
        None => UndoManager::new()?,
    })
}

fn scan_with_progress(config: ScanConfig) -> Result<DuplicateReport> {
    let scanner = Scanner::new(config);
    let handle = scanner.scan();

    let bar = ProgressBar::new(0);
    bar.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )?);
    bar.set_message("fingerprinting");

    drain_progress(&handle, &bar);
    bar.finish_and_clear();

    Ok(handle.join()?)
}

fn drain_progress(handle: &ScanHandle, bar: &ProgressBar) {
    loop {
        match handle.events().recv_timeout(Duration::from_millis(100)) {
            Ok(event) => {
                bar.set_length(event.total_files as u64);
                bar.set_position(event.files_processed as u64);
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if handle.is_finished() {
                    break;
                }
                let (done, total) = handle.progress();
                bar.set_length(total as u64);
                bar.set_position(done as u64);
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn print_report(report: &DuplicateReport) {
    if report.is_empty() {
        println!("No duplicates found.");
    } else {
        println!("Found {} duplicate group(s):", report.groups.len());
        for group in &report.groups {
            println!(
                "\nGroup {} ({:?}, {} bytes reclaimable):",
                group.id, group.kind, group.reclaimable_bytes
            );
            println!("  keep   {}", group.representative().path.display());
            for dup in group.duplicates() {
                println!("  dupe   {}", dup.path.display());
            }
        }
    }

    let stats = &report.stats;
    println!(
        "\nScanned {} file(s), {} fingerprinted, {} failed, {} cache hit(s).",
        stats.files_discovered, stats.files_fingerprinted, stats.files_failed, stats.cache_hits
    );
    if !report.failures.is_empty() {
        println!("Failures:");
        for failure in &report.failures {
            println!("  {}: {}", failure.path.display(), failure.message);
        }
    }
}
