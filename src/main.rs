mod apply;
mod backup;
mod diagnostics;
mod digest;
mod error;
mod extract;
mod index;
mod manifest;
mod resource_id;
mod restore;
mod session;
mod settings;
mod snapshot;
mod store;
mod util;
mod verify;

use anyhow::Context;
use clap::{Parser, Subcommand};
use console::style;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use crate::session::{RunSummary, Session};
use crate::settings::{Layout, Settings};

#[derive(Parser)]
#[command(name = "patchstack", about = "Stacked game patch installer with reversible backups")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, index and apply every patch in the manifest
    Install {
        /// Restore the original install before applying
        #[arg(long, conflicts_with = "no_restore")]
        restore: bool,
        /// Apply on top of the current install without asking
        #[arg(long)]
        no_restore: bool,
        #[command(flatten)]
        settings: Settings,
    },
    /// Extract and index the manifest, report conflicts, change nothing
    Inspect {
        #[command(flatten)]
        settings: Settings,
    },
    /// Audit the backup chains of an install
    Verify {
        /// Path to the game directory
        #[arg(long, env = "PATCHSTACK_GAME_DIR")]
        game_dir: PathBuf,
        /// Directory holding the original snapshot (default: <game-dir>/temp)
        #[arg(long)]
        work_dir: Option<PathBuf>,
        #[command(flatten)]
        layout: Layout,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    match cli.command {
        Commands::Install {
            restore,
            no_restore,
            settings,
        } => {
            let config = settings.validate().context("invalid settings")?;
            println!("Installing patches...");
            println!("  Game: {}", config.game_dir.display());
            println!("  Manifest: {}", config.manifest.display());

            let start = Instant::now();
            let mut session = Session::new(config);
            session.index().await.context("indexing the manifest failed")?;

            let restore = restore || (!no_restore && confirm("Restore the original install first?")?);
            if restore {
                session.restore().context("restore failed")?;
            }
            let summary = session.apply().context("applying patches failed")?;
            print_summary(&summary);
            println!("  Time elapsed: {:.3}s", start.elapsed().as_secs_f64());
            println!("\n{}", style("Completed!").green().bold());
        }
        Commands::Inspect { settings } => {
            let config = settings.validate().context("invalid settings")?;
            let mut session = Session::new(config);
            session.index().await.context("indexing the manifest failed")?;

            for patch in session.patches() {
                let bytes: u64 = patch.files.iter().map(|f| f.size).sum();
                println!(
                    "{}: {} file(s), {} bytes, {} conflict(s)",
                    style(patch.archive.name()).bold(),
                    patch.files.len(),
                    bytes,
                    patch.conflicts.len()
                );
                for path in &patch.conflicts {
                    println!("    {path}");
                }
            }
            for overlap in session.overlaps() {
                println!(
                    "{} <-> {}: {} shared file(s)",
                    overlap.first,
                    overlap.second,
                    overlap.paths.len()
                );
            }
            for archive in session.skipped_archives() {
                println!("{} {}", style("skipped").yellow(), archive.display());
            }
        }
        Commands::Verify {
            game_dir,
            work_dir,
            layout,
        } => {
            let work_dir = settings::work_dir_for(&game_dir, work_dir.as_deref());
            let report = verify::verify(&game_dir, &work_dir, &layout.anchor)
                .with_context(|| format!("verifying {}", game_dir.display()))?;

            println!(
                "Checked {} index(es), {} chain(s), {} backup(s)",
                report.indexes, report.chains, report.backups
            );
            if !report.is_clean() {
                for problem in &report.problems {
                    println!("  {} {problem}", style("!").red().bold());
                }
                anyhow::bail!("{} problem(s) found", report.problems.len());
            }
            println!("{}", style("Backup chains are consistent").green());
        }
    }

    Ok(())
}

fn confirm(question: &str) -> io::Result<bool> {
    print!("\n{question} [y/N] ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn print_summary(summary: &RunSummary) {
    if let Some(report) = &summary.restore {
        println!("\nRestored original install:");
        println!("  Files restored: {}", report.restored);
        println!("  Backups removed: {}", report.backups_removed);
        println!("  Introduced files removed: {}", report.introduced_removed);
    }

    println!("\nPatches applied: {}", summary.patches_applied);
    if summary.skipped_archives > 0 {
        println!(
            "  {}",
            style(format!("Archives skipped: {}", summary.skipped_archives)).yellow()
        );
    }
    println!("  Files copied: {}", summary.files.files_copied);
    println!("  Files replaced: {}", summary.files.files_replaced);
    println!("  Already up to date: {}", summary.files.skipped_identical);
    println!("  Missing sources: {}", summary.files.missing_sources);
    println!("  Remapped files: {}", summary.files.remapped);
    for (from, to) in &summary.remaps {
        println!("    ID {from} -> {to}");
    }
    println!("  Total conflicts: {}", summary.total_conflicts);
}
