//! macrokit command line

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use macrokit::player::preflight;
use macrokit::{storage, CommandSequence, PlayOptions, SequenceDocument, UnifiedSequence};
use std::path::{Path, PathBuf};

mod dry_run;
mod utils;

use utils::{describe, init_logging, load_playable, load_settings};

#[derive(Parser)]
#[command(name = "macrokit")]
#[command(about = "Inspect, validate and replay recorded UI macros")]
struct Cli {
    /// Execution settings file (JSON)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a sequence file's metadata and steps
    Inspect {
        file: PathBuf,
    },

    /// Check loop structure and references; exits non-zero on errors
    Validate {
        file: PathBuf,
    },

    /// Expand a unified sequence into a flat one
    Flatten {
        file: PathBuf,

        /// Output file; prints JSON to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replay a sequence
    Play {
        file: PathBuf,

        /// Outer repetitions; 0 repeats until Ctrl+C
        #[arg(short, long, default_value = "1")]
        repeat: u32,

        /// Trust recorded coordinates and skip the element search
        #[arg(long)]
        direct: bool,

        /// Play even when loop markers are unbalanced
        #[arg(long)]
        force: bool,

        /// Play against an in-memory window built from the sequence
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Commands::Inspect { file } => inspect(&file),
        Commands::Validate { file } => validate(&file),
        Commands::Flatten { file, output } => flatten(&file, output.as_deref()),
        Commands::Play {
            file,
            repeat,
            direct,
            force,
            dry_run,
        } => {
            if !dry_run {
                bail!("no platform automation engine is built in; use --dry-run");
            }
            let settings = load_settings(cli.settings.as_deref())?;
            let sequence = load_playable(&file)?;
            let options = PlayOptions {
                direct_mode: direct,
                allow_structural_warnings: force,
            };
            let outcome = dry_run::play(&sequence, settings, repeat, options).await?;
            println!(
                "{}: {} of {} steps executed",
                if outcome.success { "success" } else { "failed" },
                outcome.commands_executed,
                outcome.total_commands
            );
            if !outcome.message.is_empty() {
                println!("{}", outcome.message);
            }
            if !outcome.success && !outcome.stopped {
                bail!("playback failed");
            }
            Ok(())
        }
    }
}

fn inspect(path: &Path) -> Result<()> {
    let document = storage::load_any(path).with_context(|| format!("failed to load {}", path.display()))?;
    match document {
        SequenceDocument::Flat(sequence) => print_flat(&sequence),
        SequenceDocument::Unified(unified) => print_unified(&unified),
    }
    Ok(())
}

fn print_flat(sequence: &CommandSequence) {
    println!("Name:     {}", sequence.name);
    if !sequence.description.is_empty() {
        println!("About:    {}", sequence.description);
    }
    println!(
        "Target:   {} \"{}\"",
        sequence.target_process_name, sequence.target_window_title
    );
    println!("Created:  {}", sequence.created.to_rfc3339());
    println!("Modified: {}", sequence.last_modified.to_rfc3339());
    println!();
    println!("{:>4}  {:<10} {:<24} TARGET", "STEP", "TYPE", "VALUE");
    for command in sequence.commands() {
        println!(
            "{:>4}  {:<10} {:<24} {}",
            command.step_number(),
            format!("{:?}", command.command_type()),
            command.value(),
            describe(&command.descriptor())
        );
    }
}

fn print_unified(unified: &UnifiedSequence) {
    println!("Name:     {} (unified)", unified.name);
    println!(
        "Target:   {} \"{}\"",
        unified.target_process_name, unified.target_window_title
    );
    println!("Modified: {}", unified.last_modified.to_rfc3339());
    println!();
    println!("{:>4}  {:<14} {:<28} {:>6}  STATUS", "STEP", "ACTION", "VALUE", "REPEAT");
    for item in unified.items() {
        println!(
            "{:>4}  {:<14} {:<28} {:>6}  {}",
            item.step_number(),
            item.action(),
            item.value(),
            item.repeat_count(),
            item.status
        );
    }
}

fn validate(path: &Path) -> Result<()> {
    let document = storage::load_any(path).with_context(|| format!("failed to load {}", path.display()))?;
    let sequence = match document {
        SequenceDocument::Flat(sequence) => sequence,
        SequenceDocument::Unified(_) => {
            let flattened = storage::flatten_file(path)?;
            for skipped in &flattened.skipped {
                println!("warning: step {} ({}) skipped: {}", skipped.step_number, skipped.name, skipped.reason);
            }
            flattened.sequence
        }
    };

    let report = sequence.loop_report();
    println!("{report}");
    match preflight(sequence.commands()) {
        Ok(plan) => {
            for warning in &plan.warnings {
                println!("warning: {warning}");
            }
            println!("{} step invocations per run", plan.invocations_per_run);
            Ok(())
        }
        Err(issue) => bail!("{issue}"),
    }
}

fn flatten(path: &Path, output: Option<&Path>) -> Result<()> {
    let mut flattened = storage::flatten_file(path)?;
    for skipped in &flattened.skipped {
        eprintln!("warning: step {} ({}) skipped: {}", skipped.step_number, skipped.name, skipped.reason);
    }
    match output {
        Some(output) => {
            storage::save_flat(&mut flattened.sequence, output)?;
            eprintln!("{} steps written to {}", flattened.sequence.len(), output.display());
        }
        None => println!("{}", flattened.sequence.to_json()?),
    }
    Ok(())
}
