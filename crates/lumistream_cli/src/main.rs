//! lumistream CLI
//!
//! Command-line tools for lumistream run directories.
//!
//! # Commands
//!
//! - `read` - Follow a run and print its events
//! - `inspect` - Dump the header and event ids of a streamer file
//! - `produce` - Simulate a producer publishing lumi-sections
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use lumistream_core::{EventRange, LumiRange};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// lumistream command-line tools.
#[derive(Parser)]
#[command(name = "lumistream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a run and print its events
    Read {
        /// Directory containing the run directories
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Run number
        #[arg(short, long)]
        run: Option<u32>,

        /// JSON reader configuration; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Events to read per lumi-section before switching to a newer one
        #[arg(long)]
        min_events_per_lumi: Option<u64>,

        /// Start with the most recent lumi-section
        #[arg(long)]
        skip_first_lumis: bool,

        /// Delete data files once opened
        #[arg(long)]
        delete_dat_files: bool,

        /// Stop as soon as the end-of-run marker appears
        #[arg(long)]
        end_of_run_kills: bool,

        /// Delay between polls in milliseconds
        #[arg(long)]
        poll_interval_ms: Option<u64>,

        /// How long to wait for a missing lumi-section in milliseconds
        #[arg(long)]
        lumi_gap_timeout_ms: Option<u64>,

        /// Events to leave out (R:L:E or R:L:E-R:L:E), repeatable
        #[arg(long)]
        skip_events: Vec<EventRange>,

        /// Lumi-sections to leave out (R:L or R:L-R:L), repeatable
        #[arg(long)]
        skip_lumis: Vec<LumiRange>,

        /// Only process these events (R:L:E or R:L:E-R:L:E), repeatable
        #[arg(long)]
        events_to_process: Vec<EventRange>,

        /// Number of events to skip before printing
        #[arg(long, default_value = "0")]
        skip: u64,

        /// Stop after this many events
        #[arg(short, long)]
        limit: Option<u64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump the header and event ids of a streamer file
    Inspect {
        /// Streamer file
        file: PathBuf,

        /// Maximum number of event ids to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Simulate a producer publishing lumi-sections
    Produce {
        /// Directory containing the run directories
        #[arg(short, long)]
        dir: PathBuf,

        /// Run number
        #[arg(short, long)]
        run: u32,

        /// Number of lumi-sections to publish
        #[arg(long, default_value = "3")]
        lumis: u32,

        /// Events per lumi-section
        #[arg(long, default_value = "10")]
        events: u64,

        /// First lumi-section to publish
        #[arg(long, default_value = "1")]
        first_lumi: u32,

        /// Stream name used in file names
        #[arg(long, default_value = "streamDQM")]
        stream: String,

        /// Delay between lumi-sections in milliseconds
        #[arg(long, default_value = "0")]
        interval_ms: u64,

        /// Publish the end-of-run marker when done
        #[arg(long)]
        end_of_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Read {
            dir,
            run,
            config,
            min_events_per_lumi,
            skip_first_lumis,
            delete_dat_files,
            end_of_run_kills,
            poll_interval_ms,
            lumi_gap_timeout_ms,
            skip_events,
            skip_lumis,
            events_to_process,
            skip,
            limit,
            format,
        } => {
            let options = commands::read::ReadOptions {
                dir,
                run,
                config,
                min_events_per_lumi,
                skip_first_lumis,
                delete_dat_files,
                end_of_run_kills,
                poll_interval_ms,
                lumi_gap_timeout_ms,
                skip_events,
                skip_lumis,
                events_to_process,
                skip,
                limit,
            };
            commands::read::run(&options, &format)?;
        }
        Commands::Inspect {
            file,
            limit,
            format,
        } => {
            commands::inspect::run(&file, limit, &format)?;
        }
        Commands::Produce {
            dir,
            run,
            lumis,
            events,
            first_lumi,
            stream,
            interval_ms,
            end_of_run,
        } => {
            let plan = commands::produce::ProducePlan {
                run,
                first_lumi,
                lumis,
                events_per_lumi: events,
                stream,
                interval: std::time::Duration::from_millis(interval_ms),
                end_of_run,
            };
            commands::produce::run(&dir, &plan)?;
        }
        Commands::Version => {
            println!("lumistream CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("lumistream core v{}", lumistream_core::VERSION);
        }
    }

    Ok(())
}
