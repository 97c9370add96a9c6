//! Read command implementation.

use lumistream_core::{
    EventRange, EventRecord, EventSkipper, LumiRange, ReaderConfig, SchemaRegistry, StatsSnapshot,
    StreamerReader,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Options of the read command.
#[derive(Debug, Default)]
pub struct ReadOptions {
    /// Input directory.
    pub dir: Option<PathBuf>,
    /// Run number.
    pub run: Option<u32>,
    /// JSON configuration file.
    pub config: Option<PathBuf>,
    /// Minimum events per lumi-section.
    pub min_events_per_lumi: Option<u64>,
    /// Start with the most recent lumi-section.
    pub skip_first_lumis: bool,
    /// Delete data files once opened.
    pub delete_dat_files: bool,
    /// Stop at the end-of-run marker.
    pub end_of_run_kills: bool,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// Wait for a missing lumi-section in milliseconds.
    pub lumi_gap_timeout_ms: Option<u64>,
    /// Events to leave out.
    pub skip_events: Vec<EventRange>,
    /// Lumi-sections to leave out.
    pub skip_lumis: Vec<LumiRange>,
    /// Allow-list of events.
    pub events_to_process: Vec<EventRange>,
    /// Events to skip before printing.
    pub skip: u64,
    /// Maximum number of events to print.
    pub limit: Option<u64>,
}

/// Summary printed at the end of a read.
#[derive(Debug, Serialize)]
pub struct ReadSummary {
    /// Run that was read.
    pub run: u32,
    /// Events skipped on request.
    pub skipped: u64,
    /// Events delivered.
    pub events: u64,
    /// Labels of the registered products.
    pub products: Vec<String>,
    /// Processes that wrote the files.
    pub process_history: Vec<String>,
    /// Reader counters.
    pub stats: StatsSnapshot,
}

/// Builds the reader configuration from the config file and the flags.
pub fn build_config(options: &ReadOptions) -> Result<ReaderConfig, Box<dyn std::error::Error>> {
    let mut config = match &options.config {
        Some(path) => ReaderConfig::from_json_file(path)?,
        None => {
            let dir = options
                .dir
                .clone()
                .ok_or("--dir is required without --config")?;
            let run = options.run.ok_or("--run is required without --config")?;
            ReaderConfig::new(run, dir)
        }
    };

    if let Some(dir) = &options.dir {
        config.run_input_dir = dir.clone();
    }
    if let Some(run) = options.run {
        config.run_number = run;
    }
    if let Some(min) = options.min_events_per_lumi {
        config.min_events_per_lumi = min;
    }
    if let Some(ms) = options.poll_interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = options.lumi_gap_timeout_ms {
        config.lumi_gap_timeout = Some(Duration::from_millis(ms));
    }
    config.skip_first_lumis |= options.skip_first_lumis;
    config.delete_dat_files |= options.delete_dat_files;
    config.end_of_run_kills |= options.end_of_run_kills;

    config.validate()?;
    Ok(config)
}

/// Builds the event filter from the flags.
pub fn build_skipper(options: &ReadOptions) -> EventSkipper {
    let mut skipper = EventSkipper::new();
    for range in &options.skip_lumis {
        skipper = skipper.skip_lumis(*range);
    }
    for range in &options.skip_events {
        skipper = skipper.skip_events(*range);
    }
    for range in &options.events_to_process {
        skipper = skipper.process_events(*range);
    }
    skipper
}

/// Runs the read command.
pub fn run(options: &ReadOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = build_config(options)?;
    let run = config.run_number;
    let registry = SchemaRegistry::shared();

    let mut reader = StreamerReader::open(config, registry.clone())?;
    let skipper = build_skipper(options);
    if skipper.is_active() {
        reader = reader.with_filter(skipper);
    }
    registry.write().freeze()?;

    let skipped = reader.skip(options.skip)?;

    let text = format != "json";
    let mut events = 0u64;
    let mut print = |event: &EventRecord| -> lumistream_core::CoreResult<()> {
        if text {
            println!("{}  {} bytes", event.id, event.payload.len());
        }
        Ok(())
    };
    while options.limit.map_or(true, |limit| events < limit) {
        if !reader.check_next_event(&mut print)? {
            break;
        }
        events += 1;
    }

    let summary = {
        let registry = registry.read();
        ReadSummary {
            run,
            skipped,
            events,
            products: registry.products().map(|p| p.label.clone()).collect(),
            process_history: registry.process_history().to_vec(),
            stats: reader.stats().snapshot(),
        }
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => print_text_summary(&summary),
    }

    Ok(())
}

fn print_text_summary(summary: &ReadSummary) {
    println!();
    println!("Run {}", summary.run);
    println!("  Events read:    {}", summary.events);
    println!("  Events skipped: {}", summary.skipped);
    println!("  Files opened:   {}", summary.stats.files_opened);
    println!("  Files missing:  {}", summary.stats.files_missing);
    println!("  Files deleted:  {}", summary.stats.files_deleted);
    println!("  Filtered:       {}", summary.stats.events_filtered);
    println!("  Products:       {}", summary.products.join(", "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumistream_core::EventFilter;

    #[test]
    fn config_from_flags() {
        let options = ReadOptions {
            dir: Some(PathBuf::from("/data")),
            run: Some(7),
            min_events_per_lumi: Some(5),
            end_of_run_kills: true,
            poll_interval_ms: Some(20),
            lumi_gap_timeout_ms: Some(500),
            ..ReadOptions::default()
        };
        let config = build_config(&options).unwrap();
        assert_eq!(config.run_number, 7);
        assert_eq!(config.min_events_per_lumi, 5);
        assert!(config.end_of_run_kills);
        assert!(!config.delete_dat_files);
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.lumi_gap_timeout, Some(Duration::from_millis(500)));
    }

    #[test]
    fn flags_override_config_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("reader.json");
        std::fs::write(
            &path,
            r#"{"run_number": 3, "run_input_dir": "/in", "delete_dat_files": true}"#,
        )
        .unwrap();

        let options = ReadOptions {
            config: Some(path),
            run: Some(4),
            ..ReadOptions::default()
        };
        let config = build_config(&options).unwrap();
        assert_eq!(config.run_number, 4);
        assert_eq!(config.run_input_dir, PathBuf::from("/in"));
        assert!(config.delete_dat_files);
    }

    #[test]
    fn missing_run_is_rejected() {
        let options = ReadOptions {
            dir: Some(PathBuf::from("/data")),
            ..ReadOptions::default()
        };
        assert!(build_config(&options).is_err());
    }

    #[test]
    fn skipper_from_flags() {
        let options = ReadOptions {
            skip_events: vec!["1:1:2".parse().unwrap()],
            skip_lumis: vec!["1:3".parse().unwrap()],
            ..ReadOptions::default()
        };
        let skipper = build_skipper(&options);
        assert!(skipper.is_active());
        assert!(skipper.skip_it(1, 1, 2));
        assert!(skipper.skip_it(1, 3, 9));
        assert!(!skipper.skip_it(1, 1, 3));
        assert!(!build_skipper(&ReadOptions::default()).is_active());
    }
}
