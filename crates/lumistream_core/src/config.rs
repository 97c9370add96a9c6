//! Reader configuration.

use crate::error::{CoreError, CoreResult};
use crate::tracker::DEFAULT_GAP_TIMEOUT;
use crate::types::RunNumber;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a streaming reader.
///
/// `run_number` and `run_input_dir` are required; all other options have
/// defaults. The struct can be deserialized from JSON, where the poll
/// interval is given as `poll_interval_ms`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderConfig {
    /// Run to read.
    pub run_number: u32,

    /// Directory in which the per-run directories appear.
    pub run_input_dir: PathBuf,

    /// Minimum number of events to process per lumi-section before switching
    /// to a newer file. If no newer file exists yet, more events are read.
    #[serde(default = "default_min_events_per_lumi")]
    pub min_events_per_lumi: u64,

    /// Skip the lumi-sections already available at start-up and begin with
    /// the most recent one.
    #[serde(default)]
    pub skip_first_lumis: bool,

    /// Delete data files once they have been opened, to save disk space.
    #[serde(default)]
    pub delete_dat_files: bool,

    /// Stop as soon as the end-of-run marker appears, even if lumi-sections
    /// remain unprocessed.
    #[serde(default)]
    pub end_of_run_kills: bool,

    /// Delay between polls while no data is available.
    #[serde(
        default = "default_poll_interval",
        rename = "poll_interval_ms",
        deserialize_with = "deserialize_millis"
    )]
    pub poll_interval: Duration,

    /// How long a missing lumi-section is waited for once later ones are
    /// published. `None` waits until the end of run. Given in JSON as
    /// `lumi_gap_timeout_ms`, where `null` means no limit.
    #[serde(
        default = "default_lumi_gap_timeout",
        rename = "lumi_gap_timeout_ms",
        deserialize_with = "deserialize_optional_millis"
    )]
    pub lumi_gap_timeout: Option<Duration>,
}

fn default_min_events_per_lumi() -> u64 {
    1
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_lumi_gap_timeout() -> Option<Duration> {
    Some(DEFAULT_GAP_TIMEOUT)
}

fn deserialize_optional_millis<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
}

fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

impl ReaderConfig {
    /// Creates a new configuration with default options.
    #[must_use]
    pub fn new(run_number: u32, run_input_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_number,
            run_input_dir: run_input_dir.into(),
            min_events_per_lumi: default_min_events_per_lumi(),
            skip_first_lumis: false,
            delete_dat_files: false,
            end_of_run_kills: false,
            poll_interval: default_poll_interval(),
            lumi_gap_timeout: default_lumi_gap_timeout(),
        }
    }

    /// Loads a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> CoreResult<Self> {
        let data = std::fs::read(path).map_err(|e| {
            CoreError::configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_slice(&data).map_err(|e| {
            CoreError::configuration(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the run number.
    #[must_use]
    pub const fn run(&self) -> RunNumber {
        RunNumber::new(self.run_number)
    }

    /// Sets the switch-file threshold.
    #[must_use]
    pub const fn min_events_per_lumi(mut self, value: u64) -> Self {
        self.min_events_per_lumi = value;
        self
    }

    /// Sets whether to skip the initial backlog.
    #[must_use]
    pub const fn skip_first_lumis(mut self, value: bool) -> Self {
        self.skip_first_lumis = value;
        self
    }

    /// Sets whether consumed data files are deleted.
    #[must_use]
    pub const fn delete_dat_files(mut self, value: bool) -> Self {
        self.delete_dat_files = value;
        self
    }

    /// Sets whether the end-of-run marker stops processing immediately.
    #[must_use]
    pub const fn end_of_run_kills(mut self, value: bool) -> Self {
        self.end_of_run_kills = value;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets how long a missing lumi-section is waited for.
    #[must_use]
    pub const fn lumi_gap_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lumi_gap_timeout = timeout;
        self
    }

    /// Checks the required options.
    pub fn validate(&self) -> CoreResult<()> {
        if self.run_number == 0 {
            return Err(CoreError::configuration("run number must be positive"));
        }
        if self.run_input_dir.as_os_str().is_empty() {
            return Err(CoreError::configuration("run input directory is empty"));
        }
        Ok(())
    }
}
