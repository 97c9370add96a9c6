//! Produce command implementation.
//!
//! Writes lumi-sections the way a live producer does: the data file is
//! completed and synced first, then its index is published.

use lumistream_core::{
    EndOfRunEntry, EventId, EventRecord, InitHeader, LumiEntry, LumiSection, ProductDescriptor,
    RunLayout, RunNumber, StreamerWriter,
};
use std::path::Path;
use std::thread;
use std::time::Duration;
use tracing::info;

/// What to publish.
#[derive(Debug, Clone)]
pub struct ProducePlan {
    /// Run number.
    pub run: u32,
    /// First lumi-section.
    pub first_lumi: u32,
    /// Number of lumi-sections.
    pub lumis: u32,
    /// Events written into each data file.
    pub events_per_lumi: u64,
    /// Stream name used in file names.
    pub stream: String,
    /// Delay after each lumi-section.
    pub interval: Duration,
    /// Publish the end-of-run marker at the end.
    pub end_of_run: bool,
}

/// Header written into every produced file.
fn header(run: RunNumber) -> InitHeader {
    InitHeader::new("lumistream-produce", run)
        .with_release(env!("CARGO_PKG_VERSION"))
        .with_product(ProductDescriptor::new("triggerResults", "TriggerResults", 1))
        .with_product(ProductDescriptor::new("monitorElements", "MonitorElementCollection", 1))
}

/// Runs the produce command.
pub fn run(dir: &Path, plan: &ProducePlan) -> Result<(), Box<dyn std::error::Error>> {
    if plan.lumis > 0 && plan.first_lumi == 0 {
        return Err("lumi-section numbers start at 1".into());
    }

    let run = RunNumber::new(plan.run);
    let layout = RunLayout::new(dir, run);
    layout.create_run_dir()?;
    let header = header(run);

    let mut next_event = 1u64;
    for lumi in (plan.first_lumi..).take(plan.lumis as usize) {
        let lumi = LumiSection::new(lumi);
        let data_file = layout.data_file_name(lumi, &plan.stream);

        let mut writer = StreamerWriter::create(&layout.file_path(&data_file), &header)?;
        for _ in 0..plan.events_per_lumi {
            let id = EventId::new(plan.run, lumi.as_u32(), next_event);
            writer.write_event(&EventRecord::new(id, next_event.to_le_bytes().to_vec()))?;
            next_event += 1;
        }
        let written = writer.finish()?;

        let entry = LumiEntry::new(run, lumi, data_file).with_events(written, written);
        let index = layout.publish_lumi(&entry, &plan.stream)?;
        info!(lumi = %lumi, events = written, index = %index.display(), "published lumi-section");

        if !plan.interval.is_zero() {
            thread::sleep(plan.interval);
        }
    }

    if plan.end_of_run {
        let eor = EndOfRunEntry::new(next_event - 1, u64::from(plan.lumis));
        let path = layout.publish_end_of_run(&eor)?;
        info!(path = %path.display(), "published end-of-run marker");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumistream_core::{ReaderConfig, SchemaRegistry, StreamerReader};

    fn plan(lumis: u32, events: u64) -> ProducePlan {
        ProducePlan {
            run: 11,
            first_lumi: 1,
            lumis,
            events_per_lumi: events,
            stream: "streamDQM".to_string(),
            interval: Duration::ZERO,
            end_of_run: true,
        }
    }

    #[test]
    fn produced_run_is_readable() {
        let temp = tempfile::tempdir().unwrap();
        run(temp.path(), &plan(3, 4)).unwrap();

        let config = ReaderConfig::new(11, temp.path()).min_events_per_lumi(100);
        let mut reader = StreamerReader::open(config, SchemaRegistry::shared()).unwrap();
        let mut ids = Vec::new();
        let mut sink = |event: &EventRecord| -> lumistream_core::CoreResult<()> {
            ids.push(event.id);
            Ok(())
        };
        while reader.check_next_event(&mut sink).unwrap() {}

        assert_eq!(ids.len(), 12);
        assert_eq!(ids[0], EventId::new(11, 1, 1));
        assert_eq!(ids[11], EventId::new(11, 3, 12));
        assert_eq!(reader.registry().read().len(), 2);
    }

    #[test]
    fn lumi_zero_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let mut plan = plan(1, 1);
        plan.first_lumi = 0;
        assert!(run(temp.path(), &plan).is_err());
    }
}
