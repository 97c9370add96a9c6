//! Inspect command implementation.

use lumistream_core::StreamerFile;
use serde::Serialize;
use std::path::Path;

/// Streamer file inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// File path.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Process that wrote the file.
    pub process_name: String,
    /// Release of the producer.
    pub release: String,
    /// Run declared in the header.
    pub run: u32,
    /// Schema fingerprint of the first header.
    pub fingerprint: String,
    /// Products declared in the first header.
    pub products: Vec<ProductInfo>,
    /// Number of event records.
    pub event_count: u64,
    /// Number of INIT records with a different schema after the first.
    pub header_changes: u64,
    /// Ids of the listed events.
    pub events: Vec<String>,
}

/// A product declared in the header.
#[derive(Debug, Serialize)]
pub struct ProductInfo {
    /// Product label.
    pub label: String,
    /// Type name.
    pub type_name: String,
    /// Layout version.
    pub version: u16,
}

/// Inspects a streamer file.
pub fn inspect(path: &Path, limit: Option<usize>) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let size = std::fs::metadata(path)?.len();
    let mut session = StreamerFile::open(path)?;
    let header = session.first_record()?.clone();

    let mut result = InspectResult {
        path: path.display().to_string(),
        size,
        process_name: header.process_name.clone(),
        release: header.release.clone(),
        run: header.run,
        fingerprint: header.fingerprint().to_string(),
        products: header
            .products
            .iter()
            .map(|p| ProductInfo {
                label: p.label.clone(),
                type_name: p.type_name.clone(),
                version: p.version,
            })
            .collect(),
        event_count: 0,
        header_changes: 0,
        events: Vec::new(),
    };

    while session.next()? {
        result.header_changes += session.take_new_headers().len() as u64;
        result.event_count += 1;
        let Some(event) = session.current_record() else {
            continue;
        };
        if limit.map_or(true, |limit| result.events.len() < limit) {
            result.events.push(event.id.to_string());
        }
    }
    session.close();

    Ok(result)
}

/// Runs the inspect command.
pub fn run(path: &Path, limit: Option<usize>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No streamer file found at {}", path.display()).into());
    }

    let result = inspect(path, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Streamer file: {}", result.path);
    println!("  Size:        {} bytes", result.size);
    println!("  Process:     {}", result.process_name);
    if !result.release.is_empty() {
        println!("  Release:     {}", result.release);
    }
    println!("  Run:         {}", result.run);
    println!("  Fingerprint: {}", result.fingerprint);
    println!("  Products:");
    for product in &result.products {
        println!(
            "    {:<24} {} v{}",
            product.label, product.type_name, product.version
        );
    }
    println!("  Events:      {}", result.event_count);
    if result.header_changes > 0 {
        println!("  Schema changes: {}", result.header_changes);
    }
    for id in &result.events {
        println!("    {id}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumistream_core::{
        EventId, EventRecord, InitHeader, ProductDescriptor, RunNumber, StreamerWriter,
    };

    #[test]
    fn inspect_lists_header_and_events() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("file.dat");
        let header = InitHeader::new("HLT", RunNumber::new(9))
            .with_product(ProductDescriptor::new("hits", "HitCollection", 1));
        let mut writer = StreamerWriter::create(&path, &header).unwrap();
        for event in 1..=3 {
            writer
                .write_event(&EventRecord::new(EventId::new(9, 1, event), vec![1, 2]))
                .unwrap();
        }
        writer.finish().unwrap();

        let result = inspect(&path, Some(2)).unwrap();
        assert_eq!(result.process_name, "HLT");
        assert_eq!(result.run, 9);
        assert_eq!(result.products.len(), 1);
        assert_eq!(result.event_count, 3);
        assert_eq!(result.events, vec!["9:1:1", "9:1:2"]);
        assert_eq!(result.header_changes, 0);
    }
}
