//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use lumistream_core::{EventId, EventRecord, InitHeader, ProductDescriptor, RunNumber};
use proptest::prelude::*;

/// Strategy for generating event ids of one run.
pub fn event_id_strategy(run: u32) -> impl Strategy<Value = EventId> {
    (1u32..1000, 1u64..1_000_000).prop_map(move |(lumi, event)| EventId::new(run, lumi, event))
}

/// Strategy for generating event records with small payloads.
pub fn event_record_strategy(run: u32) -> impl Strategy<Value = EventRecord> {
    (event_id_strategy(run), prop::collection::vec(any::<u8>(), 0..256))
        .prop_map(|(id, payload)| EventRecord::new(id, payload))
}

/// Strategy for generating product descriptors.
pub fn product_strategy() -> impl Strategy<Value = ProductDescriptor> {
    (
        prop::string::string_regex("[a-z][a-zA-Z0-9]{0,15}").expect("Invalid regex"),
        prop::string::string_regex("[A-Z][a-zA-Z]{0,23}").expect("Invalid regex"),
        1u16..5,
    )
        .prop_map(|(label, type_name, version)| ProductDescriptor::new(label, type_name, version))
}

/// Strategy for generating headers whose product labels are unique.
pub fn header_strategy(run: u32) -> impl Strategy<Value = InitHeader> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z][a-zA-Z0-9]{0,15}").expect("Invalid regex"),
        (
            prop::string::string_regex("[A-Z][a-zA-Z]{0,23}").expect("Invalid regex"),
            1u16..5,
        ),
        1..6,
    )
    .prop_map(move |products| {
        products.into_iter().fold(
            InitHeader::new("generated", RunNumber::new(run)),
            |header, (label, (type_name, version))| {
                header.with_product(ProductDescriptor::new(label, type_name, version))
            },
        )
    })
}

/// Strategy for generating the order in which lumi-sections `1..=count`
/// are published.
pub fn publication_order_strategy(count: u32) -> impl Strategy<Value = Vec<u32>> {
    Just((1..=count).collect::<Vec<u32>>()).prop_shuffle()
}

/// Strategy for splitting a publication order into polling batches.
///
/// Each value is the number of lumi-sections published before the next
/// poll; the total may exceed the available count.
pub fn batch_sizes_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(0usize..4, 1..12)
}
