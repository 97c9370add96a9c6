//! Event selection by id.
//!
//! An [`EventFilter`] decides whether an event is dropped based on its run,
//! lumi-section and event number alone, without looking at the payload.
//! [`EventSkipper`] is the configurable implementation used by the CLI.

use crate::error::{CoreError, CoreResult};
use crate::types::EventId;
use std::str::FromStr;

/// Decides whether an event is excluded from processing.
pub trait EventFilter: Send {
    /// Returns true if the event must be skipped.
    fn skip_it(&self, run: u32, lumi: u32, event: u64) -> bool;
}

impl<F> EventFilter for F
where
    F: Fn(u32, u32, u64) -> bool + Send,
{
    fn skip_it(&self, run: u32, lumi: u32, event: u64) -> bool {
        self(run, lumi, event)
    }
}

/// Inclusive range of events, written `R:L:E` or `R:L:E-R:L:E`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventRange {
    /// First event of the range.
    pub start: EventId,
    /// Last event of the range.
    pub end: EventId,
}

impl EventRange {
    /// Creates a range; the bounds are swapped if given in reverse.
    #[must_use]
    pub fn new(start: EventId, end: EventId) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Returns true if the event lies in the range.
    #[must_use]
    pub fn contains(&self, id: EventId) -> bool {
        self.start <= id && id <= self.end
    }
}

impl FromStr for EventRange {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let (start, end) = split_range(s);
        let start = parse_event_id(start)?;
        let end = end.map(parse_event_id).transpose()?.unwrap_or(start);
        Ok(Self::new(start, end))
    }
}

/// Inclusive range of lumi-sections, written `R:L` or `R:L-R:L`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LumiRange {
    /// First (run, lumi) of the range.
    pub start: (u32, u32),
    /// Last (run, lumi) of the range.
    pub end: (u32, u32),
}

impl LumiRange {
    /// Returns true if the lumi-section lies in the range.
    #[must_use]
    pub fn contains(&self, run: u32, lumi: u32) -> bool {
        self.start <= (run, lumi) && (run, lumi) <= self.end
    }
}

impl FromStr for LumiRange {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        let (start, end) = split_range(s);
        let start = parse_lumi_id(start)?;
        let end = end.map(parse_lumi_id).transpose()?.unwrap_or(start);
        Ok(if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        })
    }
}

fn split_range(s: &str) -> (&str, Option<&str>) {
    match s.split_once('-') {
        Some((start, end)) => (start.trim(), Some(end.trim())),
        None => (s.trim(), None),
    }
}

fn parse_numbers(s: &str, expected: usize, what: &str) -> CoreResult<Vec<u64>> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != expected {
        return Err(CoreError::configuration(format!(
            "invalid {what} '{s}': expected {expected} ':'-separated numbers"
        )));
    }
    parts
        .iter()
        .map(|p| {
            p.parse::<u64>()
                .map_err(|e| CoreError::configuration(format!("invalid {what} '{s}': {e}")))
        })
        .collect()
}

fn to_u32(value: u64, s: &str) -> CoreResult<u32> {
    u32::try_from(value).map_err(|_| CoreError::configuration(format!("value out of range in '{s}'")))
}

fn parse_event_id(s: &str) -> CoreResult<EventId> {
    let n = parse_numbers(s, 3, "event id")?;
    Ok(EventId::new(to_u32(n[0], s)?, to_u32(n[1], s)?, n[2]))
}

fn parse_lumi_id(s: &str) -> CoreResult<(u32, u32)> {
    let n = parse_numbers(s, 2, "lumi id")?;
    Ok((to_u32(n[0], s)?, to_u32(n[1], s)?))
}

/// Skips events by lumi-section and event ranges.
///
/// An event is skipped if any of the following holds:
/// - it lies before `first_event`
/// - its lumi-section is in `lumis_to_skip`
/// - it is in `events_to_skip`
/// - `events_to_process` is not empty and the event is in none of its ranges
#[derive(Debug, Clone, Default)]
pub struct EventSkipper {
    /// Lower bound; earlier events are skipped.
    pub first_event: Option<EventId>,
    /// Lumi-sections to skip.
    pub lumis_to_skip: Vec<LumiRange>,
    /// Events to skip.
    pub events_to_skip: Vec<EventRange>,
    /// If non-empty, only these events are processed.
    pub events_to_process: Vec<EventRange>,
}

impl EventSkipper {
    /// Creates a skipper that skips nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the skipper can reject any event.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.first_event.is_some()
            || !self.lumis_to_skip.is_empty()
            || !self.events_to_skip.is_empty()
            || !self.events_to_process.is_empty()
    }

    /// Sets the lower bound.
    #[must_use]
    pub fn first_event(mut self, id: EventId) -> Self {
        self.first_event = Some(id);
        self
    }

    /// Adds a lumi range to skip.
    #[must_use]
    pub fn skip_lumis(mut self, range: LumiRange) -> Self {
        self.lumis_to_skip.push(range);
        self
    }

    /// Adds an event range to skip.
    #[must_use]
    pub fn skip_events(mut self, range: EventRange) -> Self {
        self.events_to_skip.push(range);
        self
    }

    /// Adds an event range to the allow-list.
    #[must_use]
    pub fn process_events(mut self, range: EventRange) -> Self {
        self.events_to_process.push(range);
        self
    }
}

impl EventFilter for EventSkipper {
    fn skip_it(&self, run: u32, lumi: u32, event: u64) -> bool {
        let id = EventId::new(run, lumi, event);
        if self.first_event.is_some_and(|first| id < first) {
            return true;
        }
        if self.lumis_to_skip.iter().any(|r| r.contains(run, lumi)) {
            return true;
        }
        if self.events_to_skip.iter().any(|r| r.contains(id)) {
            return true;
        }
        !self.events_to_process.is_empty() && !self.events_to_process.iter().any(|r| r.contains(id))
    }
}
