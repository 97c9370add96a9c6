//! Core type definitions for lumistream.

use std::fmt;

/// Number of a data-taking run.
///
/// Run numbers are fixed for the lifetime of a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunNumber(pub u32);

impl RunNumber {
    /// Creates a new run number.
    #[must_use]
    pub const fn new(run: u32) -> Self {
        Self(run)
    }

    /// Returns the raw run value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RunNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run{:06}", self.0)
    }
}

/// Lumi-section number within a run.
///
/// Lumi-sections are published in increasing order starting at 1.
/// Number 0 is reserved for the end-of-run marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LumiSection(pub u32);

impl LumiSection {
    /// Creates a new lumi-section number.
    #[must_use]
    pub const fn new(lumi: u32) -> Self {
        Self(lumi)
    }

    /// Returns the raw lumi-section value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Returns the following lumi-section.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for LumiSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ls{:04}", self.0)
    }
}

/// Event number within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventNumber(pub u64);

impl EventNumber {
    /// Creates a new event number.
    #[must_use]
    pub const fn new(event: u64) -> Self {
        Self(event)
    }

    /// Returns the raw event value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ev{}", self.0)
    }
}

/// Full identity of an event: run, lumi-section and event number.
///
/// Ordering is lexicographic, which matches the order events are taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId {
    /// Run the event belongs to.
    pub run: RunNumber,
    /// Lumi-section the event belongs to.
    pub lumi: LumiSection,
    /// Event number.
    pub event: EventNumber,
}

impl EventId {
    /// Creates a new event id from raw values.
    #[must_use]
    pub const fn new(run: u32, lumi: u32, event: u64) -> Self {
        Self {
            run: RunNumber(run),
            lumi: LumiSection(lumi),
            event: EventNumber(event),
        }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.run.0, self.lumi.0, self.event.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lumi_ordering() {
        let l1 = LumiSection::new(1);
        let l2 = l1.next();
        assert!(l1 < l2);
        assert_eq!(l2.as_u32(), 2);
    }

    #[test]
    fn padded_display() {
        assert_eq!(RunNumber::new(42).to_string(), "run000042");
        assert_eq!(LumiSection::new(7).to_string(), "ls0007");
    }

    #[test]
    fn event_id_order_is_lexicographic() {
        assert!(EventId::new(1, 2, 1) > EventId::new(1, 1, 100));
        assert!(EventId::new(2, 1, 1) > EventId::new(1, 9, 9));
        assert_eq!(EventId::new(3, 4, 5).to_string(), "3:4:5");
    }
}
