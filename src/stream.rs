//! Event-code streams.
//!
//! A code stream is the sparse sequence of nonzero event codes logged during
//! one recording block, in tick order. Pattern offsets count codes, not
//! ticks: offset `+1` is the next logged code however many samples later it
//! arrived.

use serde::{Deserialize, Serialize};

/// One logged event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Sample tick of the event on the recording's tick axis.
    pub tick: i64,
    /// Event code.
    pub code: i64,
    /// Condition code in effect when the event was logged.
    #[serde(default)]
    pub ccode: i64,
    /// Nonzero when the event was flagged (artifact, rejected sweep).
    #[serde(default)]
    pub flags: i64,
}

impl LogEvent {
    pub fn new(tick: i64, code: i64) -> Self {
        Self { tick, code, ccode: 0, flags: 0 }
    }
}

/// Ordered code stream for one block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeStream {
    events: Vec<LogEvent>,
}

impl CodeStream {
    /// Build a stream, sorting events by tick (stable, so equal ticks keep
    /// their logged order).
    pub fn new(mut events: Vec<LogEvent>) -> Self {
        events.sort_by_key(|e| e.tick);
        Self { events }
    }

    /// Build a stream from parallel `codes` / `ticks` slices.
    ///
    /// # Panics
    ///
    /// Panics if `codes` and `ticks` differ in length.
    pub fn from_codes(codes: &[i64], ticks: &[i64]) -> Self {
        assert_eq!(codes.len(), ticks.len(), "codes and ticks differ in length");
        Self::new(
            codes
                .iter()
                .zip(ticks)
                .map(|(&code, &tick)| LogEvent::new(tick, code))
                .collect(),
        )
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Code at stream index `i`, if in range. Negative `i` is out of range.
    #[inline]
    pub fn code_at(&self, i: isize) -> Option<i64> {
        usize::try_from(i).ok().and_then(|i| self.events.get(i)).map(|e| e.code)
    }

    #[inline]
    pub fn get(&self, i: usize) -> Option<&LogEvent> {
        self.events.get(i)
    }

    pub fn events(&self) -> &[LogEvent] {
        &self.events
    }
}

impl From<Vec<LogEvent>> for CodeStream {
    fn from(events: Vec<LogEvent>) -> Self {
        Self::new(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_slices_are_sorted_by_tick() {
        let s = CodeStream::from_codes(&[8, 1], &[10, 0]);
        assert_eq!(s.len(), 2);
        assert_eq!(s.events()[0], LogEvent::new(0, 1));
    }

    #[test]
    #[should_panic(expected = "codes and ticks differ in length")]
    fn mismatched_slices_panic() {
        CodeStream::from_codes(&[1, 8], &[0]);
    }
}
