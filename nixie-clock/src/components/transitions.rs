//! The table of upcoming UTC offset changes (DST start/end, zone law changes).

use crate::common::MAX_TRANSITIONS;
use serde::{Deserialize, Serialize};

/// A scheduled change of the zone's UTC offset.
///
/// An entry whose `at_utc` is zero is an empty slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub offset_seconds: i32,
    pub at_utc: i64,
}

impl TransitionEntry {
    pub const EMPTY: Self = Self {
        offset_seconds: 0,
        at_utc: 0,
    };

    pub fn new(offset_seconds: i32, at_utc: i64) -> Self {
        Self {
            offset_seconds,
            at_utc,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.at_utc == 0
    }
}

/// A fixed-capacity ascending array of transitions, consumed front to back.
///
/// Occupied slots always precede empty ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionTable {
    slots: [TransitionEntry; MAX_TRANSITIONS],
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if slot `index` holds no transition (or is out of range).
    pub fn is_empty_slot(&self, index: usize) -> bool {
        self.slots.get(index).map_or(true, TransitionEntry::is_empty)
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().take_while(|entry| !entry.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.is_empty_slot(0)
    }

    /// The occupied slots, earliest first.
    pub fn entries(&self) -> &[TransitionEntry] {
        &self.slots[..self.len()]
    }

    /// Consumes every transition due at `now` and returns the offset of the last one.
    ///
    /// Returns `None` when nothing was due.
    pub fn apply_due(&mut self, now: i64) -> Option<i32> {
        let mut new_offset = None;
        while !self.slots[0].is_empty() && self.slots[0].at_utc <= now {
            new_offset = Some(self.slots[0].offset_seconds);
            self.shift_left();
        }
        new_offset
    }

    /// Replaces the whole table with `entries`, in the order given.
    ///
    /// The server sends transitions already sorted ascending; anything past
    /// the table's capacity is dropped. Returns how many entries were kept.
    pub fn load<I>(&mut self, entries: I) -> usize
    where
        I: IntoIterator<Item = TransitionEntry>,
    {
        self.slots = [TransitionEntry::EMPTY; MAX_TRANSITIONS];
        let mut kept = 0;
        for entry in entries.into_iter().filter(|e| !e.is_empty()) {
            if kept == MAX_TRANSITIONS {
                break;
            }
            self.slots[kept] = entry;
            kept += 1;
        }
        kept
    }

    pub fn clear(&mut self) {
        self.slots = [TransitionEntry::EMPTY; MAX_TRANSITIONS];
    }

    fn shift_left(&mut self) {
        self.slots.rotate_left(1);
        self.slots[MAX_TRANSITIONS - 1] = TransitionEntry::EMPTY;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T1: i64 = 1_711_846_800;
    const T2: i64 = 1_729_990_800;

    fn dst_table() -> TransitionTable {
        let mut table = TransitionTable::new();
        table.load([TransitionEntry::new(7200, T1), TransitionEntry::new(3600, T2)]);
        table
    }

    #[test]
    fn nothing_due_before_first_transition() {
        let mut table = dst_table();
        assert_eq!(table.apply_due(T1 - 1), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn consumes_front_entry_when_due() {
        let mut table = dst_table();
        assert_eq!(table.apply_due(T1), Some(7200));
        assert_eq!(table.len(), 1);
        assert_eq!(table.entries(), &[TransitionEntry::new(3600, T2)]);
        assert!(table.is_empty_slot(1));
        assert!(table.is_empty_slot(2));
    }

    #[test]
    fn several_due_entries_yield_the_last_offset() {
        let mut table = dst_table();
        assert_eq!(table.apply_due(T2 + 10), Some(3600));
        assert!(table.is_empty());
        assert_eq!(table.apply_due(T2 + 20), None);
    }

    #[test]
    fn load_truncates_beyond_capacity() {
        let mut table = TransitionTable::new();
        let kept = table.load((1..=5).map(|i| TransitionEntry::new(i * 60, i as i64 * 1000)));
        assert_eq!(kept, MAX_TRANSITIONS);
        assert_eq!(table.entries().last(), Some(&TransitionEntry::new(180, 3000)));
    }

    #[test]
    fn load_replaces_stale_entries() {
        let mut table = dst_table();
        table.load([TransitionEntry::new(0, 42)]);
        assert_eq!(table.len(), 1);
        assert!(table.is_empty_slot(1));
    }

    #[test]
    fn out_of_range_slot_is_empty() {
        assert!(dst_table().is_empty_slot(MAX_TRANSITIONS));
    }
}
