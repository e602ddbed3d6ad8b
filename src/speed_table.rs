//! Last-commanded speed per device slot, refreshed round-robin.
//!
//! DCC decoders treat a long silence as a fault, so the command station
//! keeps re-sending each locomotive's current speed. The table remembers
//! the last throttle command per slot and hands out one occupied slot per
//! call of [`SpeedTable::next_refresh`], starting after the slot it handed
//! out last and wrapping at the end.
//!
//! ```rust
//! use rs_dcc::speed_table::{SpeedEntry, SpeedTable};
//! use rs_dcc::traits::Direction;
//!
//! let mut table = SpeedTable::new(4);
//! table.update(2, SpeedEntry::new(3, 10, Direction::Forward)).unwrap();
//! table.update(4, SpeedEntry::new(7, 20, Direction::Reverse)).unwrap();
//!
//! assert_eq!(table.next_refresh().map(|(slot, _)| slot), Some(2));
//! assert_eq!(table.next_refresh().map(|(slot, _)| slot), Some(4));
//! assert_eq!(table.next_refresh().map(|(slot, _)| slot), Some(2));
//! ```

extern crate alloc;

use alloc::vec::Vec;

use crate::error::DccError;
use crate::traits::Direction;

/// Last throttle command sent to one slot. `cab == 0` marks an empty slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SpeedEntry {
    /// Locomotive address, 0 when the slot is unused.
    pub cab: u16,
    /// Caller speed code (0-126). An emergency stop is stored as 0.
    pub speed: u8,
    /// Direction of travel.
    pub direction: Direction,
}

impl SpeedEntry {
    /// Creates an entry.
    pub const fn new(cab: u16, speed: u8, direction: Direction) -> Self {
        Self {
            cab,
            speed,
            direction,
        }
    }

    /// Returns true if the slot holds a locomotive.
    pub const fn is_occupied(&self) -> bool {
        self.cab != 0
    }
}

/// Device slots `1..=len`, with a round-robin refresh cursor.
#[derive(Clone, Debug)]
pub struct SpeedTable {
    slots: Vec<SpeedEntry>,
    cursor: usize,
}

impl SpeedTable {
    /// Creates a table with `num_devices` empty slots.
    pub fn new(num_devices: u16) -> Self {
        let mut slots = Vec::new();
        slots.resize(usize::from(num_devices), SpeedEntry::default());
        Self { slots, cursor: 0 }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the table has no slots at all.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn index(&self, slot: u16) -> Result<usize, DccError> {
        let slot = usize::from(slot);
        if slot == 0 || slot > self.slots.len() {
            return Err(DccError::out_of_range("slot", slot as i32));
        }
        Ok(slot - 1)
    }

    /// Checks that `slot` exists without touching it.
    pub fn check_slot(&self, slot: u16) -> Result<(), DccError> {
        self.index(slot).map(|_| ())
    }

    /// Overwrites a slot.
    pub fn update(&mut self, slot: u16, entry: SpeedEntry) -> Result<(), DccError> {
        let i = self.index(slot)?;
        self.slots[i] = entry;
        Ok(())
    }

    /// The entry in `slot`, if the slot exists.
    pub fn get(&self, slot: u16) -> Option<&SpeedEntry> {
        self.index(slot).ok().map(|i| &self.slots[i])
    }

    /// Iterates `(slot, entry)` over occupied slots.
    pub fn occupied(&self) -> impl Iterator<Item = (u16, &SpeedEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_occupied())
            .map(|(i, e)| (i as u16 + 1, e))
    }

    /// Next occupied slot to refresh, advancing the cursor past it.
    ///
    /// Returns `None` when every slot is empty.
    pub fn next_refresh(&mut self) -> Option<(u16, SpeedEntry)> {
        let n = self.slots.len();
        let start = self.cursor;
        let i = (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&i| self.slots[i].is_occupied())?;

        self.cursor = (i + 1) % n;
        Some((i as u16 + 1, self.slots[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(cab: u16) -> SpeedEntry {
        SpeedEntry::new(cab, 10, Direction::Forward)
    }

    #[test]
    fn empty_table_never_refreshes() {
        let mut table = SpeedTable::new(8);
        assert_eq!(table.next_refresh(), None);
        assert_eq!(table.occupied().count(), 0);
    }

    #[test]
    fn zero_slot_table() {
        let mut table = SpeedTable::new(0);
        assert!(table.is_empty());
        assert_eq!(table.next_refresh(), None);
        assert!(table.update(1, entry(3)).is_err());
    }

    #[test]
    fn slot_bounds() {
        let mut table = SpeedTable::new(3);
        assert!(matches!(
            table.update(0, entry(3)),
            Err(DccError::OutOfRange { what: "slot", value: 0 })
        ));
        assert!(matches!(
            table.update(4, entry(3)),
            Err(DccError::OutOfRange { what: "slot", value: 4 })
        ));
        assert!(table.update(3, entry(3)).is_ok());
        assert_eq!(table.get(3).unwrap().cab, 3);
        assert!(table.get(4).is_none());
    }

    #[test]
    fn round_robin_wraps_and_skips_empty_slots() {
        let mut table = SpeedTable::new(6);
        table.update(1, entry(3)).unwrap();
        table.update(3, entry(7)).unwrap();
        table.update(6, entry(12)).unwrap();

        let cabs: Vec<u16> = (0..7)
            .filter_map(|_| table.next_refresh())
            .map(|(_, e)| e.cab)
            .collect();
        assert_eq!(cabs, vec![3, 7, 12, 3, 7, 12, 3]);
    }

    #[test]
    fn single_occupied_slot_repeats() {
        let mut table = SpeedTable::new(4);
        table.update(2, entry(9)).unwrap();
        for _ in 0..5 {
            assert_eq!(table.next_refresh().map(|(s, _)| s), Some(2));
        }
    }

    #[test]
    fn reassigned_slot_is_overwritten() {
        let mut table = SpeedTable::new(2);
        table.update(1, entry(3)).unwrap();
        table.update(1, SpeedEntry::new(44, 0, Direction::Reverse)).unwrap();
        assert_eq!(table.occupied().count(), 1);
        assert_eq!(table.get(1).unwrap().cab, 44);
    }
}
