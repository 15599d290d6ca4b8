// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! 128-slot alarm id bitmap.

use std::fmt;

use tracing::info;

use crate::error::{AlarmError, Result};
use crate::record::{ALARM_ID_SLOTS, MAX_ALARM_ID, MIN_ALARM_ID};

/// Set of alarm ids, one bit per id in 1001..=1128.
///
/// Used by the broker as its forwarding filter and by subscribers as their
/// local dispatch filter. Ids outside the range are never members.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IdMask(u128);

impl IdMask {
    /// Mask with no ids.
    pub const fn none() -> Self {
        Self(0)
    }

    /// Mask with every id.
    pub const fn all() -> Self {
        Self(u128::MAX)
    }

    /// Build from one flag per id slot, index 0 being id 1001.
    pub fn from_flags(flags: &[bool]) -> Result<Self> {
        if flags.len() != ALARM_ID_SLOTS {
            return Err(AlarmError::InvalidFilter { len: flags.len() });
        }
        let bits = flags
            .iter()
            .enumerate()
            .filter(|(_, enabled)| **enabled)
            .fold(0u128, |acc, (slot, _)| acc | (1u128 << slot));
        Ok(Self(bits))
    }

    /// Build from an explicit id list. Any id outside the range is an error.
    pub fn from_ids(ids: &[u16]) -> Result<Self> {
        let mut mask = Self::none();
        for &id in ids {
            if !mask.insert(id) {
                return Err(AlarmError::InvalidId(id));
            }
        }
        Ok(mask)
    }

    /// Parse a comma-separated list of ids and inclusive `begin-end` ranges.
    ///
    /// Lenient by contract: unparseable items and single ids out of range
    /// are skipped (and logged), ranges are clamped to the id space and
    /// skipped when empty after clamping.
    pub fn parse_list(list: &str) -> Self {
        let mut mask = Self::none();
        for item in list.trim().split(',').map(str::trim) {
            match parse_item(item) {
                Some(ListItem::Id(id)) => {
                    if id < u64::from(MIN_ALARM_ID) || id > u64::from(MAX_ALARM_ID) {
                        info!("invalid alarm id {}, ignored", item);
                        continue;
                    }
                    mask.insert(id as u16);
                }
                Some(ListItem::Range(begin, end)) => {
                    let begin = begin.max(u64::from(MIN_ALARM_ID));
                    let end = end.min(u64::from(MAX_ALARM_ID));
                    if end < begin {
                        info!("invalid alarm id {}, ignored", item);
                        continue;
                    }
                    for id in begin..=end {
                        mask.insert(id as u16);
                    }
                }
                None => info!("invalid alarm id {}, ignored", item),
            }
        }
        mask
    }

    /// Add an id. Returns false when the id is outside the range.
    pub fn insert(&mut self, id: u16) -> bool {
        match slot(id) {
            Some(slot) => {
                self.0 |= 1u128 << slot;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: u16) {
        if let Some(slot) = slot(id) {
            self.0 &= !(1u128 << slot);
        }
    }

    pub fn contains(&self, id: u16) -> bool {
        slot(id).is_some_and(|slot| self.0 & (1u128 << slot) != 0)
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Member ids in ascending order.
    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        (MIN_ALARM_ID..=MAX_ALARM_ID).filter(|id| self.contains(*id))
    }
}

fn slot(id: u16) -> Option<u32> {
    (MIN_ALARM_ID..=MAX_ALARM_ID)
        .contains(&id)
        .then(|| u32::from(id - MIN_ALARM_ID))
}

enum ListItem {
    Id(u64),
    Range(u64, u64),
}

fn parse_item(item: &str) -> Option<ListItem> {
    match item.split_once('-') {
        Some((begin, end)) => Some(ListItem::Range(parse_number(begin)?, parse_number(end)?)),
        None => parse_number(item).map(ListItem::Id),
    }
}

/// Digits only; values too large for u64 saturate so they clamp like any
/// other out-of-range number.
fn parse_number(digits: &str) -> Option<u64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(digits.parse::<u64>().unwrap_or(u64::MAX))
}

impl fmt::Debug for IdMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::all() {
            return write!(f, "IdMask(all)");
        }
        f.debug_set().entries(self.ids()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_membership_bounds() {
        let all = IdMask::all();
        assert!(all.contains(1001));
        assert!(all.contains(1128));
        assert!(!all.contains(1000));
        assert!(!all.contains(1129));
        assert_eq!(all.len(), 128);
        assert!(IdMask::none().is_empty());
    }

    #[test]
    fn test_parse_ids_and_ranges() {
        let mask = IdMask::parse_list("1001,1010-1012");
        for id in MIN_ALARM_ID..=MAX_ALARM_ID {
            let expected = matches!(id, 1001 | 1010 | 1011 | 1012);
            assert_eq!(mask.contains(id), expected, "id {}", id);
        }
        assert_eq!(mask.ids().collect::<Vec<_>>(), vec![1001, 1010, 1011, 1012]);
    }

    #[test]
    fn test_parse_tolerates_whitespace_and_garbage() {
        let mask = IdMask::parse_list("  1002 , abc, 1003-x, , 99, 2000, 1005 ");
        assert_eq!(mask.ids().collect::<Vec<_>>(), vec![1002, 1005]);
    }

    #[test]
    fn test_parse_clamps_ranges() {
        let mask = IdMask::parse_list("900-1002,1127-5000");
        assert_eq!(mask.ids().collect::<Vec<_>>(), vec![1001, 1002, 1127, 1128]);

        let huge = IdMask::parse_list("1120-99999999999999999999999");
        assert_eq!(huge.len(), 9);
    }

    #[test]
    fn test_parse_skips_inverted_ranges() {
        assert!(IdMask::parse_list("1010-1005").is_empty());
        assert!(IdMask::parse_list("1-5").is_empty());
    }

    #[test]
    fn test_from_flags_requires_exact_length() {
        assert!(matches!(
            IdMask::from_flags(&[true; 127]),
            Err(AlarmError::InvalidFilter { len: 127 })
        ));
        assert!(IdMask::from_flags(&[true; 129]).is_err());

        let mut flags = [false; ALARM_ID_SLOTS];
        flags[0] = true;
        flags[127] = true;
        let mask = IdMask::from_flags(&flags).unwrap();
        assert_eq!(mask.ids().collect::<Vec<_>>(), vec![1001, 1128]);
        assert_eq!(IdMask::from_flags(&[true; ALARM_ID_SLOTS]).unwrap(), IdMask::all());
    }

    #[test]
    fn test_from_ids() {
        let mask = IdMask::from_ids(&[1002, 1100, 1002]).unwrap();
        assert_eq!(mask.len(), 2);
        assert!(matches!(IdMask::from_ids(&[1002, 999]), Err(AlarmError::InvalidId(999))));
    }

    #[test]
    fn test_insert_remove() {
        let mut mask = IdMask::none();
        assert!(mask.insert(1050));
        assert!(!mask.insert(42));
        assert!(mask.contains(1050));
        mask.remove(1050);
        assert!(mask.is_empty());
    }
}
