// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Broker-side forwarding filter.

use alarmbus_client::IdMask;

/// Which alarm ids the broker forwards.
///
/// Built once at startup. No configured mask means every id passes; a
/// configured mask that matched nothing forwards nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FilterTable {
    mask: Option<IdMask>,
}

impl FilterTable {
    pub fn allow_all() -> Self {
        Self { mask: None }
    }

    pub fn from_mask(mask: IdMask) -> Self {
        Self { mask: Some(mask) }
    }

    /// Build from an optional id list (`"1001,1010-1012"`).
    pub fn from_config(id_mask: Option<&str>) -> Self {
        match id_mask {
            Some(list) => Self::from_mask(IdMask::parse_list(list)),
            None => Self::allow_all(),
        }
    }

    pub fn allows(&self, id: u16) -> bool {
        match &self.mask {
            Some(mask) => mask.contains(id),
            None => (alarmbus_client::MIN_ALARM_ID..=alarmbus_client::MAX_ALARM_ID).contains(&id),
        }
    }

    pub fn is_filtering(&self) -> bool {
        self.mask.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_mask_allows_every_id() {
        let table = FilterTable::from_config(None);
        assert!(!table.is_filtering());
        assert!((1001..=1128).all(|id| table.allows(id)));
        assert!(!table.allows(1000));
    }

    #[test]
    fn test_configured_mask_passes_listed_ids_only() {
        let table = FilterTable::from_config(Some("1001,1010-1012"));
        let passed: Vec<u16> = (1001..=1128).filter(|id| table.allows(*id)).collect();
        assert_eq!(passed, vec![1001, 1010, 1011, 1012]);
    }

    #[test]
    fn test_all_invalid_mask_denies_everything() {
        let table = FilterTable::from_config(Some("abc, 5000"));
        assert!(table.is_filtering());
        assert!((1001..=1128).all(|id| !table.allows(id)));
    }
}
