//! Subaddress lookahead registry.
//!
//! The scanner recovers the spend key an output was sent to and looks it up
//! here. The window covers accounts `0..=max_used_major + major_gap` and, in
//! each, minors `0..=max_used_minor + minor_gap`; a hit widens the window so
//! later outputs to the next indices are still found.

use std::collections::{BTreeMap, HashMap};

use curve25519_dalek::scalar::Scalar;
use veil_crypto::subaddress::subaddress_spend_keys;

use crate::error::WalletError;
use crate::keys::KeyManager;
use crate::output::SubaddressIndex;

#[derive(Clone)]
pub struct SubaddressRegistry {
    spend_public: [u8; 32],
    view_secret: Scalar,
    major_gap: u32,
    minor_gap: u32,
    max_used_major: u32,
    /// Highest used minor per account.
    max_used_minor: BTreeMap<u32, u32>,
    /// Exclusive minor bound generated so far, per account.
    generated: BTreeMap<u32, u32>,
    table: HashMap<[u8; 32], SubaddressIndex>,
}

impl SubaddressRegistry {
    pub fn new(keys: &KeyManager, major_gap: u32, minor_gap: u32) -> Result<Self, WalletError> {
        let mut registry = Self {
            spend_public: *keys.spend_public(),
            view_secret: *keys.view_secret(),
            major_gap,
            minor_gap,
            max_used_major: 0,
            max_used_minor: BTreeMap::new(),
            generated: BTreeMap::new(),
            table: HashMap::new(),
        };
        registry.extend()?;
        Ok(registry)
    }

    pub fn lookup(&self, spend_key: &[u8; 32]) -> Option<SubaddressIndex> {
        self.table.get(spend_key).copied()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Record an index as used, widening the window when it grows.
    /// Returns whether new keys were generated.
    pub fn mark_used(&mut self, index: SubaddressIndex) -> Result<bool, WalletError> {
        let before = self.table.len();
        self.max_used_major = self.max_used_major.max(index.major);
        let minor = self.max_used_minor.entry(index.major).or_insert(0);
        *minor = (*minor).max(index.minor);
        self.extend()?;
        let grown = self.table.len() > before;
        if grown {
            log::debug!("subaddress window widened to {} keys after {}", self.table.len(), index);
        }
        Ok(grown)
    }

    /// Reset the window to what `used` requires, e.g. after a rollback.
    pub fn rebuild(
        &mut self,
        used: impl IntoIterator<Item = SubaddressIndex>,
    ) -> Result<(), WalletError> {
        self.max_used_major = 0;
        self.max_used_minor.clear();
        self.generated.clear();
        self.table.clear();
        for index in used {
            self.max_used_major = self.max_used_major.max(index.major);
            let minor = self.max_used_minor.entry(index.major).or_insert(0);
            *minor = (*minor).max(index.minor);
        }
        self.extend()
    }

    fn extend(&mut self) -> Result<(), WalletError> {
        let major_end = self.max_used_major.saturating_add(self.major_gap);
        for major in 0..=major_end {
            let used = self.max_used_minor.get(&major).copied().unwrap_or(0);
            let want = used.saturating_add(self.minor_gap).saturating_add(1);
            let have = self.generated.get(&major).copied().unwrap_or(0);
            if want <= have {
                continue;
            }
            let keys = subaddress_spend_keys(
                &self.spend_public,
                &self.view_secret,
                major..major + 1,
                have..want,
            )?;
            for (key, (major, minor)) in keys {
                self.table.insert(key, SubaddressIndex::new(major, minor));
            }
            self.generated.insert(major, want);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_types::Network;

    fn keys() -> KeyManager {
        KeyManager::from_seed([3u8; 32], Network::Testnet)
    }

    fn spend_key(keys: &KeyManager, major: u32, minor: u32) -> [u8; 32] {
        keys.address(major, minor).unwrap().spend_public_key
    }

    #[test]
    fn test_default_window() {
        let k = keys();
        let reg = SubaddressRegistry::new(&k, 1, 50).unwrap();
        assert_eq!(reg.len(), 2 * 51);
        assert_eq!(reg.lookup(k.spend_public()), Some(SubaddressIndex::PRIMARY));
        assert_eq!(reg.lookup(&spend_key(&k, 1, 50)), Some(SubaddressIndex::new(1, 50)));
        assert_eq!(reg.lookup(&spend_key(&k, 0, 51)), None);
        assert_eq!(reg.lookup(&spend_key(&k, 2, 0)), None);
    }

    #[test]
    fn test_window_widens_on_use() {
        let k = keys();
        let mut reg = SubaddressRegistry::new(&k, 1, 3).unwrap();
        assert_eq!(reg.lookup(&spend_key(&k, 0, 5)), None);

        assert!(reg.mark_used(SubaddressIndex::new(0, 3)).unwrap());
        assert_eq!(reg.lookup(&spend_key(&k, 0, 6)), Some(SubaddressIndex::new(0, 6)));
        assert_eq!(reg.lookup(&spend_key(&k, 0, 7)), None);

        assert!(reg.mark_used(SubaddressIndex::new(1, 0)).unwrap());
        assert_eq!(reg.lookup(&spend_key(&k, 2, 3)), Some(SubaddressIndex::new(2, 3)));

        // Inside the window: nothing new.
        assert!(!reg.mark_used(SubaddressIndex::new(0, 1)).unwrap());
    }

    #[test]
    fn test_rebuild_shrinks() {
        let k = keys();
        let mut reg = SubaddressRegistry::new(&k, 1, 2).unwrap();
        reg.mark_used(SubaddressIndex::new(1, 2)).unwrap();
        assert!(reg.lookup(&spend_key(&k, 2, 0)).is_some());

        reg.rebuild(vec![SubaddressIndex::new(0, 1)]).unwrap();
        assert!(reg.lookup(&spend_key(&k, 2, 0)).is_none());
        assert!(reg.lookup(&spend_key(&k, 0, 3)).is_some());
        assert_eq!(reg.len(), 4 + 3);
    }
}
