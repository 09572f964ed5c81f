//! Spend ledger
//!
//! Running totals of authorized amounts keyed by (network, asset, bucket).
//! Check and increment happen under the DashMap entry lock for the key, so
//! two concurrent reservations against the same bucket can never both pass
//! a cap that only one of them fits under.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ethers::types::{Address, U256};

/// Bucket used by policies without a rolling window
pub const LIFETIME_BUCKET: i64 = i64::MIN;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub network: String,
    pub asset: Address,
    pub bucket: i64,
}

impl LedgerKey {
    pub fn new(network: &str, asset: Address, bucket: i64) -> Self {
        Self {
            network: network.to_lowercase(),
            asset,
            bucket,
        }
    }
}

#[derive(Debug, Default)]
pub struct SpendLedger {
    totals: DashMap<LedgerKey, U256>,
}

impl SpendLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically add `amount` to `key` if the result stays within `cap`.
    ///
    /// Returns the new total, or the unchanged current total when the
    /// reservation does not fit. Nothing is written on refusal.
    pub fn try_reserve(
        &self,
        key: LedgerKey,
        amount: U256,
        cap: Option<U256>,
    ) -> Result<U256, U256> {
        let within_cap = |total: U256| cap.map_or(true, |cap| total <= cap);

        match self.totals.entry(key) {
            Entry::Occupied(mut entry) => {
                let current = *entry.get();
                match current.checked_add(amount) {
                    Some(projected) if within_cap(projected) => {
                        *entry.get_mut() = projected;
                        Ok(projected)
                    }
                    _ => Err(current),
                }
            }
            Entry::Vacant(entry) => {
                if !within_cap(amount) {
                    return Err(U256::zero());
                }
                entry.insert(amount);
                Ok(amount)
            }
        }
    }

    /// Give back a reservation that never turned into a signed authorization
    pub fn release(&self, key: &LedgerKey, amount: U256) {
        if let Some(mut total) = self.totals.get_mut(key) {
            *total = total.saturating_sub(amount);
        }
    }

    pub fn spent(&self, key: &LedgerKey) -> U256 {
        self.totals.get(key).map(|t| *t).unwrap_or_default()
    }

    /// Drop rolling-window buckets older than `current`
    pub fn prune_before(&self, current: i64) {
        self.totals
            .retain(|key, _| key.bucket == LIFETIME_BUCKET || key.bucket >= current);
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn amt(v: u64) -> U256 {
        U256::from(v)
    }

    fn key(bucket: i64) -> LedgerKey {
        LedgerKey::new("base", Address::from_low_u64_be(1), bucket)
    }

    #[test]
    fn test_reserve_within_cap() {
        let ledger = SpendLedger::new();
        assert_eq!(ledger.try_reserve(key(1), amt(60), Some(amt(100))), Ok(amt(60)));
        assert_eq!(ledger.try_reserve(key(1), amt(40), Some(amt(100))), Ok(amt(100)));
        assert_eq!(ledger.spent(&key(1)), amt(100));
    }

    #[test]
    fn test_refusal_leaves_total_unchanged() {
        let ledger = SpendLedger::new();
        ledger.try_reserve(key(1), amt(60), Some(amt(100))).unwrap();
        assert_eq!(ledger.try_reserve(key(1), amt(60), Some(amt(100))), Err(amt(60)));
        assert_eq!(ledger.spent(&key(1)), amt(60));
    }

    #[test]
    fn test_refusal_on_empty_bucket_writes_nothing() {
        let ledger = SpendLedger::new();
        assert_eq!(ledger.try_reserve(key(1), amt(150), Some(amt(100))), Err(U256::zero()));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_overflow_is_refused() {
        let ledger = SpendLedger::new();
        ledger.try_reserve(key(1), U256::MAX, None).unwrap();
        assert!(ledger.try_reserve(key(1), amt(1), None).is_err());
        assert_eq!(ledger.spent(&key(1)), U256::MAX);
    }

    #[test]
    fn test_release_and_prune() {
        let ledger = SpendLedger::new();
        ledger.try_reserve(key(1), amt(50), None).unwrap();
        ledger.try_reserve(key(2), amt(30), None).unwrap();
        ledger.try_reserve(key(LIFETIME_BUCKET), amt(5), None).unwrap();

        ledger.release(&key(2), amt(30));
        assert_eq!(ledger.spent(&key(2)), U256::zero());

        ledger.prune_before(2);
        assert_eq!(ledger.spent(&key(1)), U256::zero());
        assert_eq!(ledger.spent(&key(LIFETIME_BUCKET)), amt(5));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_concurrent_reservations_never_exceed_cap() {
        let ledger = Arc::new(SpendLedger::new());
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| ledger.try_reserve(key(7), amt(3), Some(amt(1000))).is_ok())
                        .count()
                })
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 333);
        assert_eq!(ledger.spent(&key(7)), amt(999));
    }
}
