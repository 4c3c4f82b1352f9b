//! Quota arithmetic
//!
//! Panels report a quota and the traffic used against it. A snapshot carries
//! both plus the remaining figure, and importing a snapshot is treated as a
//! refill: the remaining traffic becomes the new quota and usage starts over.

use crate::record::{ClientRecord, UserRecord};

/// Remaining traffic for an account without a quota, or one whose remaining
/// figure is unknown.
pub const UNLIMITED_REMAINING: i64 = -1;

/// Expiry values above this are milliseconds rather than seconds.
pub const MILLISECOND_EPOCH_THRESHOLD: i64 = 100_000_000_000;

/// `max(quota - used, 0)` when a quota is set, -1 otherwise.
pub fn derive_remaining(quota_bytes: i64, used_bytes: i64) -> i64 {
    if quota_bytes > 0 {
        quota_bytes.saturating_sub(used_bytes).max(0)
    } else {
        UNLIMITED_REMAINING
    }
}

/// Expiry in epoch seconds, converting a millisecond value.
pub fn epoch_seconds(expiry: i64) -> i64 {
    if expiry > MILLISECOND_EPOCH_THRESHOLD {
        expiry / 1000
    } else {
        expiry
    }
}

/// Translates exported quota figures into the quota to write on import.
pub struct QuotaTranslator;

impl QuotaTranslator {
    /// Quota to apply given the exported remaining and quota figures.
    ///
    /// | remaining | result              |
    /// |-----------|---------------------|
    /// | > 0       | remaining           |
    /// | 0         | 0 (unlimited)       |
    /// | < 0       | quota, unchanged    |
    ///
    /// An account with exactly zero bytes left comes back unlimited. This is
    /// how imports have always behaved and callers rely on it.
    pub fn to_canonical(remaining_bytes: i64, quota_bytes: i64) -> i64 {
        match remaining_bytes {
            r if r > 0 => r,
            0 => 0,
            _ => quota_bytes,
        }
    }

    /// Apply the refill rule to an account in place.
    pub fn refill(record: &mut UserRecord) {
        record.quota_bytes = Self::to_canonical(record.remaining_bytes, record.quota_bytes);
        record.used_bytes = 0;
        record.remaining_bytes = derive_remaining(record.quota_bytes, record.used_bytes);
    }

    /// Apply the refill rule to a listener client in place.
    pub fn refill_client(client: &mut ClientRecord) {
        client.quota_bytes = Self::to_canonical(client.remaining_bytes, client.quota_bytes);
        client.used_bytes = 0;
        client.remaining_bytes = derive_remaining(client.quota_bytes, client.used_bytes);
    }
}
