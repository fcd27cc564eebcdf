//! Key encoding utilities for `RocksDB`.
//!
//! All primary keys are the raw 16 bytes of the record's UUID/ULID.
//! Index keys concatenate a prefix with the 16-byte id so prefix scans
//! enumerate a record's children in id (and therefore time) order.

use chrono::{DateTime, Utc};

use tally_core::{CompensationId, EntryId, ModelKey, RecordId, ReservationId, SettlementId, UserId};

/// Account key: the user's 16 UUID bytes.
#[must_use]
pub fn user_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Audit entry key: the entry's 16 ULID bytes.
#[must_use]
pub fn entry_key(entry_id: &EntryId) -> Vec<u8> {
    entry_id.to_bytes().to_vec()
}

/// Reservation key: the reservation's 16 ULID bytes.
#[must_use]
pub fn reservation_key(reservation_id: &ReservationId) -> Vec<u8> {
    reservation_id.to_bytes().to_vec()
}

/// Settlement key: the settlement's 16 ULID bytes.
#[must_use]
pub fn settlement_key(settlement_id: &SettlementId) -> Vec<u8> {
    settlement_id.to_bytes().to_vec()
}

/// Compensation key: the request's 16 ULID bytes.
#[must_use]
pub fn compensation_key(compensation_id: &CompensationId) -> Vec<u8> {
    compensation_id.to_bytes().to_vec()
}

/// Usage record key: the record's 16 ULID bytes.
#[must_use]
pub fn record_key(record_id: &RecordId) -> Vec<u8> {
    record_id.to_bytes().to_vec()
}

/// Per-user index key: `user_id (16) || child id (16)`.
///
/// ULIDs are time-ordered, so a prefix scan yields a user's records
/// chronologically.
#[must_use]
pub fn user_child_key(user_id: &UserId, child: [u8; 16]) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&child);
    key
}

/// Prefix for scanning all of one user's index entries.
#[must_use]
pub fn user_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Extract the child id bytes from a `user_id || child` index key.
///
/// # Panics
///
/// Panics if the key is not exactly 32 bytes.
#[must_use]
pub fn extract_child_id(key: &[u8]) -> [u8; 16] {
    assert_eq!(key.len(), 32, "malformed user index key");
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[16..32]);
    bytes
}

/// Expiry index key: `expires_at (i64 BE seconds) || reservation_id (16)`.
///
/// Big-endian encoding keeps the column family sorted by expiry, so the
/// cleanup sweep is a bounded scan from the front.
#[must_use]
pub fn expiry_key(expires_at: DateTime<Utc>, reservation_id: &ReservationId) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&expires_at.timestamp().to_be_bytes());
    key.extend_from_slice(&reservation_id.to_bytes());
    key
}

/// Split an expiry index key into its timestamp and reservation id.
///
/// # Panics
///
/// Panics if the key is not exactly 24 bytes.
#[must_use]
pub fn split_expiry_key(key: &[u8]) -> (i64, ReservationId) {
    assert_eq!(key.len(), 24, "malformed expiry index key");
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&key[..8]);
    let mut id = [0u8; 16];
    id.copy_from_slice(&key[8..24]);
    (i64::from_be_bytes(ts), ReservationId::from_bytes(id))
}

/// Pricing key: `provider \0 model`.
#[must_use]
pub fn pricing_key(key: &ModelKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.provider.len() + 1 + key.model.len());
    out.extend_from_slice(key.provider.as_bytes());
    out.push(0);
    out.extend_from_slice(key.model.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn user_key_length() {
        assert_eq!(user_key(&UserId::generate()).len(), 16);
    }

    #[test]
    fn user_child_key_roundtrip() {
        let user_id = UserId::generate();
        let entry_id = EntryId::generate();
        let key = user_child_key(&user_id, entry_id.to_bytes());

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], user_id.as_bytes());
        assert_eq!(EntryId::from_bytes(extract_child_id(&key)), entry_id);
    }

    #[test]
    fn expiry_keys_sort_by_time() {
        let id = ReservationId::generate();
        let now = Utc::now();
        let earlier = expiry_key(now, &id);
        let later = expiry_key(now + Duration::minutes(5), &id);
        assert!(earlier < later);
    }

    #[test]
    fn expiry_key_roundtrip() {
        let id = ReservationId::generate();
        let now = Utc::now();
        let key = expiry_key(now, &id);
        let (ts, parsed) = split_expiry_key(&key);
        assert_eq!(ts, now.timestamp());
        assert_eq!(parsed, id);
    }

    #[test]
    fn pricing_key_separates_provider_and_model() {
        let a = pricing_key(&ModelKey::new("anthropic", "claude"));
        let b = pricing_key(&ModelKey::new("anthro", "picclaude"));
        assert_ne!(a, b);
    }
}
