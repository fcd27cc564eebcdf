//! `RocksDB` storage implementation.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};

use tally_core::{
    AuditEntry, CompensationId, CompensationStatus, CreditCompensation, EntryId, ModelKey,
    PricingEntry, RecordId, Reservation, ReservationId, Settlement, SettlementId, UsageRecord,
    UsageStats, UserAccount, UserId,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::Store;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Apply a write batch.
    fn write(&self, batch: WriteBatch) -> Result<()> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Fetch-and-decode one row.
    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let handle = self.cf(cf_name)?;
        self.db
            .get_cf(&handle, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Stage the updated account into a batch.
    fn stage_account(&self, batch: &mut WriteBatch, account: &UserAccount) -> Result<()> {
        let handle = self.cf(cf::USERS)?;
        batch.put_cf(&handle, keys::user_key(&account.user_id), Self::serialize(account)?);
        Ok(())
    }

    /// Stage an audit entry and its user index into a batch.
    fn stage_audit(&self, batch: &mut WriteBatch, entry: &AuditEntry) -> Result<()> {
        let log = self.cf(cf::AUDIT_LOG)?;
        let index = self.cf(cf::AUDIT_BY_USER)?;
        batch.put_cf(&log, keys::entry_key(&entry.id), Self::serialize(entry)?);
        batch.put_cf(
            &index,
            keys::user_child_key(&entry.user_id, entry.id.to_bytes()),
            [],
        );
        Ok(())
    }

    /// Stage a reservation row into a batch.
    fn stage_reservation(&self, batch: &mut WriteBatch, reservation: &Reservation) -> Result<()> {
        let handle = self.cf(cf::RESERVATIONS)?;
        batch.put_cf(
            &handle,
            keys::reservation_key(&reservation.id),
            Self::serialize(reservation)?,
        );
        Ok(())
    }

    /// Stage removal of a reservation's expiry index entry.
    fn stage_expiry_removal(
        &self,
        batch: &mut WriteBatch,
        reservation: &Reservation,
    ) -> Result<()> {
        let handle = self.cf(cf::RESERVATIONS_BY_EXPIRY)?;
        batch.delete_cf(&handle, keys::expiry_key(reservation.expires_at, &reservation.id));
        Ok(())
    }

    /// Collect the child ids under a user prefix, newest first.
    fn list_user_child_ids(&self, cf_name: &str, user_id: &UserId) -> Result<Vec<[u8; 16]>> {
        let handle = self.cf(cf_name)?;
        let prefix = keys::user_prefix(user_id);

        let iter = self.db.iterator_cf(
            &handle,
            IteratorMode::From(&prefix, rocksdb::Direction::Forward),
        );

        // ULID child ids are time-ordered, so the forward scan is oldest
        // first; reverse for newest-first listings.
        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            ids.push(keys::extract_child_id(&key));
        }
        ids.reverse();
        Ok(ids)
    }
}

impl Store for RocksStore {
    // =========================================================================
    // Accounts
    // =========================================================================

    fn put_account(&self, account: &UserAccount) -> Result<()> {
        let handle = self.cf(cf::USERS)?;
        self.db
            .put_cf(&handle, keys::user_key(&account.user_id), Self::serialize(account)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn get_account(&self, user_id: &UserId) -> Result<Option<UserAccount>> {
        self.get(cf::USERS, &keys::user_key(user_id))
    }

    // =========================================================================
    // Audit trail
    // =========================================================================

    fn get_audit_entry(&self, entry_id: &EntryId) -> Result<Option<AuditEntry>> {
        self.get(cf::AUDIT_LOG, &keys::entry_key(entry_id))
    }

    fn list_audit_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AuditEntry>> {
        let ids = self.list_user_child_ids(cf::AUDIT_BY_USER, user_id)?;
        let mut entries = Vec::new();
        for bytes in ids.into_iter().skip(offset).take(limit) {
            let entry_id = EntryId::from_bytes(bytes);
            if let Some(entry) = self.get_audit_entry(&entry_id)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    // =========================================================================
    // Reservations
    // =========================================================================

    fn get_reservation(&self, reservation_id: &ReservationId) -> Result<Option<Reservation>> {
        self.get(cf::RESERVATIONS, &keys::reservation_key(reservation_id))
    }

    fn list_expired_reservations(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Reservation>> {
        let handle = self.cf(cf::RESERVATIONS_BY_EXPIRY)?;
        let iter = self.db.iterator_cf(&handle, IteratorMode::Start);

        let mut expired = Vec::new();
        for item in iter {
            if expired.len() >= limit {
                break;
            }
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            let (expires_ts, reservation_id) = keys::split_expiry_key(&key);
            if expires_ts > cutoff.timestamp() {
                break;
            }
            if let Some(reservation) = self.get_reservation(&reservation_id)? {
                // Index rows for closed holds are deleted in the closing
                // batch; re-check anyway so a stale row cannot double-release.
                if reservation.is_active() {
                    expired.push(reservation);
                } else {
                    tracing::warn!(
                        reservation_id = %reservation_id,
                        status = reservation.status.as_str(),
                        "stale expiry index entry for closed reservation"
                    );
                }
            }
        }
        Ok(expired)
    }

    // =========================================================================
    // Settlements
    // =========================================================================

    fn get_settlement(&self, settlement_id: &SettlementId) -> Result<Option<Settlement>> {
        self.get(cf::SETTLEMENTS, &keys::settlement_key(settlement_id))
    }

    // =========================================================================
    // Compensations
    // =========================================================================

    fn put_compensation(&self, compensation: &CreditCompensation) -> Result<()> {
        let comp_cf = self.cf(cf::COMPENSATIONS)?;
        let pending_cf = self.cf(cf::COMPENSATIONS_PENDING)?;
        let key = keys::compensation_key(&compensation.id);

        let mut batch = WriteBatch::default();
        batch.put_cf(&comp_cf, &key, Self::serialize(compensation)?);
        if compensation.status == CompensationStatus::Pending {
            batch.put_cf(&pending_cf, &key, []);
        } else {
            batch.delete_cf(&pending_cf, &key);
        }
        self.write(batch)
    }

    fn get_compensation(
        &self,
        compensation_id: &CompensationId,
    ) -> Result<Option<CreditCompensation>> {
        self.get(cf::COMPENSATIONS, &keys::compensation_key(compensation_id))
    }

    fn list_pending_compensations(&self, limit: usize) -> Result<Vec<CreditCompensation>> {
        let handle = self.cf(cf::COMPENSATIONS_PENDING)?;
        let iter = self.db.iterator_cf(&handle, IteratorMode::Start);

        // ULID keys scan oldest first: pending requests are processed in
        // arrival order.
        let mut pending = Vec::new();
        for item in iter {
            if pending.len() >= limit {
                break;
            }
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if let Some(compensation) = self.get(cf::COMPENSATIONS, &key)? {
                pending.push(compensation);
            }
        }
        Ok(pending)
    }

    // =========================================================================
    // Usage records
    // =========================================================================

    fn put_usage_record(&self, record: &UsageRecord) -> Result<()> {
        let records = self.cf(cf::USAGE_RECORDS)?;
        let index = self.cf(cf::USAGE_BY_USER)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&records, keys::record_key(&record.id), Self::serialize(record)?);
        batch.put_cf(
            &index,
            keys::user_child_key(&record.user_id, record.id.to_bytes()),
            [],
        );
        self.write(batch)
    }

    fn get_usage_record(&self, record_id: &RecordId) -> Result<Option<UsageRecord>> {
        self.get(cf::USAGE_RECORDS, &keys::record_key(record_id))
    }

    fn list_usage_by_user(
        &self,
        user_id: &UserId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UsageRecord>> {
        let ids = self.list_user_child_ids(cf::USAGE_BY_USER, user_id)?;
        let mut records = Vec::new();
        for bytes in ids.into_iter().skip(offset).take(limit) {
            let record_id = RecordId::from_bytes(bytes);
            if let Some(record) = self.get_usage_record(&record_id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn usage_stats(&self, user_id: &UserId) -> Result<UsageStats> {
        let ids = self.list_user_child_ids(cf::USAGE_BY_USER, user_id)?;
        let mut stats = UsageStats::default();
        for bytes in ids {
            let record_id = RecordId::from_bytes(bytes);
            if let Some(record) = self.get_usage_record(&record_id)? {
                stats.accumulate(&record);
            }
        }
        Ok(stats)
    }

    // =========================================================================
    // Pricing
    // =========================================================================

    fn get_pricing_entries(&self, key: &ModelKey) -> Result<Vec<PricingEntry>> {
        Ok(self
            .get(cf::PRICING, &keys::pricing_key(key))?
            .unwrap_or_default())
    }

    fn put_pricing_entries(&self, key: &ModelKey, entries: &[PricingEntry]) -> Result<()> {
        for entry in entries {
            entry.validate().map_err(StoreError::InvalidPricing)?;
        }
        let handle = self.cf(cf::PRICING)?;
        self.db
            .put_cf(&handle, keys::pricing_key(key), Self::serialize(&entries)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    // =========================================================================
    // Compound atomic commits
    // =========================================================================

    fn commit_balance_entry(&self, account: &UserAccount, entry: &AuditEntry) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_account(&mut batch, account)?;
        self.stage_audit(&mut batch, entry)?;
        self.write(batch)
    }

    fn commit_reserve(
        &self,
        account: &UserAccount,
        reservation: &Reservation,
        entry: &AuditEntry,
    ) -> Result<()> {
        let expiry = self.cf(cf::RESERVATIONS_BY_EXPIRY)?;

        let mut batch = WriteBatch::default();
        self.stage_account(&mut batch, account)?;
        self.stage_reservation(&mut batch, reservation)?;
        batch.put_cf(&expiry, keys::expiry_key(reservation.expires_at, &reservation.id), []);
        self.stage_audit(&mut batch, entry)?;
        self.write(batch)
    }

    fn commit_settle(
        &self,
        account: &UserAccount,
        reservation: &Reservation,
        settlement: &Settlement,
        entry: &AuditEntry,
    ) -> Result<()> {
        let settlements = self.cf(cf::SETTLEMENTS)?;

        let mut batch = WriteBatch::default();
        self.stage_account(&mut batch, account)?;
        self.stage_reservation(&mut batch, reservation)?;
        self.stage_expiry_removal(&mut batch, reservation)?;
        batch.put_cf(
            &settlements,
            keys::settlement_key(&settlement.id),
            Self::serialize(settlement)?,
        );
        self.stage_audit(&mut batch, entry)?;
        self.write(batch)
    }

    fn commit_release(
        &self,
        account: &UserAccount,
        reservation: &Reservation,
        entry: &AuditEntry,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_account(&mut batch, account)?;
        self.stage_reservation(&mut batch, reservation)?;
        self.stage_expiry_removal(&mut batch, reservation)?;
        self.stage_audit(&mut batch, entry)?;
        self.write(batch)
    }

    fn commit_usage_charge(
        &self,
        account: &UserAccount,
        record: &UsageRecord,
        entry: &AuditEntry,
    ) -> Result<()> {
        let records = self.cf(cf::USAGE_RECORDS)?;
        let index = self.cf(cf::USAGE_BY_USER)?;

        let mut batch = WriteBatch::default();
        self.stage_account(&mut batch, account)?;
        batch.put_cf(&records, keys::record_key(&record.id), Self::serialize(record)?);
        batch.put_cf(
            &index,
            keys::user_child_key(&record.user_id, record.id.to_bytes()),
            [],
        );
        self.stage_audit(&mut batch, entry)?;
        self.write(batch)
    }

    fn commit_compensation_applied(
        &self,
        account: &UserAccount,
        compensation: &CreditCompensation,
        entry: &AuditEntry,
    ) -> Result<()> {
        let comp_cf = self.cf(cf::COMPENSATIONS)?;
        let pending_cf = self.cf(cf::COMPENSATIONS_PENDING)?;
        let key = keys::compensation_key(&compensation.id);

        let mut batch = WriteBatch::default();
        self.stage_account(&mut batch, account)?;
        batch.put_cf(&comp_cf, &key, Self::serialize(compensation)?);
        batch.delete_cf(&pending_cf, &key);
        self.stage_audit(&mut batch, entry)?;
        self.write(batch)
    }
}
