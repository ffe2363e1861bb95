//! Persistent storage.
//!
//! Named trees:
//!   event_log          — (ingestedAtMillis BE ++ eventId bytes) → bincode(Event)
//!   event_index         — eventId bytes                         → event_log key
//!   idempotency         — idempotency key utf8                  → bincode(IdempotencyRecord)
//!   proj_grant          — GrantId bytes                         → bincode(GrantState)
//!   proj_voucher        — VoucherId bytes                       → bincode(VoucherState)
//!   proj_allocator      — AllocatorId bytes                     → bincode(AllocatorState)
//!   proj_claim          — ClaimId bytes                         → bincode(ClaimState)
//!   proj_claim_fp       — (grantCycleId ++ clinicId ++ fingerprint) → ClaimId bytes
//!   proj_claim_pending  — (clinicId ++ approvedAtMillis BE ++ approvedEventId) → ClaimId bytes
//!   proj_invoice        — InvoiceId bytes                       → bincode(InvoiceState)
//!   proj_payment        — PaymentId bytes                       → bincode(PaymentRecord)
//!   proj_adjustment     — AdjustmentId bytes                    → bincode(AdjustmentState)
//!   meta                — utf8 key bytes                        → raw bytes
//!
//! The event log exposes only `append_event` and read methods for ordinary
//! use. `update_event`/`delete_event` exist only to give that append-only
//! guarantee an explicit, testable reject signal — both always return
//! `EventLogImmutable` and never touch the tree. Projections are ordinary
//! get/put/delete trees; they are rebuilt from the log, not the source of
//! truth, so mutating and removing rows from them is routine.

use std::collections::Bound;
use std::path::Path;

use grant_core::error::GrantError;
use grant_core::event::Event;
use grant_core::ids::{
    AdjustmentId, AllocatorId, ClaimId, ClinicId, EventId, GrantCycleId, GrantId, InvoiceId,
    PaymentId, VoucherId,
};
use grant_core::{
    AdjustmentState, AllocatorState, ClaimState, GrantState, InvoiceState, PaymentRecord,
    VoucherState,
};

use crate::idempotency::IdempotencyRecord;

pub struct GrantDb {
    _db: sled::Db,
    event_log: sled::Tree,
    event_index: sled::Tree,
    idempotency: sled::Tree,
    proj_grant: sled::Tree,
    proj_voucher: sled::Tree,
    proj_allocator: sled::Tree,
    proj_claim: sled::Tree,
    proj_claim_fp: sled::Tree,
    proj_claim_pending: sled::Tree,
    proj_invoice: sled::Tree,
    proj_payment: sled::Tree,
    proj_adjustment: sled::Tree,
    meta: sled::Tree,
}

fn storage_err(e: impl std::fmt::Display) -> GrantError {
    GrantError::Storage(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> GrantError {
    GrantError::Serialization(e.to_string())
}

/// `(ingestedAtMillis, eventId)` as a lexicographically-ordered byte key.
fn event_log_key(ingested_at_millis: i64, event_id: uuid::Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[0..8].copy_from_slice(&ingested_at_millis.to_be_bytes());
    key[8..24].copy_from_slice(event_id.as_bytes());
    key
}

fn clinic_pending_key(clinic_id: ClinicId, approved_at_millis: i64, event_id: uuid::Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + 8 + 16);
    key.extend_from_slice(clinic_id.inner().as_bytes());
    key.extend_from_slice(&approved_at_millis.to_be_bytes());
    key.extend_from_slice(event_id.as_bytes());
    key
}

fn claim_fp_key(grant_cycle_id: GrantCycleId, clinic_id: ClinicId, fingerprint: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + fingerprint.len());
    key.extend_from_slice(grant_cycle_id.inner().as_bytes());
    key.extend_from_slice(clinic_id.inner().as_bytes());
    key.extend_from_slice(fingerprint.as_bytes());
    key
}

impl GrantDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GrantError> {
        let db = sled::open(path).map_err(storage_err)?;
        macro_rules! tree {
            ($name:literal) => {
                db.open_tree($name).map_err(storage_err)?
            };
        }
        Ok(Self {
            event_log: tree!("event_log"),
            event_index: tree!("event_index"),
            idempotency: tree!("idempotency"),
            proj_grant: tree!("proj_grant"),
            proj_voucher: tree!("proj_voucher"),
            proj_allocator: tree!("proj_allocator"),
            proj_claim: tree!("proj_claim"),
            proj_claim_fp: tree!("proj_claim_fp"),
            proj_claim_pending: tree!("proj_claim_pending"),
            proj_invoice: tree!("proj_invoice"),
            proj_payment: tree!("proj_payment"),
            proj_adjustment: tree!("proj_adjustment"),
            meta: tree!("meta"),
            _db: db,
        })
    }

    pub fn flush(&self) -> Result<(), GrantError> {
        self._db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ── Event log ────────────────────────────────────────────────────────────

    /// Append a single event. Rejects a re-used event id outright; the log
    /// never overwrites an existing entry.
    pub fn append_event(&self, event: &Event) -> Result<(), GrantError> {
        let event_id = event.event_id.inner();
        if self.event_index.contains_key(event_id.as_bytes()).unwrap_or(false) {
            return Err(GrantError::NonMonotonicEventId { event_id });
        }
        let key = event_log_key(event.ingested_at.timestamp_millis(), event_id);
        let bytes = bincode::serialize(event).map_err(ser_err)?;
        self.event_log.insert(key, bytes).map_err(storage_err)?;
        self.event_index
            .insert(event_id.as_bytes(), key.to_vec())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_event(&self, event_id: &EventId) -> Result<Option<Event>, GrantError> {
        let key = match self
            .event_index
            .get(event_id.inner().as_bytes())
            .map_err(storage_err)?
        {
            Some(k) => k,
            None => return Ok(None),
        };
        match self.event_log.get(&key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    /// Events strictly after `(after_ingested_at, after_event_id)`, in
    /// `(ingestedAt, eventId)` order, capped at `limit`.
    pub fn fetch_since(
        &self,
        after_ingested_at_millis: i64,
        after_event_id: uuid::Uuid,
        limit: usize,
    ) -> Result<Vec<Event>, GrantError> {
        let start = event_log_key(after_ingested_at_millis, after_event_id);
        let mut out = Vec::new();
        for item in self.event_log.range((Bound::Excluded(start.to_vec()), Bound::Unbounded)) {
            if out.len() >= limit {
                break;
            }
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize::<Event>(&bytes).map_err(ser_err)?);
        }
        Ok(out)
    }

    /// All events for a single aggregate, in append order. Used to rebuild
    /// a projection from scratch; linear scan is acceptable at this scale
    /// since a fold is already an O(n) replay.
    pub fn fetch_aggregate(&self, aggregate_id: uuid::Uuid) -> Result<Vec<Event>, GrantError> {
        let mut out = Vec::new();
        for item in self.event_log.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let event: Event = bincode::deserialize(&bytes).map_err(ser_err)?;
            if event.aggregate_id == aggregate_id {
                out.push(event);
            }
        }
        out.sort_by_key(|e| e.watermark_key());
        Ok(out)
    }

    pub fn event_log_len(&self) -> u64 {
        self.event_log.len() as u64
    }

    /// Always rejects. The event log has no legal update path; this method
    /// exists so the append-only guarantee has an explicit, testable reject
    /// signal instead of relying solely on the absence of a mutating API.
    pub fn update_event(&self, event_id: &EventId) -> Result<(), GrantError> {
        Err(GrantError::EventLogImmutable { attempted: "update", event_id: event_id.inner() })
    }

    /// Always rejects, for the same reason as `update_event`.
    pub fn delete_event(&self, event_id: &EventId) -> Result<(), GrantError> {
        Err(GrantError::EventLogImmutable { attempted: "delete", event_id: event_id.inner() })
    }

    // ── Idempotency ──────────────────────────────────────────────────────────

    pub fn get_idempotency(&self, key: &str) -> Result<Option<IdempotencyRecord>, GrantError> {
        match self.idempotency.get(key.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
            None => Ok(None),
        }
    }

    /// Atomic compare-and-swap write, so two concurrent callers racing to
    /// reserve the same key never both believe they won.
    pub fn cas_idempotency(
        &self,
        key: &str,
        expected: Option<&IdempotencyRecord>,
        new: &IdempotencyRecord,
    ) -> Result<bool, GrantError> {
        let expected_bytes = expected
            .map(|r| bincode::serialize(r).map_err(ser_err))
            .transpose()?;
        let new_bytes = bincode::serialize(new).map_err(ser_err)?;
        match self
            .idempotency
            .compare_and_swap(key.as_bytes(), expected_bytes, Some(new_bytes))
            .map_err(storage_err)?
        {
            Ok(()) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    // ── Grant projection ───────────────────────────────────────────────────────

    pub fn get_grant(&self, id: &GrantId) -> Result<Option<GrantState>, GrantError> {
        get_bincode(&self.proj_grant, id.inner().as_bytes())
    }

    pub fn put_grant(&self, state: &GrantState) -> Result<(), GrantError> {
        put_bincode(&self.proj_grant, state.grant_id.inner().as_bytes(), state)
    }

    // ── Voucher projection ─────────────────────────────────────────────────────

    pub fn get_voucher(&self, id: &VoucherId) -> Result<Option<VoucherState>, GrantError> {
        get_bincode(&self.proj_voucher, id.inner().as_bytes())
    }

    pub fn put_voucher(&self, state: &VoucherState) -> Result<(), GrantError> {
        put_bincode(&self.proj_voucher, state.voucher_id.inner().as_bytes(), state)
    }

    /// Projections are rebuildable, so unlike the event log they allow
    /// delete outright.
    pub fn delete_voucher(&self, id: &VoucherId) -> Result<(), GrantError> {
        self.proj_voucher.remove(id.inner().as_bytes()).map_err(storage_err)?;
        Ok(())
    }

    /// Every voucher currently in `TENTATIVE` status. Used by the sweep
    /// routine; a full scan is acceptable since vouchers awaiting
    /// confirmation are a small fraction of the book at any given moment.
    pub fn tentative_vouchers(&self) -> Result<Vec<VoucherState>, GrantError> {
        let mut out = Vec::new();
        for item in self.proj_voucher.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let state: VoucherState = bincode::deserialize(&bytes).map_err(ser_err)?;
            if matches!(state.status, grant_core::VoucherStatus::Tentative) {
                out.push(state);
            }
        }
        Ok(out)
    }

    // ── Allocator projection ───────────────────────────────────────────────────

    pub fn get_allocator(&self, id: &AllocatorId) -> Result<Option<AllocatorState>, GrantError> {
        get_bincode(&self.proj_allocator, id.inner().as_bytes())
    }

    pub fn put_allocator(&self, state: &AllocatorState) -> Result<(), GrantError> {
        put_bincode(&self.proj_allocator, state.allocator_id.inner().as_bytes(), state)
    }

    // ── Claim projection ───────────────────────────────────────────────────────

    pub fn get_claim(&self, id: &ClaimId) -> Result<Option<ClaimState>, GrantError> {
        get_bincode(&self.proj_claim, id.inner().as_bytes())
    }

    pub fn put_claim(&self, state: &ClaimState) -> Result<(), GrantError> {
        put_bincode(&self.proj_claim, state.claim_id.inner().as_bytes(), state)
    }

    /// Look up an existing claim by its de-duplication fingerprint, scoped
    /// to `(grantCycleId, clinicId)`.
    pub fn find_claim_by_fingerprint(
        &self,
        grant_cycle_id: GrantCycleId,
        clinic_id: ClinicId,
        fingerprint: &str,
    ) -> Result<Option<ClaimId>, GrantError> {
        let key = claim_fp_key(grant_cycle_id, clinic_id, fingerprint);
        match self.proj_claim_fp.get(&key).map_err(storage_err)? {
            Some(bytes) => Ok(Some(ClaimId::new(uuid::Uuid::from_slice(&bytes).map_err(ser_err)?))),
            None => Ok(None),
        }
    }

    pub fn index_claim_fingerprint(
        &self,
        grant_cycle_id: GrantCycleId,
        clinic_id: ClinicId,
        fingerprint: &str,
        claim_id: ClaimId,
    ) -> Result<(), GrantError> {
        let key = claim_fp_key(grant_cycle_id, clinic_id, fingerprint);
        self.proj_claim_fp
            .insert(key, claim_id.inner().as_bytes().to_vec())
            .map_err(storage_err)?;
        Ok(())
    }

    /// Atomically claim a fingerprint slot for `claim_id`. Returns the
    /// winning claim id — `claim_id` itself if this call won the race,
    /// otherwise whichever claim got there first.
    pub fn reserve_claim_fingerprint(
        &self,
        grant_cycle_id: GrantCycleId,
        clinic_id: ClinicId,
        fingerprint: &str,
        claim_id: ClaimId,
    ) -> Result<ClaimId, GrantError> {
        let key = claim_fp_key(grant_cycle_id, clinic_id, fingerprint);
        match self
            .proj_claim_fp
            .compare_and_swap(&key, None as Option<&[u8]>, Some(claim_id.inner().as_bytes().to_vec()))
            .map_err(storage_err)?
        {
            Ok(()) => Ok(claim_id),
            Err(cas_err) => {
                let existing = cas_err
                    .current
                    .expect("fingerprint CAS conflict always carries the current value");
                Ok(ClaimId::new(uuid::Uuid::from_slice(&existing).map_err(ser_err)?))
            }
        }
    }

    /// Mark a just-approved claim as pending invoicing (indexed for the
    /// monthly invoice watermark scan) or clear it once invoiced.
    pub fn mark_claim_pending_invoice(
        &self,
        clinic_id: ClinicId,
        approved_at_millis: i64,
        approved_event_id: uuid::Uuid,
        claim_id: ClaimId,
    ) -> Result<(), GrantError> {
        let key = clinic_pending_key(clinic_id, approved_at_millis, approved_event_id);
        self.proj_claim_pending
            .insert(key, claim_id.inner().as_bytes().to_vec())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn clear_claim_pending_invoice(
        &self,
        clinic_id: ClinicId,
        approved_at_millis: i64,
        approved_event_id: uuid::Uuid,
    ) -> Result<(), GrantError> {
        let key = clinic_pending_key(clinic_id, approved_at_millis, approved_event_id);
        self.proj_claim_pending.remove(key).map_err(storage_err)?;
        Ok(())
    }

    /// Claims pending invoicing for one clinic, `approvedAt` within
    /// `[month_start_millis, month_end_millis)`, at or before the watermark
    /// `(watermark_ingested_at, watermark_event_id)` — ordered by
    /// `(approvedAt, approvedEventId)`, matching the clinic's key ordering.
    pub fn claims_pending_for_clinic(
        &self,
        clinic_id: ClinicId,
        month_start_millis: i64,
        month_end_millis: i64,
        watermark_approved_at_millis: i64,
        watermark_event_id: uuid::Uuid,
    ) -> Result<Vec<ClaimId>, GrantError> {
        let lo = clinic_pending_key(clinic_id, month_start_millis, uuid::Uuid::nil());
        let hi = clinic_pending_key(clinic_id, month_end_millis, uuid::Uuid::nil());
        let watermark_hi =
            clinic_pending_key(clinic_id, watermark_approved_at_millis, watermark_event_id);
        let mut out = Vec::new();
        for item in self.proj_claim_pending.range(lo..hi) {
            let (key, bytes) = item.map_err(storage_err)?;
            if key.as_ref() > watermark_hi.as_slice() {
                break;
            }
            out.push(ClaimId::new(uuid::Uuid::from_slice(&bytes).map_err(ser_err)?));
        }
        Ok(out)
    }

    // ── Invoice projection ─────────────────────────────────────────────────────

    pub fn get_invoice(&self, id: &InvoiceId) -> Result<Option<InvoiceState>, GrantError> {
        get_bincode(&self.proj_invoice, id.inner().as_bytes())
    }

    pub fn put_invoice(&self, state: &InvoiceState) -> Result<(), GrantError> {
        put_bincode(&self.proj_invoice, state.invoice_id.inner().as_bytes(), state)
    }

    // ── Payment projection ─────────────────────────────────────────────────────

    pub fn get_payment(&self, id: &PaymentId) -> Result<Option<PaymentRecord>, GrantError> {
        get_bincode(&self.proj_payment, id.inner().as_bytes())
    }

    pub fn put_payment(&self, record: &PaymentRecord) -> Result<(), GrantError> {
        put_bincode(&self.proj_payment, record.payment_id.inner().as_bytes(), record)
    }

    pub fn payments_for_invoice(&self, invoice_id: InvoiceId) -> Result<Vec<PaymentRecord>, GrantError> {
        let mut out = Vec::new();
        for item in self.proj_payment.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let record: PaymentRecord = bincode::deserialize(&bytes).map_err(ser_err)?;
            if record.invoice_id == invoice_id {
                out.push(record);
            }
        }
        Ok(out)
    }

    // ── Adjustment projection ──────────────────────────────────────────────────

    pub fn get_adjustment(&self, id: &AdjustmentId) -> Result<Option<AdjustmentState>, GrantError> {
        get_bincode(&self.proj_adjustment, id.inner().as_bytes())
    }

    pub fn put_adjustment(&self, state: &AdjustmentState) -> Result<(), GrantError> {
        put_bincode(&self.proj_adjustment, state.adjustment_id.inner().as_bytes(), state)
    }

    /// Unapplied adjustments carried forward for a clinic within
    /// `grant_cycle_id`, including cycle-wide (`clinic_id = None`) ones
    /// from that same cycle. An adjustment never crosses cycles.
    pub fn unapplied_adjustments_for(
        &self,
        grant_cycle_id: GrantCycleId,
        clinic_id: ClinicId,
    ) -> Result<Vec<AdjustmentState>, GrantError> {
        let mut out = Vec::new();
        for item in self.proj_adjustment.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let adj: AdjustmentState = bincode::deserialize(&bytes).map_err(ser_err)?;
            if adj.grant_cycle_id == grant_cycle_id
                && adj.applied_to_invoice_id.is_none()
                && adj.eligible_for_clinic(clinic_id)
            {
                out.push(adj);
            }
        }
        Ok(out)
    }

    // ── Meta / sequence counters ───────────────────────────────────────────────

    pub fn next_sequence(&self, counter_key: &str) -> Result<u64, GrantError> {
        let current = self
            .meta
            .get(counter_key.as_bytes())
            .map_err(storage_err)?
            .map(|b| {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(&b[..8]);
                u64::from_be_bytes(arr)
            })
            .unwrap_or(0);
        self.meta
            .insert(counter_key.as_bytes(), (current + 1).to_be_bytes().to_vec())
            .map_err(storage_err)?;
        Ok(current)
    }
}

fn get_bincode<T: serde::de::DeserializeOwned>(
    tree: &sled::Tree,
    key: &[u8],
) -> Result<Option<T>, GrantError> {
    match tree.get(key).map_err(storage_err)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(ser_err)?)),
        None => Ok(None),
    }
}

fn put_bincode<T: serde::Serialize>(
    tree: &sled::Tree,
    key: &[u8],
    value: &T,
) -> Result<(), GrantError> {
    let bytes = bincode::serialize(value).map_err(ser_err)?;
    tree.insert(key, bytes).map_err(storage_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use grant_core::event::{EventPayload, TraceMeta};
    use grant_core::ids::{GrantCycleId, VoucherId};

    use super::*;

    fn sample_event(event_id: uuid::Uuid, ingested_at: chrono::DateTime<Utc>) -> Event {
        Event {
            event_id: EventId::new(event_id),
            aggregate_id: uuid::Uuid::new_v4(),
            grant_cycle_id: GrantCycleId::new(uuid::Uuid::new_v4()),
            payload: EventPayload::VoucherExpired {
                voucher_id: VoucherId::new(uuid::Uuid::new_v4()),
            },
            occurred_at: ingested_at,
            ingested_at,
            trace: TraceMeta {
                correlation_id: uuid::Uuid::new_v4(),
                causation_id: None,
                actor_id: uuid::Uuid::new_v4(),
                actor_type: "test".into(),
            },
        }
    }

    #[test]
    fn append_and_fetch_since_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let db = GrantDb::open(dir.path()).unwrap();
        let t0 = Utc::now();
        let e1 = sample_event(uuid::Uuid::new_v4(), t0);
        let e2 = sample_event(uuid::Uuid::new_v4(), t0 + chrono::Duration::milliseconds(1));
        db.append_event(&e1).unwrap();
        db.append_event(&e2).unwrap();
        let page = db.fetch_since(0, uuid::Uuid::nil(), 10).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].event_id, e1.event_id);
        assert_eq!(page[1].event_id, e2.event_id);
    }

    #[test]
    fn duplicate_event_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = GrantDb::open(dir.path()).unwrap();
        let id = uuid::Uuid::new_v4();
        let e = sample_event(id, Utc::now());
        db.append_event(&e).unwrap();
        let dup = sample_event(id, Utc::now());
        assert!(db.append_event(&dup).is_err());
    }

    #[test]
    fn event_log_rejects_update_and_delete_while_projections_accept_both() {
        let dir = tempfile::tempdir().unwrap();
        let db = GrantDb::open(dir.path()).unwrap();

        let id = uuid::Uuid::new_v4();
        let e = sample_event(id, Utc::now());
        db.append_event(&e).unwrap();
        assert!(db.update_event(&e.event_id).is_err());
        assert!(db.delete_event(&e.event_id).is_err());
        assert!(db.get_event(&e.event_id).unwrap().is_some(), "rejected update/delete left the event untouched");

        let voucher_id = VoucherId::new(uuid::Uuid::new_v4());
        let voucher = VoucherState {
            voucher_id,
            grant_id: grant_core::ids::GrantId::new(uuid::Uuid::new_v4()),
            bucket: "GENERAL".into(),
            clinic_id: grant_core::ids::ClinicId::new(uuid::Uuid::new_v4()),
            status: grant_core::VoucherStatus::Issued,
            voucher_code: Some("MERCED-20260101-0001".into()),
            max_reimbursement: grant_core::Money::from_cents(15_000),
            is_lirp: false,
            valid_from: Utc::now(),
            expires_at: Utc::now(),
            tentative_expires_at: None,
            claim_id: None,
        };
        db.put_voucher(&voucher).unwrap();
        let mut updated = voucher.clone();
        updated.status = grant_core::VoucherStatus::Voided;
        db.put_voucher(&updated).unwrap();
        assert_eq!(db.get_voucher(&voucher_id).unwrap().unwrap().status, grant_core::VoucherStatus::Voided);
        db.delete_voucher(&voucher_id).unwrap();
        assert!(db.get_voucher(&voucher_id).unwrap().is_none());
    }

    #[test]
    fn sequence_counter_increments() {
        let dir = tempfile::tempdir().unwrap();
        let db = GrantDb::open(dir.path()).unwrap();
        assert_eq!(db.next_sequence("alloc").unwrap(), 0);
        assert_eq!(db.next_sequence("alloc").unwrap(), 1);
    }

    /// Fixed-seed sweep: repeated small-page `fetch_since` calls, each
    /// resuming from the last row's watermark, must cover every appended
    /// event exactly once and in `(ingestedAt, eventId)` order — even when
    /// several events share the same millisecond.
    #[test]
    fn watermark_pagination_covers_every_event_exactly_once() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x77617465726d6b);

        let dir = tempfile::tempdir().unwrap();
        let db = GrantDb::open(dir.path()).unwrap();
        let base = Utc::now();

        let mut appended = Vec::new();
        for _ in 0..200 {
            let jitter_ms: i64 = rng.gen_range(0..20);
            let ingested_at = base + chrono::Duration::milliseconds(jitter_ms);
            let event = sample_event(uuid::Uuid::new_v4(), ingested_at);
            db.append_event(&event).unwrap();
            appended.push(event);
        }
        appended.sort_by_key(|e| e.watermark_key());

        let mut seen = Vec::new();
        let (mut after_millis, mut after_id) = (0i64, uuid::Uuid::nil());
        loop {
            let page = db.fetch_since(after_millis, after_id, 7).unwrap();
            if page.is_empty() {
                break;
            }
            for e in &page {
                after_millis = e.ingested_at.timestamp_millis();
                after_id = e.event_id.inner();
            }
            seen.extend(page);
        }

        assert_eq!(seen.len(), appended.len());
        let seen_ids: Vec<_> = seen.iter().map(|e| e.event_id).collect();
        let expected_ids: Vec<_> = appended.iter().map(|e| e.event_id).collect();
        assert_eq!(seen_ids, expected_ids);
    }
}
