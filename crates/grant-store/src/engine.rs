//! The transactional kernel: one `GrantEngine::execute` per command.
//!
//! Every handler follows the same shape — validate, reserve idempotency,
//! lock the touched aggregates in canonical order, fold current state from
//! the log, emit events, write projections through, commit. See
//! `locks::LockKind` for the fixed lock order this module never deviates
//! from.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use grant_core::constants::{DEFAULT_TENTATIVE_HOLD_SECS, SWEEP_SYSTEM_ACTOR_ID};
use grant_core::error::GrantError;
use grant_core::event::{is_valid_event_type_name, DecisionBasis, Event, EventPayload, TraceMeta};
use grant_core::ids::{
    AdjustmentId, AllocatorId, ClaimId, ClinicId, EventId, GrantCycleId, GrantId, InvoiceId,
    PaymentId, VoucherId,
};
use grant_core::identity::EventIdSequencer;
use grant_core::{
    AdjustmentState, AllocatorState, ClaimStatus, GrantState, GrantStatus, InvoiceLifecycle,
    InvoiceState, Money, PaymentRecord, VoucherState, VoucherStatus,
};

use crate::commands::{allocator_for, CommandEnvelope, CommandOutcome, CommandPayload};
use crate::db::GrantDb;
use crate::idempotency::{self, ReservationOutcome};
use crate::locks::{LockKind, LockTable};
use crate::reducers;

pub struct GrantEngine {
    db: Arc<GrantDb>,
    sequencer: EventIdSequencer,
    locks: LockTable,
}

impl GrantEngine {
    pub fn new(db: Arc<GrantDb>) -> Self {
        GrantEngine {
            db,
            sequencer: EventIdSequencer::new(),
            locks: LockTable::new(),
        }
    }

    pub fn db(&self) -> &GrantDb {
        &self.db
    }

    // ── Command entry point ─────────────────────────────────────────────────

    /// Execute one command end to end, including idempotency bookkeeping.
    /// `now` is the server's ingestion clock — every event this call
    /// produces is stamped with it as `ingestedAt`.
    pub fn execute(&self, cmd: &CommandEnvelope, now: DateTime<Utc>) -> Result<CommandOutcome, GrantError> {
        let operation = operation_name(&cmd.payload);
        let request_hash = request_hash(&cmd.payload)?;

        let reservation = idempotency::check_and_reserve(&self.db, &cmd.idempotency_key, operation, &request_hash, now)?;
        match reservation {
            ReservationOutcome::InProgress => {
                return Err(GrantError::OperationInProgress {
                    idempotency_key: cmd.idempotency_key.clone(),
                });
            }
            ReservationOutcome::AlreadyCompleted(bytes) => {
                return bincode::deserialize(&bytes).map_err(|e| GrantError::Serialization(e.to_string()));
            }
            ReservationOutcome::Reserved => {}
        }

        let prior = self
            .db
            .get_idempotency(&cmd.idempotency_key)?
            .expect("reservation just written");

        match self.dispatch(&cmd.payload, cmd.trace.clone(), now) {
            Ok(outcome) => {
                let bytes = bincode::serialize(&outcome).map_err(|e| GrantError::Serialization(e.to_string()))?;
                idempotency::mark_completed(&self.db, &cmd.idempotency_key, &prior, bytes)?;
                Ok(outcome)
            }
            Err(err) => {
                idempotency::mark_failed(&self.db, &cmd.idempotency_key, &prior)?;
                warn!(command = operation, error = %err, "command failed");
                Err(err)
            }
        }
    }

    fn dispatch(&self, payload: &CommandPayload, trace: TraceMeta, now: DateTime<Utc>) -> Result<CommandOutcome, GrantError> {
        match payload {
            CommandPayload::CreateGrant { grant_id, grant_cycle_id, buckets } => {
                self.create_grant(*grant_id, *grant_cycle_id, buckets.clone(), trace, now)
            }
            CommandPayload::SignGrantAgreement { grant_id } => {
                self.transition_grant(*grant_id, trace, now, EventPayload::GrantAgreementSigned { grant_id: *grant_id })
            }
            CommandPayload::ActivateGrant { grant_id } => {
                self.transition_grant(*grant_id, trace, now, EventPayload::GrantActivated { grant_id: *grant_id })
            }
            CommandPayload::SuspendGrant { grant_id, reason } => self.transition_grant(
                *grant_id,
                trace,
                now,
                EventPayload::GrantSuspended { grant_id: *grant_id, reason: reason.clone() },
            ),
            CommandPayload::ReinstateGrant { grant_id } => {
                self.transition_grant(*grant_id, trace, now, EventPayload::GrantReinstated { grant_id: *grant_id })
            }
            CommandPayload::CloseGrant { grant_id } => {
                self.transition_grant(*grant_id, trace, now, EventPayload::GrantClosed { grant_id: *grant_id })
            }
            CommandPayload::ReportMatchingFunds { grant_id, bucket, amount } => {
                self.report_matching_funds(*grant_id, bucket.clone(), amount.clone(), trace, now)
            }

            CommandPayload::IssueVoucherOnline {
                voucher_id, grant_id, bucket, clinic_id, county_code, max_reimbursement, is_lirp,
                valid_from, expires_at,
            } => self.issue_voucher_online(
                *voucher_id, *grant_id, bucket.clone(), *clinic_id, county_code.clone(),
                max_reimbursement.clone(), *is_lirp, *valid_from, *expires_at, trace, now,
            ),
            CommandPayload::IssueVoucherTentative {
                voucher_id, grant_id, bucket, clinic_id, max_reimbursement, is_lirp,
                valid_from, expires_at, tentative_hold_secs,
            } => self.issue_voucher_tentative(
                *voucher_id, *grant_id, bucket.clone(), *clinic_id, max_reimbursement.clone(),
                *is_lirp, *valid_from, *expires_at, *tentative_hold_secs, trace, now,
            ),
            CommandPayload::ConfirmTentativeVoucher { voucher_id, county_code } => {
                self.confirm_tentative_voucher(*voucher_id, county_code.clone(), trace, now)
            }
            CommandPayload::RejectTentativeVoucher { voucher_id, reason } => {
                self.do_reject_tentative_voucher(*voucher_id, reason.clone(), trace, now)?;
                Ok(CommandOutcome::VoucherTransitioned { voucher_id: *voucher_id })
            }
            CommandPayload::VoidVoucher { voucher_id, reason } => {
                self.void_voucher(*voucher_id, reason.clone(), trace, now)
            }
            CommandPayload::ExpireVoucher { voucher_id } => self.expire_voucher(*voucher_id, trace, now),

            CommandPayload::SubmitClaim {
                claim_id, voucher_id, procedure_code, date_of_service, rabies_flag, charge_amount,
                co_pay, grant_period_start, grant_period_end, claim_submission_deadline,
            } => self.submit_claim(
                *claim_id, *voucher_id, procedure_code.clone(), *date_of_service, *rabies_flag,
                charge_amount.clone(), co_pay.clone(), *grant_period_start, *grant_period_end,
                *claim_submission_deadline, trace, now,
            ),
            CommandPayload::ApproveClaim { claim_id, decided_by, policy_snapshot_id, reason } => {
                self.decide_claim(*claim_id, ClaimDecision::Approve, *decided_by, *policy_snapshot_id, reason.clone(), trace, now)
            }
            CommandPayload::DenyClaim { claim_id, decided_by, policy_snapshot_id, reason } => {
                self.decide_claim(*claim_id, ClaimDecision::Deny, *decided_by, *policy_snapshot_id, reason.clone(), trace, now)
            }
            CommandPayload::AdjustClaim { claim_id, new_approved_amount, decided_by, policy_snapshot_id, reason } => {
                self.adjust_claim(*claim_id, new_approved_amount.clone(), *decided_by, *policy_snapshot_id, reason.clone(), trace, now)
            }

            CommandPayload::GenerateMonthlyInvoices {
                grant_cycle_id, year, month, watermark_ingested_at, watermark_event_id, clinic_ids,
            } => self.generate_monthly_invoices(
                *grant_cycle_id, *year, *month, *watermark_ingested_at, *watermark_event_id,
                clinic_ids.clone(), trace, now,
            ),
            CommandPayload::SubmitInvoice { invoice_id } => self.submit_invoice(*invoice_id, trace, now),
            CommandPayload::RecordPayment { payment_id, invoice_id, amount, channel, reference } => {
                self.record_payment(*payment_id, *invoice_id, amount.clone(), channel.clone(), reference.clone(), trace, now)
            }
            CommandPayload::CreateAdjustment { adjustment_id, source_invoice_id, clinic_id, amount, reason } => {
                self.create_adjustment(*adjustment_id, *source_invoice_id, *clinic_id, amount.clone(), reason.clone(), trace, now)
            }
        }
    }

    // ── Event plumbing ──────────────────────────────────────────────────────

    fn build_event(
        &self,
        aggregate_id: Uuid,
        grant_cycle_id: GrantCycleId,
        payload: EventPayload,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<Event, GrantError> {
        if !is_valid_event_type_name(payload.event_type()) {
            return Err(GrantError::InvalidEventType { event_type: payload.event_type().to_string() });
        }
        let event_id = EventId::new(self.sequencer.next_at(now.timestamp_millis().max(0) as u64)?);
        Ok(Event {
            event_id,
            aggregate_id,
            grant_cycle_id,
            payload,
            occurred_at: now,
            ingested_at: now,
            trace,
        })
    }

    fn append(&self, event: &Event) -> Result<(), GrantError> {
        self.db.append_event(event)
    }

    fn fold_grant_state(&self, grant_id: GrantId) -> Result<GrantState, GrantError> {
        let events = self.db.fetch_aggregate(grant_id.inner())?;
        reducers::fold_grant(&events)?.ok_or(GrantError::NotFound { aggregate_type: "Grant", aggregate_id: grant_id.inner() })
    }

    fn fold_voucher_state(&self, voucher_id: VoucherId) -> Result<VoucherState, GrantError> {
        let events = self.db.fetch_aggregate(voucher_id.inner())?;
        reducers::fold_voucher(&events)?.ok_or(GrantError::NotFound { aggregate_type: "Voucher", aggregate_id: voucher_id.inner() })
    }

    fn fold_claim_state(&self, claim_id: ClaimId) -> Result<grant_core::ClaimState, GrantError> {
        let events = self.db.fetch_aggregate(claim_id.inner())?;
        reducers::fold_claim(&events)?.ok_or(GrantError::NotFound { aggregate_type: "Claim", aggregate_id: claim_id.inner() })
    }

    fn fold_invoice_state(&self, invoice_id: InvoiceId) -> Result<InvoiceState, GrantError> {
        let events = self.db.fetch_aggregate(invoice_id.inner())?;
        reducers::fold_invoice(&events)?.ok_or(GrantError::NotFound { aggregate_type: "Invoice", aggregate_id: invoice_id.inner() })
    }

    fn fold_adjustment_state(&self, adjustment_id: AdjustmentId) -> Result<AdjustmentState, GrantError> {
        let events = self.db.fetch_aggregate(adjustment_id.inner())?;
        reducers::fold_adjustment(&events)?.ok_or(GrantError::NotFound { aggregate_type: "Adjustment", aggregate_id: adjustment_id.inner() })
    }

    // ── Grant lifecycle ─────────────────────────────────────────────────────

    fn create_grant(
        &self,
        grant_id: GrantId,
        grant_cycle_id: GrantCycleId,
        buckets: Vec<grant_core::event::BucketInit>,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, GrantError> {
        self.locks.with_locks(vec![(LockKind::Grant, grant_id.inner())], || {
            if self.db.get_grant(&grant_id)?.is_some() {
                return Err(GrantError::InvalidField { field: "grant_id", reason: format!("grant {grant_id} already exists") });
            }
            let event = self.build_event(
                grant_id.inner(), grant_cycle_id,
                EventPayload::GrantCreated { grant_id, grant_cycle_id, buckets },
                trace, now,
            )?;
            self.append(&event)?;
            let state = self.fold_grant_state(grant_id)?;
            self.db.put_grant(&state)?;
            info!(grant_id = %grant_id, "grant created");
            Ok(CommandOutcome::GrantCreated { grant_id })
        })
    }

    fn transition_grant(
        &self,
        grant_id: GrantId,
        trace: TraceMeta,
        now: DateTime<Utc>,
        payload: EventPayload,
    ) -> Result<CommandOutcome, GrantError> {
        self.locks.with_locks(vec![(LockKind::Grant, grant_id.inner())], || {
            let current = self.fold_grant_state(grant_id)?;
            let event = self.build_event(grant_id.inner(), current.grant_cycle_id, payload, trace, now)?;
            self.append(&event)?;
            let state = self.fold_grant_state(grant_id)?;
            self.db.put_grant(&state)?;
            info!(grant_id = %grant_id, event_type = event.event_type(), "grant transitioned");
            Ok(CommandOutcome::GrantTransitioned { grant_id })
        })
    }

    fn report_matching_funds(
        &self,
        grant_id: GrantId,
        bucket: String,
        amount: Money,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, GrantError> {
        self.locks.with_locks(vec![(LockKind::Grant, grant_id.inner())], || {
            let current = self.fold_grant_state(grant_id)?;
            if current.bucket(&bucket).is_none() {
                return Err(GrantError::InvalidField { field: "bucket", reason: format!("unknown bucket {bucket} on grant {grant_id}") });
            }
            let event = self.build_event(
                grant_id.inner(), current.grant_cycle_id,
                EventPayload::MatchingFundsReported { grant_id, bucket, amount },
                trace, now,
            )?;
            self.append(&event)?;
            let state = self.fold_grant_state(grant_id)?;
            self.db.put_grant(&state)?;
            Ok(CommandOutcome::GrantTransitioned { grant_id })
        })
    }

    // ── Voucher ──────────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn issue_voucher_online(
        &self,
        voucher_id: VoucherId,
        grant_id: GrantId,
        bucket: String,
        clinic_id: ClinicId,
        county_code: String,
        max_reimbursement: Money,
        is_lirp: bool,
        valid_from: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, GrantError> {
        let grant_cycle_id = self.fold_grant_state(grant_id)?.grant_cycle_id;
        let allocator_id = allocator_for(grant_cycle_id, &county_code);

        self.locks.with_locks(
            vec![(LockKind::Voucher, voucher_id.inner()), (LockKind::Grant, grant_id.inner()), (LockKind::Allocator, allocator_id.inner())],
            || {
                if self.db.get_voucher(&voucher_id)?.is_some() {
                    return Err(GrantError::InvalidField { field: "voucher_id", reason: format!("voucher {voucher_id} already exists") });
                }
                let grant = self.fold_grant_state(grant_id)?;
                ensure_grant_active(&grant)?;
                let bucket_state = grant.bucket(&bucket).ok_or(GrantError::InvalidField {
                    field: "bucket", reason: format!("unknown bucket {bucket} on grant {grant_id}"),
                })?;
                if bucket_state.available < max_reimbursement {
                    return Err(GrantError::InsufficientFunds {
                        grant_id: grant_id.inner(), bucket: bucket.clone(),
                        available: bucket_state.available.clone(), requested: max_reimbursement.clone(),
                    });
                }

                let issued = self.build_event(
                    voucher_id.inner(), grant.grant_cycle_id,
                    EventPayload::VoucherIssued {
                        voucher_id, grant_id, bucket: bucket.clone(), clinic_id,
                        max_reimbursement: max_reimbursement.clone(), is_lirp, valid_from, expires_at,
                    },
                    trace.clone(), now,
                )?;
                self.append(&issued)?;

                let encumbered = self.build_event(
                    grant_id.inner(), grant.grant_cycle_id,
                    EventPayload::GrantFundsEncumbered { grant_id, bucket, amount: max_reimbursement, voucher_id },
                    trace.clone(), now,
                )?;
                self.append(&encumbered)?;

                let voucher_code = self.allocate_voucher_code(allocator_id, grant.grant_cycle_id, voucher_id, &county_code, now, trace)?;

                let voucher_state = self.fold_voucher_state(voucher_id)?;
                self.db.put_voucher(&voucher_state)?;
                let grant_state = self.fold_grant_state(grant_id)?;
                self.db.put_grant(&grant_state)?;

                info!(voucher_id = %voucher_id, grant_id = %grant_id, code = %voucher_code, "voucher issued");
                Ok(CommandOutcome::VoucherIssued { voucher_id, voucher_code: Some(voucher_code) })
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn issue_voucher_tentative(
        &self,
        voucher_id: VoucherId,
        grant_id: GrantId,
        bucket: String,
        clinic_id: ClinicId,
        max_reimbursement: Money,
        is_lirp: bool,
        valid_from: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        tentative_hold_secs: Option<i64>,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, GrantError> {
        self.locks.with_locks(
            vec![(LockKind::Voucher, voucher_id.inner()), (LockKind::Grant, grant_id.inner())],
            || {
                if self.db.get_voucher(&voucher_id)?.is_some() {
                    return Err(GrantError::InvalidField { field: "voucher_id", reason: format!("voucher {voucher_id} already exists") });
                }
                let grant = self.fold_grant_state(grant_id)?;
                ensure_grant_active(&grant)?;
                let bucket_state = grant.bucket(&bucket).ok_or(GrantError::InvalidField {
                    field: "bucket", reason: format!("unknown bucket {bucket} on grant {grant_id}"),
                })?;
                if bucket_state.available < max_reimbursement {
                    return Err(GrantError::InsufficientFunds {
                        grant_id: grant_id.inner(), bucket: bucket.clone(),
                        available: bucket_state.available.clone(), requested: max_reimbursement.clone(),
                    });
                }
                let hold_secs = tentative_hold_secs.unwrap_or(DEFAULT_TENTATIVE_HOLD_SECS);
                let tentative_expires_at = now + chrono::Duration::seconds(hold_secs);

                let issued = self.build_event(
                    voucher_id.inner(), grant.grant_cycle_id,
                    EventPayload::VoucherIssuedTentative {
                        voucher_id, grant_id, bucket: bucket.clone(), clinic_id,
                        max_reimbursement: max_reimbursement.clone(), is_lirp, valid_from, expires_at, tentative_expires_at,
                    },
                    trace.clone(), now,
                )?;
                self.append(&issued)?;

                let encumbered = self.build_event(
                    grant_id.inner(), grant.grant_cycle_id,
                    EventPayload::GrantFundsEncumbered { grant_id, bucket, amount: max_reimbursement, voucher_id },
                    trace, now,
                )?;
                self.append(&encumbered)?;

                let voucher_state = self.fold_voucher_state(voucher_id)?;
                self.db.put_voucher(&voucher_state)?;
                let grant_state = self.fold_grant_state(grant_id)?;
                self.db.put_grant(&grant_state)?;

                info!(voucher_id = %voucher_id, grant_id = %grant_id, "voucher issued tentative");
                Ok(CommandOutcome::VoucherIssued { voucher_id, voucher_code: None })
            },
        )
    }

    fn confirm_tentative_voucher(
        &self,
        voucher_id: VoucherId,
        county_code: String,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, GrantError> {
        let voucher = self.fold_voucher_state(voucher_id)?;
        let grant_cycle_id = self.fold_grant_state(voucher.grant_id)?.grant_cycle_id;
        let allocator_id = allocator_for(grant_cycle_id, &county_code);

        self.locks.with_locks(
            vec![(LockKind::Voucher, voucher_id.inner()), (LockKind::Grant, voucher.grant_id.inner()), (LockKind::Allocator, allocator_id.inner())],
            || {
                let voucher = self.fold_voucher_state(voucher_id)?;
                if voucher.status != VoucherStatus::Tentative {
                    return Err(GrantError::VoucherNotTentative { voucher_id: voucher_id.inner() });
                }
                if let Some(expires) = voucher.tentative_expires_at {
                    if now > expires {
                        return Err(GrantError::VoucherExpired { voucher_id: voucher_id.inner(), expires_at: expires });
                    }
                }
                let grant = self.fold_grant_state(voucher.grant_id)?;
                ensure_grant_active(&grant)?;

                let confirmed = self.build_event(
                    voucher_id.inner(), grant.grant_cycle_id,
                    EventPayload::VoucherIssuedConfirmed { voucher_id },
                    trace.clone(), now,
                )?;
                self.append(&confirmed)?;

                let voucher_code = self.allocate_voucher_code(allocator_id, grant.grant_cycle_id, voucher_id, &county_code, now, trace)?;

                let voucher_state = self.fold_voucher_state(voucher_id)?;
                self.db.put_voucher(&voucher_state)?;

                info!(voucher_id = %voucher_id, code = %voucher_code, "tentative voucher confirmed");
                Ok(CommandOutcome::VoucherIssued { voucher_id, voucher_code: Some(voucher_code) })
            },
        )
    }

    /// Shared by the `RejectTentativeVoucher` command and the background
    /// sweep — both release an unconfirmed reservation the same way.
    fn do_reject_tentative_voucher(
        &self,
        voucher_id: VoucherId,
        reason: String,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<(), GrantError> {
        let grant_id = self.fold_voucher_state(voucher_id)?.grant_id;
        self.locks.with_locks(vec![(LockKind::Voucher, voucher_id.inner()), (LockKind::Grant, grant_id.inner())], || {
            let voucher = self.fold_voucher_state(voucher_id)?;
            if voucher.status != VoucherStatus::Tentative {
                return Err(GrantError::VoucherNotTentative { voucher_id: voucher_id.inner() });
            }
            let grant = self.fold_grant_state(voucher.grant_id)?;

            let rejected = self.build_event(
                voucher_id.inner(), grant.grant_cycle_id,
                EventPayload::VoucherIssuedRejected { voucher_id, reason },
                trace.clone(), now,
            )?;
            self.append(&rejected)?;

            let released = self.build_event(
                voucher.grant_id.inner(), grant.grant_cycle_id,
                EventPayload::GrantFundsReleased {
                    grant_id: voucher.grant_id, bucket: voucher.bucket.clone(), amount: voucher.max_reimbursement.clone(), voucher_id,
                },
                trace, now,
            )?;
            self.append(&released)?;

            let voucher_state = self.fold_voucher_state(voucher_id)?;
            self.db.put_voucher(&voucher_state)?;
            let grant_state = self.fold_grant_state(voucher.grant_id)?;
            self.db.put_grant(&grant_state)?;

            info!(voucher_id = %voucher_id, "tentative voucher rejected, funds released");
            Ok(())
        })
    }

    fn void_voucher(&self, voucher_id: VoucherId, reason: String, trace: TraceMeta, now: DateTime<Utc>) -> Result<CommandOutcome, GrantError> {
        let grant_id = self.fold_voucher_state(voucher_id)?.grant_id;
        self.locks.with_locks(vec![(LockKind::Voucher, voucher_id.inner()), (LockKind::Grant, grant_id.inner())], || {
            let voucher = self.fold_voucher_state(voucher_id)?;
            let grant = self.fold_grant_state(voucher.grant_id)?;

            let voided = self.build_event(
                voucher_id.inner(), grant.grant_cycle_id,
                EventPayload::VoucherVoided { voucher_id, reason },
                trace.clone(), now,
            )?;
            self.append(&voided)?;

            if voucher.status == VoucherStatus::Issued {
                let released = self.build_event(
                    voucher.grant_id.inner(), grant.grant_cycle_id,
                    EventPayload::GrantFundsReleased {
                        grant_id: voucher.grant_id, bucket: voucher.bucket.clone(), amount: voucher.max_reimbursement.clone(), voucher_id,
                    },
                    trace, now,
                )?;
                self.append(&released)?;
                let grant_state = self.fold_grant_state(voucher.grant_id)?;
                self.db.put_grant(&grant_state)?;
            }

            let voucher_state = self.fold_voucher_state(voucher_id)?;
            self.db.put_voucher(&voucher_state)?;

            info!(voucher_id = %voucher_id, "voucher voided");
            Ok(CommandOutcome::VoucherTransitioned { voucher_id })
        })
    }

    fn expire_voucher(&self, voucher_id: VoucherId, trace: TraceMeta, now: DateTime<Utc>) -> Result<CommandOutcome, GrantError> {
        let grant_id = self.fold_voucher_state(voucher_id)?.grant_id;
        self.locks.with_locks(vec![(LockKind::Voucher, voucher_id.inner()), (LockKind::Grant, grant_id.inner())], || {
            let voucher = self.fold_voucher_state(voucher_id)?;
            let grant = self.fold_grant_state(voucher.grant_id)?;

            let expired = self.build_event(
                voucher_id.inner(), grant.grant_cycle_id,
                EventPayload::VoucherExpired { voucher_id },
                trace.clone(), now,
            )?;
            self.append(&expired)?;

            let released = self.build_event(
                voucher.grant_id.inner(), grant.grant_cycle_id,
                EventPayload::GrantFundsReleased {
                    grant_id: voucher.grant_id, bucket: voucher.bucket.clone(), amount: voucher.max_reimbursement.clone(), voucher_id,
                },
                trace, now,
            )?;
            self.append(&released)?;

            let voucher_state = self.fold_voucher_state(voucher_id)?;
            self.db.put_voucher(&voucher_state)?;
            let grant_state = self.fold_grant_state(voucher.grant_id)?;
            self.db.put_grant(&grant_state)?;

            info!(voucher_id = %voucher_id, "voucher expired, funds released");
            Ok(CommandOutcome::VoucherTransitioned { voucher_id })
        })
    }

    /// Allocate the next sequential voucher code for `(allocator_id)` and
    /// append the event to the voucher's own stream (not the allocator's) so
    /// `reducers::fold_voucher` picks up the resulting `voucher_code`
    /// directly. The allocator projection is updated in lock-step here
    /// rather than by a full aggregate refold, since its events live under
    /// the voucher aggregate id.
    fn allocate_voucher_code(
        &self,
        allocator_id: AllocatorId,
        grant_cycle_id: GrantCycleId,
        voucher_id: VoucherId,
        county_code: &str,
        now: DateTime<Utc>,
        trace: TraceMeta,
    ) -> Result<String, GrantError> {
        let existing = self.db.get_allocator(&allocator_id)?;
        let sequence = existing.as_ref().map(|a| a.next_sequence).unwrap_or(1);
        let voucher_code = format!("{}-{}-{:04}", county_code.to_uppercase(), now.format("%Y%m%d"), sequence);

        let event = self.build_event(
            voucher_id.inner(), grant_cycle_id,
            EventPayload::VoucherCodeAllocated { voucher_id, allocator_id, voucher_code: voucher_code.clone(), sequence },
            trace, now,
        )?;
        self.append(&event)?;

        let mut allocator_state = existing.unwrap_or_else(|| AllocatorState {
            allocator_id, grant_cycle_id, county_code: county_code.to_string(), next_sequence: 1, allocated_codes: Vec::new(),
        });
        allocator_state.next_sequence = sequence + 1;
        allocator_state.allocated_codes.push(voucher_code.clone());
        self.db.put_allocator(&allocator_state)?;

        Ok(voucher_code)
    }

    // ── Claim ────────────────────────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn submit_claim(
        &self,
        claim_id: ClaimId,
        voucher_id: VoucherId,
        procedure_code: String,
        date_of_service: DateTime<Utc>,
        rabies_flag: bool,
        charge_amount: Money,
        co_pay: Money,
        grant_period_start: DateTime<Utc>,
        grant_period_end: DateTime<Utc>,
        claim_submission_deadline: DateTime<Utc>,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, GrantError> {
        self.locks.with_locks(vec![(LockKind::Voucher, voucher_id.inner()), (LockKind::Claim, claim_id.inner())], || {
            let voucher = self.fold_voucher_state(voucher_id)?;
            let grant = self.fold_grant_state(voucher.grant_id)?;

            if voucher.status != VoucherStatus::Issued {
                return Err(GrantError::IllegalTransition {
                    aggregate_type: "Voucher", aggregate_id: voucher_id.inner(),
                    from: format!("{:?}", voucher.status), to: "Redeemed".to_string(),
                });
            }
            if voucher.is_lirp && !co_pay.is_zero() {
                return Err(GrantError::LirpCopayForbidden { voucher_id: voucher_id.inner(), co_pay });
            }
            if date_of_service < voucher.valid_from || date_of_service > voucher.expires_at {
                return Err(GrantError::VoucherExpired { voucher_id: voucher_id.inner(), expires_at: voucher.expires_at });
            }
            if date_of_service < grant_period_start || date_of_service > grant_period_end {
                return Err(GrantError::GrantPeriodEnded { grant_id: voucher.grant_id.inner() });
            }
            if now > claim_submission_deadline {
                return Err(GrantError::ClaimDeadlinePassed { grant_cycle_id: grant.grant_cycle_id.inner() });
            }

            let date_key = date_of_service.to_rfc3339();
            let fingerprint = grant_crypto::claim_fingerprint(voucher_id.inner(), voucher.clinic_id.inner(), &procedure_code, &date_key, rabies_flag);
            if let Some(existing) = self.db.find_claim_by_fingerprint(grant.grant_cycle_id, voucher.clinic_id, &fingerprint)? {
                return Ok(CommandOutcome::ClaimDuplicateDetected { existing_claim_id: existing });
            }
            let winner = self.db.reserve_claim_fingerprint(grant.grant_cycle_id, voucher.clinic_id, &fingerprint, claim_id)?;
            if winner != claim_id {
                return Ok(CommandOutcome::ClaimDuplicateDetected { existing_claim_id: winner });
            }

            let submitted = self.build_event(
                claim_id.inner(), grant.grant_cycle_id,
                EventPayload::ClaimSubmitted {
                    claim_id, voucher_id, clinic_id: voucher.clinic_id, grant_cycle_id: grant.grant_cycle_id,
                    procedure_code, date_of_service, rabies_flag, charge_amount, co_pay, claim_fingerprint: fingerprint,
                },
                trace.clone(), now,
            )?;
            self.append(&submitted)?;

            let redeemed = self.build_event(
                voucher_id.inner(), grant.grant_cycle_id,
                EventPayload::VoucherRedeemed { voucher_id, claim_id },
                trace, now,
            )?;
            self.append(&redeemed)?;

            let claim_state = self.fold_claim_state(claim_id)?;
            self.db.put_claim(&claim_state)?;
            let voucher_state = self.fold_voucher_state(voucher_id)?;
            self.db.put_voucher(&voucher_state)?;

            info!(claim_id = %claim_id, voucher_id = %voucher_id, "claim submitted");
            Ok(CommandOutcome::ClaimSubmitted { claim_id })
        })
    }

    fn decide_claim(
        &self,
        claim_id: ClaimId,
        decision: ClaimDecision,
        decided_by: Uuid,
        policy_snapshot_id: Uuid,
        reason: Option<String>,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, GrantError> {
        let voucher_id = self.fold_claim_state(claim_id)?.voucher_id;
        let grant_id = self.fold_voucher_state(voucher_id)?.grant_id;

        self.locks.with_locks(vec![(LockKind::Grant, grant_id.inner()), (LockKind::Claim, claim_id.inner())], || {
            let claim = self.fold_claim_state(claim_id)?;
            let basis = DecisionBasis { policy_snapshot_id, decided_by, decided_at: now, reason: reason.clone() };

            if claim.status.is_terminal_decision() {
                let conflict = self.build_event(
                    claim_id.inner(), claim.grant_cycle_id,
                    EventPayload::ClaimDecisionConflictRecorded {
                        claim_id, attempted_decision: decision.as_str().to_string(), decision_basis: basis,
                    },
                    trace, now,
                )?;
                self.append(&conflict)?;
                warn!(claim_id = %claim_id, attempted = decision.as_str(), "claim decision conflict");
                return Ok(CommandOutcome::ClaimDecisionConflict { claim_id });
            }

            let voucher = self.fold_voucher_state(claim.voucher_id)?;
            let grant = self.fold_grant_state(voucher.grant_id)?;

            match decision {
                ClaimDecision::Approve => {
                    let bucket = grant.bucket(&voucher.bucket).ok_or(GrantError::InvalidField {
                        field: "bucket", reason: format!("unknown bucket {} on grant {}", voucher.bucket, voucher.grant_id),
                    })?;
                    let rated = Money::apply_rate(&claim.charge_amount, bucket.rate_numerator_cents, bucket.rate_denominator_cents);
                    let net = rated.checked_sub(&claim.co_pay).max(Money::zero());
                    let approved_amount = if net > voucher.max_reimbursement { voucher.max_reimbursement.clone() } else { net };
                    if bucket.encumbered < approved_amount {
                        return Err(GrantError::InsufficientFunds {
                            grant_id: voucher.grant_id.inner(), bucket: voucher.bucket.clone(),
                            available: bucket.encumbered.clone(), requested: approved_amount,
                        });
                    }

                    let approved = self.build_event(
                        claim_id.inner(), claim.grant_cycle_id,
                        EventPayload::ClaimApproved { claim_id, approved_amount: approved_amount.clone(), decision_basis: basis },
                        trace.clone(), now,
                    )?;
                    self.append(&approved)?;

                    let liquidated = self.build_event(
                        voucher.grant_id.inner(), claim.grant_cycle_id,
                        EventPayload::GrantFundsLiquidated { grant_id: voucher.grant_id, bucket: voucher.bucket.clone(), amount: approved_amount, claim_id },
                        trace, now,
                    )?;
                    self.append(&liquidated)?;

                    let claim_state = self.fold_claim_state(claim_id)?;
                    self.db.put_claim(&claim_state)?;
                    let grant_state = self.fold_grant_state(voucher.grant_id)?;
                    self.db.put_grant(&grant_state)?;

                    if let (Some(approved_at), Some(approved_event_id)) = (claim_state.approved_at, claim_state.approved_event_id) {
                        self.db.mark_claim_pending_invoice(voucher.clinic_id, approved_at.timestamp_millis(), approved_event_id, claim_id)?;
                    }

                    info!(claim_id = %claim_id, "claim approved");
                    Ok(CommandOutcome::ClaimDecided { claim_id })
                }
                ClaimDecision::Deny => {
                    let denied = self.build_event(
                        claim_id.inner(), claim.grant_cycle_id,
                        EventPayload::ClaimDenied { claim_id, decision_basis: basis },
                        trace, now,
                    )?;
                    self.append(&denied)?;
                    let claim_state = self.fold_claim_state(claim_id)?;
                    self.db.put_claim(&claim_state)?;
                    info!(claim_id = %claim_id, "claim denied");
                    Ok(CommandOutcome::ClaimDecided { claim_id })
                }
            }
        })
    }

    fn adjust_claim(
        &self,
        claim_id: ClaimId,
        new_approved_amount: Money,
        decided_by: Uuid,
        policy_snapshot_id: Uuid,
        reason: Option<String>,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, GrantError> {
        self.locks.with_locks(vec![(LockKind::Claim, claim_id.inner())], || {
            let claim = self.fold_claim_state(claim_id)?;
            if !matches!(claim.status, ClaimStatus::Approved | ClaimStatus::Adjusted) {
                return Err(GrantError::IllegalTransition {
                    aggregate_type: "Claim", aggregate_id: claim_id.inner(),
                    from: format!("{:?}", claim.status), to: "Adjusted".to_string(),
                });
            }
            let basis = DecisionBasis { policy_snapshot_id, decided_by, decided_at: now, reason };
            let event = self.build_event(
                claim_id.inner(), claim.grant_cycle_id,
                EventPayload::ClaimAdjusted { claim_id, new_approved_amount, decision_basis: basis },
                trace, now,
            )?;
            self.append(&event)?;
            let claim_state = self.fold_claim_state(claim_id)?;
            self.db.put_claim(&claim_state)?;
            info!(claim_id = %claim_id, "claim adjusted");
            Ok(CommandOutcome::ClaimDecided { claim_id })
        })
    }

    // ── Invoice / Payment / Adjustment ──────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    fn generate_monthly_invoices(
        &self,
        grant_cycle_id: GrantCycleId,
        year: i32,
        month: u32,
        watermark_ingested_at: DateTime<Utc>,
        watermark_event_id: Uuid,
        clinic_ids: Vec<ClinicId>,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, GrantError> {
        let (month_start, month_end) = month_bounds(year, month)?;
        let mut invoice_ids = Vec::new();

        for clinic_id in clinic_ids {
            let invoice_id = InvoiceId::new(Uuid::new_v4());
            let outcome = self.locks.with_locks(vec![(LockKind::Invoice, invoice_id.inner())], || -> Result<Option<InvoiceId>, GrantError> {
                let candidate_ids = self.db.claims_pending_for_clinic(
                    clinic_id, month_start.timestamp_millis(), month_end.timestamp_millis(),
                    watermark_ingested_at.timestamp_millis(), watermark_event_id,
                )?;
                let mut selected = Vec::new();
                for id in candidate_ids {
                    let claim = self.fold_claim_state(id)?;
                    if claim.grant_cycle_id == grant_cycle_id && claim.status == ClaimStatus::Approved && claim.invoice_id.is_none() {
                        selected.push(claim);
                    }
                }
                if selected.is_empty() {
                    return Ok(None);
                }

                let mut total = Money::zero();
                for claim in &selected {
                    total = total.checked_add(claim.approved_amount.as_ref().unwrap_or(&Money::zero()));
                }
                let adjustments = self.db.unapplied_adjustments_for(grant_cycle_id, clinic_id)?;
                for adj in &adjustments {
                    total = total.checked_add(&adj.amount);
                }

                let claim_ids: Vec<ClaimId> = selected.iter().map(|c| c.claim_id).collect();
                let adjustment_ids: Vec<AdjustmentId> = adjustments.iter().map(|a| a.adjustment_id).collect();

                let generated = self.build_event(
                    invoice_id.inner(), grant_cycle_id,
                    EventPayload::InvoiceGenerated {
                        invoice_id, clinic_id, grant_cycle_id, year, month,
                        claim_ids: claim_ids.clone(), adjustment_ids: adjustment_ids.clone(), total,
                    },
                    trace.clone(), now,
                )?;
                self.append(&generated)?;

                for claim in &selected {
                    let invoiced = self.build_event(
                        claim.claim_id.inner(), grant_cycle_id,
                        EventPayload::ClaimInvoiced { claim_id: claim.claim_id, invoice_id },
                        trace.clone(), now,
                    )?;
                    self.append(&invoiced)?;
                    let claim_state = self.fold_claim_state(claim.claim_id)?;
                    self.db.put_claim(&claim_state)?;
                    if let (Some(approved_at), Some(approved_event_id)) = (claim.approved_at, claim.approved_event_id) {
                        self.db.clear_claim_pending_invoice(clinic_id, approved_at.timestamp_millis(), approved_event_id)?;
                    }
                }

                for adj in &adjustments {
                    let applied = self.build_event(
                        adj.adjustment_id.inner(), grant_cycle_id,
                        EventPayload::InvoiceAdjustmentApplied { adjustment_id: adj.adjustment_id, target_invoice_id: invoice_id },
                        trace.clone(), now,
                    )?;
                    self.append(&applied)?;
                    let adj_state = self.fold_adjustment_state(adj.adjustment_id)?;
                    self.db.put_adjustment(&adj_state)?;
                }

                let invoice_state = self.fold_invoice_state(invoice_id)?;
                self.db.put_invoice(&invoice_state)?;
                info!(invoice_id = %invoice_id, clinic_id = %clinic_id, claims = claim_ids.len(), "invoice generated");
                Ok(Some(invoice_id))
            })?;
            if let Some(id) = outcome {
                invoice_ids.push(id);
            }
        }

        Ok(CommandOutcome::InvoicesGenerated { invoice_ids })
    }

    fn submit_invoice(&self, invoice_id: InvoiceId, trace: TraceMeta, now: DateTime<Utc>) -> Result<CommandOutcome, GrantError> {
        self.locks.with_locks(vec![(LockKind::Invoice, invoice_id.inner())], || {
            let invoice = self.fold_invoice_state(invoice_id)?;
            let event = self.build_event(invoice_id.inner(), invoice.grant_cycle_id, EventPayload::InvoiceSubmitted { invoice_id }, trace, now)?;
            self.append(&event)?;
            let invoice_state = self.fold_invoice_state(invoice_id)?;
            self.db.put_invoice(&invoice_state)?;
            info!(invoice_id = %invoice_id, "invoice submitted");
            Ok(CommandOutcome::InvoiceSubmitted { invoice_id })
        })
    }

    fn record_payment(
        &self,
        payment_id: Uuid,
        invoice_id: InvoiceId,
        amount: Money,
        channel: String,
        reference: String,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, GrantError> {
        self.locks.with_locks(vec![(LockKind::Invoice, invoice_id.inner())], || {
            let invoice = self.fold_invoice_state(invoice_id)?;
            if invoice.lifecycle != InvoiceLifecycle::Submitted {
                return Err(GrantError::InvalidField { field: "invoice_id", reason: format!("invoice {invoice_id} is not submitted") });
            }
            let payment_id = PaymentId::new(payment_id);
            let event = self.build_event(
                payment_id.inner(), invoice.grant_cycle_id,
                EventPayload::PaymentRecorded { payment_id, invoice_id, amount: amount.clone(), channel: channel.clone(), reference: reference.clone() },
                trace, now,
            )?;
            self.append(&event)?;
            self.db.put_payment(&PaymentRecord { payment_id, invoice_id, amount, channel, reference })?;
            info!(payment_id = %payment_id, invoice_id = %invoice_id, "payment recorded");
            Ok(CommandOutcome::PaymentRecorded { payment_id: payment_id.inner() })
        })
    }

    fn create_adjustment(
        &self,
        adjustment_id: AdjustmentId,
        source_invoice_id: InvoiceId,
        clinic_id: Option<ClinicId>,
        amount: Money,
        reason: String,
        trace: TraceMeta,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, GrantError> {
        self.locks.with_locks(vec![(LockKind::Invoice, adjustment_id.inner())], || {
            let source = self.fold_invoice_state(source_invoice_id)?;
            let event = self.build_event(
                adjustment_id.inner(), source.grant_cycle_id,
                EventPayload::InvoiceAdjustmentCreated { adjustment_id, source_invoice_id, clinic_id, amount, reason },
                trace, now,
            )?;
            self.append(&event)?;
            let adj_state = self.fold_adjustment_state(adjustment_id)?;
            self.db.put_adjustment(&adj_state)?;
            info!(adjustment_id = %adjustment_id, source_invoice_id = %source_invoice_id, "adjustment created");
            Ok(CommandOutcome::AdjustmentCreated { adjustment_id })
        })
    }

    // ── Tentative voucher sweep ──────────────────────────────────────────────

    /// Release every tentative voucher whose hold has expired as of `now`.
    /// Every event emitted in one sweep run shares a single correlation id
    /// and is attributed to the fixed sweep system actor.
    pub fn sweep_tentative_vouchers(&self, now: DateTime<Utc>) -> Result<usize, GrantError> {
        let sweep_actor = Uuid::from_str(SWEEP_SYSTEM_ACTOR_ID).expect("constant is a valid UUID");
        let correlation_id = Uuid::new_v4();
        let trace = TraceMeta { correlation_id, causation_id: None, actor_id: sweep_actor, actor_type: "SYSTEM".to_string() };

        let mut swept = 0;
        for voucher in self.db.tentative_vouchers()? {
            let expired = voucher.tentative_expires_at.map(|exp| now > exp).unwrap_or(false);
            if !expired {
                continue;
            }
            self.do_reject_tentative_voucher(voucher.voucher_id, "tentative hold expired".to_string(), trace.clone(), now)?;
            swept += 1;
        }
        if swept > 0 {
            info!(swept, correlation_id = %correlation_id, "tentative voucher sweep completed");
        }
        Ok(swept)
    }
}

#[derive(Clone, Copy, Debug)]
enum ClaimDecision {
    Approve,
    Deny,
}

impl ClaimDecision {
    fn as_str(self) -> &'static str {
        match self {
            ClaimDecision::Approve => "APPROVED",
            ClaimDecision::Deny => "DENIED",
        }
    }
}

fn ensure_grant_active(grant: &GrantState) -> Result<(), GrantError> {
    if grant.status != GrantStatus::Active {
        return Err(GrantError::GrantNotActive { grant_id: grant.grant_id.inner(), status: format!("{:?}", grant.status) });
    }
    Ok(())
}

/// `[start, end)` bounds for a calendar month, in UTC.
fn month_bounds(year: i32, month: u32) -> Result<(DateTime<Utc>, DateTime<Utc>), GrantError> {
    if !(1..=12).contains(&month) {
        return Err(GrantError::InvalidField { field: "month", reason: format!("month {month} out of range") });
    }
    let start = Utc
        .with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .ok_or(GrantError::InvalidField { field: "year", reason: format!("invalid year {year}") })?;
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .ok_or(GrantError::InvalidField { field: "year", reason: format!("invalid year {next_year}") })?;
    Ok((start, end))
}

fn operation_name(payload: &CommandPayload) -> &'static str {
    match payload {
        CommandPayload::CreateGrant { .. } => "CreateGrant",
        CommandPayload::SignGrantAgreement { .. } => "SignGrantAgreement",
        CommandPayload::ActivateGrant { .. } => "ActivateGrant",
        CommandPayload::SuspendGrant { .. } => "SuspendGrant",
        CommandPayload::ReinstateGrant { .. } => "ReinstateGrant",
        CommandPayload::CloseGrant { .. } => "CloseGrant",
        CommandPayload::ReportMatchingFunds { .. } => "ReportMatchingFunds",
        CommandPayload::IssueVoucherOnline { .. } => "IssueVoucherOnline",
        CommandPayload::IssueVoucherTentative { .. } => "IssueVoucherTentative",
        CommandPayload::ConfirmTentativeVoucher { .. } => "ConfirmTentativeVoucher",
        CommandPayload::RejectTentativeVoucher { .. } => "RejectTentativeVoucher",
        CommandPayload::VoidVoucher { .. } => "VoidVoucher",
        CommandPayload::ExpireVoucher { .. } => "ExpireVoucher",
        CommandPayload::SubmitClaim { .. } => "SubmitClaim",
        CommandPayload::ApproveClaim { .. } => "ApproveClaim",
        CommandPayload::DenyClaim { .. } => "DenyClaim",
        CommandPayload::AdjustClaim { .. } => "AdjustClaim",
        CommandPayload::GenerateMonthlyInvoices { .. } => "GenerateMonthlyInvoices",
        CommandPayload::SubmitInvoice { .. } => "SubmitInvoice",
        CommandPayload::RecordPayment { .. } => "RecordPayment",
        CommandPayload::CreateAdjustment { .. } => "CreateAdjustment",
    }
}

fn request_hash(payload: &CommandPayload) -> Result<String, GrantError> {
    let bytes = serde_json::to_vec(payload).map_err(|e| GrantError::Serialization(e.to_string()))?;
    Ok(hex::encode(grant_crypto::sha256_hash(&bytes)))
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use grant_core::constants::BUCKET_GENERAL;
    use grant_core::event::BucketInit;

    use super::*;

    fn trace() -> TraceMeta {
        TraceMeta { correlation_id: Uuid::new_v4(), causation_id: None, actor_id: Uuid::new_v4(), actor_type: "TEST".into() }
    }

    fn envelope(payload: CommandPayload) -> CommandEnvelope {
        CommandEnvelope { command_id: Uuid::new_v4(), idempotency_key: Uuid::new_v4().to_string(), trace: trace(), payload }
    }

    fn engine() -> (tempfile::TempDir, GrantEngine) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(GrantDb::open(dir.path()).unwrap());
        (dir, GrantEngine::new(db))
    }

    fn activated_grant(engine: &GrantEngine, now: DateTime<Utc>) -> (GrantId, GrantCycleId) {
        let grant_id = GrantId::new(Uuid::new_v4());
        let grant_cycle_id = GrantCycleId::new(Uuid::new_v4());
        engine
            .execute(&envelope(CommandPayload::CreateGrant {
                grant_id, grant_cycle_id,
                buckets: vec![BucketInit { bucket: BUCKET_GENERAL.to_string(), awarded: Money::from_cents(1_000_000), rate_numerator_cents: 1, rate_denominator_cents: 1 }],
            }), now)
            .unwrap();
        engine.execute(&envelope(CommandPayload::SignGrantAgreement { grant_id }), now).unwrap();
        engine.execute(&envelope(CommandPayload::ActivateGrant { grant_id }), now).unwrap();
        (grant_id, grant_cycle_id)
    }

    #[test]
    fn issue_then_redeem_voucher_liquidates_funds() {
        let (_dir, engine) = engine();
        let now = Utc::now();
        let (grant_id, _cycle) = activated_grant(&engine, now);

        let voucher_id = VoucherId::new(Uuid::new_v4());
        let clinic_id = ClinicId::new(Uuid::new_v4());
        let outcome = engine
            .execute(&envelope(CommandPayload::IssueVoucherOnline {
                voucher_id, grant_id, bucket: BUCKET_GENERAL.to_string(), clinic_id,
                county_code: "ALAMEDA".to_string(), max_reimbursement: Money::from_cents(15_000), is_lirp: false,
                valid_from: now, expires_at: now + Duration::days(30),
            }), now)
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::VoucherIssued { voucher_code: Some(_), .. }));

        let claim_id = ClaimId::new(Uuid::new_v4());
        engine
            .execute(&envelope(CommandPayload::SubmitClaim {
                claim_id, voucher_id, procedure_code: "SN-DOG".to_string(), date_of_service: now, rabies_flag: false,
                charge_amount: Money::from_cents(15_000), co_pay: Money::zero(),
                grant_period_start: now - Duration::days(1), grant_period_end: now + Duration::days(60),
                claim_submission_deadline: now + Duration::days(90),
            }), now)
            .unwrap();

        engine
            .execute(&envelope(CommandPayload::ApproveClaim { claim_id, decided_by: Uuid::new_v4(), policy_snapshot_id: Uuid::new_v4(), reason: None }), now)
            .unwrap();

        let grant = engine.fold_grant_state(grant_id).unwrap();
        let bucket = grant.bucket(BUCKET_GENERAL).unwrap();
        assert_eq!(bucket.liquidated, Money::from_cents(15_000));
        assert_eq!(bucket.encumbered, Money::zero());
        assert!(bucket.balances());
    }

    #[test]
    fn duplicate_claim_fingerprint_returns_original_claim_id() {
        let (_dir, engine) = engine();
        let now = Utc::now();
        let (grant_id, _cycle) = activated_grant(&engine, now);
        let clinic_id = ClinicId::new(Uuid::new_v4());

        let first_voucher = VoucherId::new(Uuid::new_v4());
        engine
            .execute(&envelope(CommandPayload::IssueVoucherOnline {
                voucher_id: first_voucher, grant_id, bucket: BUCKET_GENERAL.to_string(), clinic_id,
                county_code: "FRESNO".to_string(), max_reimbursement: Money::from_cents(15_000), is_lirp: false,
                valid_from: now, expires_at: now + Duration::days(30),
            }), now)
            .unwrap();
        let claim_id = ClaimId::new(Uuid::new_v4());
        engine
            .execute(&envelope(CommandPayload::SubmitClaim {
                claim_id, voucher_id: first_voucher, procedure_code: "SN-DOG".to_string(), date_of_service: now, rabies_flag: false,
                charge_amount: Money::from_cents(15_000), co_pay: Money::zero(),
                grant_period_start: now - Duration::days(1), grant_period_end: now + Duration::days(60),
                claim_submission_deadline: now + Duration::days(90),
            }), now)
            .unwrap();

        // A second voucher, same clinic/procedure/date/rabies-flag, produces
        // the identical fingerprint — the dedupe path must fire even though
        // the claim and voucher ids differ.
        let second_voucher = VoucherId::new(Uuid::new_v4());
        engine
            .execute(&envelope(CommandPayload::IssueVoucherOnline {
                voucher_id: second_voucher, grant_id, bucket: BUCKET_GENERAL.to_string(), clinic_id,
                county_code: "FRESNO".to_string(), max_reimbursement: Money::from_cents(15_000), is_lirp: false,
                valid_from: now, expires_at: now + Duration::days(30),
            }), now)
            .unwrap();
        let second_claim_id = ClaimId::new(Uuid::new_v4());
        let outcome = engine
            .execute(&envelope(CommandPayload::SubmitClaim {
                claim_id: second_claim_id, voucher_id: first_voucher, procedure_code: "SN-DOG".to_string(), date_of_service: now,
                rabies_flag: false, charge_amount: Money::from_cents(15_000), co_pay: Money::zero(),
                grant_period_start: now - Duration::days(1), grant_period_end: now + Duration::days(60),
                claim_submission_deadline: now + Duration::days(90),
            }), now)
            .unwrap();
        assert!(matches!(outcome, CommandOutcome::ClaimDuplicateDetected { existing_claim_id } if existing_claim_id == claim_id));
    }

    #[test]
    fn repeated_idempotency_key_replays_cached_result() {
        let (_dir, engine) = engine();
        let now = Utc::now();
        let grant_id = GrantId::new(Uuid::new_v4());
        let grant_cycle_id = GrantCycleId::new(Uuid::new_v4());
        let cmd = envelope(CommandPayload::CreateGrant {
            grant_id, grant_cycle_id,
            buckets: vec![BucketInit { bucket: BUCKET_GENERAL.to_string(), awarded: Money::from_cents(1_000_000), rate_numerator_cents: 1, rate_denominator_cents: 1 }],
        });
        let first = engine.execute(&cmd, now).unwrap();
        let second = engine.execute(&cmd, now).unwrap();
        assert!(matches!((first, second), (CommandOutcome::GrantCreated { grant_id: a }, CommandOutcome::GrantCreated { grant_id: b }) if a == b));
    }

    #[test]
    fn sweep_releases_expired_tentative_vouchers() {
        let (_dir, engine) = engine();
        let now = Utc::now();
        let (grant_id, _cycle) = activated_grant(&engine, now);

        let voucher_id = VoucherId::new(Uuid::new_v4());
        let clinic_id = ClinicId::new(Uuid::new_v4());
        engine
            .execute(&envelope(CommandPayload::IssueVoucherTentative {
                voucher_id, grant_id, bucket: BUCKET_GENERAL.to_string(), clinic_id,
                max_reimbursement: Money::from_cents(15_000), is_lirp: false,
                valid_from: now, expires_at: now + Duration::days(30), tentative_hold_secs: Some(1),
            }), now)
            .unwrap();

        let later = now + Duration::seconds(2);
        let swept = engine.sweep_tentative_vouchers(later).unwrap();
        assert_eq!(swept, 1);
        let voucher = engine.fold_voucher_state(voucher_id).unwrap();
        assert_eq!(voucher.status, VoucherStatus::Voided);
        let grant = engine.fold_grant_state(grant_id).unwrap();
        assert_eq!(grant.bucket(BUCKET_GENERAL).unwrap().available, Money::from_cents(1_000_000));
    }

    #[test]
    fn generate_monthly_invoices_sums_approved_claims_and_adjustments() {
        let (_dir, engine) = engine();
        let now = Utc::now();
        let (grant_id, cycle) = activated_grant(&engine, now);
        let clinic_id = ClinicId::new(Uuid::new_v4());

        let voucher_id = VoucherId::new(Uuid::new_v4());
        engine
            .execute(&envelope(CommandPayload::IssueVoucherOnline {
                voucher_id, grant_id, bucket: BUCKET_GENERAL.to_string(), clinic_id,
                county_code: "KERN".to_string(), max_reimbursement: Money::from_cents(20_000), is_lirp: false,
                valid_from: now, expires_at: now + Duration::days(30),
            }), now)
            .unwrap();
        let claim_id = ClaimId::new(Uuid::new_v4());
        engine
            .execute(&envelope(CommandPayload::SubmitClaim {
                claim_id, voucher_id, procedure_code: "SN-CAT".to_string(), date_of_service: now, rabies_flag: false,
                charge_amount: Money::from_cents(20_000), co_pay: Money::zero(),
                grant_period_start: now - Duration::days(1), grant_period_end: now + Duration::days(60),
                claim_submission_deadline: now + Duration::days(90),
            }), now)
            .unwrap();
        engine
            .execute(&envelope(CommandPayload::ApproveClaim { claim_id, decided_by: Uuid::new_v4(), policy_snapshot_id: Uuid::new_v4(), reason: None }), now)
            .unwrap();

        let outcome = engine
            .execute(&envelope(CommandPayload::GenerateMonthlyInvoices {
                grant_cycle_id: cycle, year: now.year(), month: now.month(),
                watermark_ingested_at: now + Duration::minutes(1), watermark_event_id: Uuid::max(),
                clinic_ids: vec![clinic_id],
            }), now)
            .unwrap();
        let invoice_ids = match outcome {
            CommandOutcome::InvoicesGenerated { invoice_ids } => invoice_ids,
            other => panic!("unexpected outcome: {other:?}"),
        };
        assert_eq!(invoice_ids.len(), 1);
        let invoice = engine.fold_invoice_state(invoice_ids[0]).unwrap();
        assert_eq!(invoice.total, Money::from_cents(20_000));
        assert_eq!(invoice.claim_ids, vec![claim_id]);
    }
}
