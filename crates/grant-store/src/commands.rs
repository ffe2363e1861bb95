//! The command surface. Every command carries a `command_id`,
//! `idempotency_key`, a typed payload, and the trace quartet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use grant_core::event::{BucketInit, TraceMeta};
use grant_core::ids::{
    AdjustmentId, AllocatorId, ClaimId, ClinicId, GrantCycleId, GrantId, InvoiceId, VoucherId,
};
use grant_core::Money;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command_id: uuid::Uuid,
    pub idempotency_key: String,
    pub trace: TraceMeta,
    pub payload: CommandPayload,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum CommandPayload {
    // ── Grant lifecycle ────────────────────────────────────────────────────
    CreateGrant {
        grant_id: GrantId,
        grant_cycle_id: GrantCycleId,
        buckets: Vec<BucketInit>,
    },
    SignGrantAgreement { grant_id: GrantId },
    ActivateGrant { grant_id: GrantId },
    SuspendGrant { grant_id: GrantId, reason: Option<String> },
    ReinstateGrant { grant_id: GrantId },
    CloseGrant { grant_id: GrantId },
    ReportMatchingFunds { grant_id: GrantId, bucket: String, amount: Money },

    // ── Voucher ────────────────────────────────────────────────────────────
    IssueVoucherOnline {
        voucher_id: VoucherId,
        grant_id: GrantId,
        bucket: String,
        clinic_id: ClinicId,
        county_code: String,
        max_reimbursement: Money,
        is_lirp: bool,
        valid_from: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    IssueVoucherTentative {
        voucher_id: VoucherId,
        grant_id: GrantId,
        bucket: String,
        clinic_id: ClinicId,
        max_reimbursement: Money,
        is_lirp: bool,
        valid_from: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        tentative_hold_secs: Option<i64>,
    },
    ConfirmTentativeVoucher { voucher_id: VoucherId, county_code: String },
    RejectTentativeVoucher { voucher_id: VoucherId, reason: String },
    VoidVoucher { voucher_id: VoucherId, reason: String },
    ExpireVoucher { voucher_id: VoucherId },

    // ── Claim ──────────────────────────────────────────────────────────────
    SubmitClaim {
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
    },
    ApproveClaim {
        claim_id: ClaimId,
        decided_by: uuid::Uuid,
        policy_snapshot_id: uuid::Uuid,
        reason: Option<String>,
    },
    DenyClaim {
        claim_id: ClaimId,
        decided_by: uuid::Uuid,
        policy_snapshot_id: uuid::Uuid,
        reason: Option<String>,
    },
    AdjustClaim {
        claim_id: ClaimId,
        new_approved_amount: Money,
        decided_by: uuid::Uuid,
        policy_snapshot_id: uuid::Uuid,
        reason: Option<String>,
    },

    // ── Invoice / Payment / Adjustment ────────────────────────────────────
    GenerateMonthlyInvoices {
        grant_cycle_id: GrantCycleId,
        year: i32,
        month: u32,
        watermark_ingested_at: DateTime<Utc>,
        watermark_event_id: uuid::Uuid,
        clinic_ids: Vec<ClinicId>,
    },
    SubmitInvoice { invoice_id: InvoiceId },
    RecordPayment {
        payment_id: uuid::Uuid,
        invoice_id: InvoiceId,
        amount: Money,
        channel: String,
        reference: String,
    },
    CreateAdjustment {
        adjustment_id: AdjustmentId,
        source_invoice_id: InvoiceId,
        clinic_id: Option<ClinicId>,
        amount: Money,
        reason: String,
    },
}

/// What a successful command produced, in a form cheap to persist as an
/// idempotency-cache result and to return to a caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CommandOutcome {
    GrantCreated { grant_id: GrantId },
    GrantTransitioned { grant_id: GrantId },
    VoucherIssued { voucher_id: VoucherId, voucher_code: Option<String> },
    VoucherTransitioned { voucher_id: VoucherId },
    ClaimSubmitted { claim_id: ClaimId },
    ClaimDuplicateDetected { existing_claim_id: ClaimId },
    ClaimDecided { claim_id: ClaimId },
    ClaimDecisionConflict { claim_id: ClaimId },
    InvoicesGenerated { invoice_ids: Vec<InvoiceId> },
    InvoiceSubmitted { invoice_id: InvoiceId },
    PaymentRecorded { payment_id: uuid::Uuid },
    AdjustmentCreated { adjustment_id: AdjustmentId },
}

/// Distinct allocator id for a voucher's `(grantCycleId, countyCode)`.
pub fn allocator_for(grant_cycle_id: GrantCycleId, county_code: &str) -> AllocatorId {
    grant_crypto::allocator_id(grant_cycle_id.inner(), county_code)
}
