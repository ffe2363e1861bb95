use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use grant_core::event::BucketInit;
use grant_core::ids::{AdjustmentId, ClaimId, ClinicId, GrantCycleId, GrantId, InvoiceId, VoucherId};
use grant_core::{AdjustmentState, ClaimState, GrantState, InvoiceState, Money, PaymentRecord, PaymentStatus, VoucherState};

/// Every mutating call carries its idempotency key and trace quartet
/// alongside the command-specific fields. The facade builds the
/// `CommandEnvelope` from this plus the business payload; it never
/// invents trace data on the caller's behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcTrace {
    pub idempotency_key: String,
    pub actor_id: Uuid,
    pub actor_type: String,
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub causation_id: Option<Uuid>,
}

/// Node / protocol version information returned by `grant_getVersion`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcVersionInfo {
    pub node_version: String,
    pub protocol_version: String,
}

impl RpcVersionInfo {
    pub fn current() -> Self {
        RpcVersionInfo { node_version: env!("CARGO_PKG_VERSION").to_string(), protocol_version: "1".to_string() }
    }
}

/// Everything known about an invoice's payment state, returned by
/// `grant_getInvoice` alongside the invoice itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcInvoiceView {
    pub invoice: InvoiceState,
    pub payments: Vec<PaymentRecord>,
    pub payment_status: PaymentStatus,
}

/// Re-exported projection views. These are the same types the storage
/// layer persists — they already serialize cleanly (`Money` as a decimal
/// string, branded ids as plain UUIDs) so the facade forwards them as-is
/// rather than duplicating every field into a parallel wire type.
pub type RpcGrant = GrantState;
pub type RpcVoucher = VoucherState;
pub type RpcClaim = ClaimState;
pub type RpcAdjustment = AdjustmentState;

// ── Grant lifecycle requests ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGrantRequest {
    pub trace: RpcTrace,
    pub grant_id: GrantId,
    pub grant_cycle_id: GrantCycleId,
    pub buckets: Vec<BucketInit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantIdRequest {
    pub trace: RpcTrace,
    pub grant_id: GrantId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendGrantRequest {
    pub trace: RpcTrace,
    pub grant_id: GrantId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMatchingFundsRequest {
    pub trace: RpcTrace,
    pub grant_id: GrantId,
    pub bucket: String,
    pub amount: Money,
}

// ── Voucher requests ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueVoucherOnlineRequest {
    pub trace: RpcTrace,
    pub voucher_id: VoucherId,
    pub grant_id: GrantId,
    pub bucket: String,
    pub clinic_id: ClinicId,
    pub county_code: String,
    pub max_reimbursement: Money,
    pub is_lirp: bool,
    pub valid_from: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueVoucherTentativeRequest {
    pub trace: RpcTrace,
    pub voucher_id: VoucherId,
    pub grant_id: GrantId,
    pub bucket: String,
    pub clinic_id: ClinicId,
    pub max_reimbursement: Money,
    pub is_lirp: bool,
    pub valid_from: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub tentative_hold_secs: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmTentativeVoucherRequest {
    pub trace: RpcTrace,
    pub voucher_id: VoucherId,
    pub county_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectTentativeVoucherRequest {
    pub trace: RpcTrace,
    pub voucher_id: VoucherId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoidVoucherRequest {
    pub trace: RpcTrace,
    pub voucher_id: VoucherId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoucherIssuedResponse {
    pub voucher_id: VoucherId,
    pub voucher_code: Option<String>,
}

// ── Claim requests ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitClaimRequest {
    pub trace: RpcTrace,
    pub claim_id: ClaimId,
    pub voucher_id: VoucherId,
    pub procedure_code: String,
    pub date_of_service: DateTime<Utc>,
    pub rabies_flag: bool,
    pub charge_amount: Money,
    pub co_pay: Money,
    pub grant_period_start: DateTime<Utc>,
    pub grant_period_end: DateTime<Utc>,
    pub claim_submission_deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitClaimResponse {
    pub claim_id: ClaimId,
    pub duplicate_of: Option<ClaimId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideClaimRequest {
    pub trace: RpcTrace,
    pub claim_id: ClaimId,
    pub decided_by: Uuid,
    pub policy_snapshot_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecideClaimResponse {
    pub claim_id: ClaimId,
    pub conflict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustClaimRequest {
    pub trace: RpcTrace,
    pub claim_id: ClaimId,
    pub new_approved_amount: Money,
    pub decided_by: Uuid,
    pub policy_snapshot_id: Uuid,
    #[serde(default)]
    pub reason: Option<String>,
}

// ── Invoice / payment / adjustment requests ──────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateMonthlyInvoicesRequest {
    pub trace: RpcTrace,
    pub grant_cycle_id: GrantCycleId,
    pub year: i32,
    pub month: u32,
    pub watermark_ingested_at: DateTime<Utc>,
    pub watermark_event_id: Uuid,
    pub clinic_ids: Vec<ClinicId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceIdRequest {
    pub trace: RpcTrace,
    pub invoice_id: InvoiceId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPaymentRequest {
    pub trace: RpcTrace,
    pub payment_id: Uuid,
    pub invoice_id: InvoiceId,
    pub amount: Money,
    pub channel: String,
    pub reference: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAdjustmentRequest {
    pub trace: RpcTrace,
    pub adjustment_id: AdjustmentId,
    pub source_invoice_id: InvoiceId,
    #[serde(default)]
    pub clinic_id: Option<ClinicId>,
    pub amount: Money,
    pub reason: String,
}
