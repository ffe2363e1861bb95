//! The event envelope and the closed catalog of event payloads.
//!
//! The catalog is closed: every event type the engine will ever append is a
//! variant of [`EventPayload`]. There is no unchecked map at the reducer
//! boundary — a reducer matches on `EventPayload`, not on a string plus a
//! JSON blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{
    AdjustmentId, AllocatorId, ClaimId, ClinicId, EventId, GrantCycleId, GrantId, InvoiceId,
    PaymentId, VoucherId,
};
use crate::money::Money;

/// Which aggregate family an event belongs to. Used to route folds and to
/// select the projection table a write-through update targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateType {
    Grant,
    Voucher,
    Allocator,
    Claim,
    Invoice,
    Payment,
    Adjustment,
    /// Grant-application intake events. Out of scope for this engine's
    /// business logic; recognized only so a foreign log segment replays
    /// without tripping the unrecognized-type check.
    Application,
}

/// Mandatory metadata captured on every terminal claim decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionBasis {
    pub policy_snapshot_id: Uuid,
    pub decided_by: Uuid,
    pub decided_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// A single grant bucket's opening configuration, as carried by `GRANT_CREATED`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BucketInit {
    pub bucket: String,
    pub awarded: Money,
    pub rate_numerator_cents: i64,
    pub rate_denominator_cents: i64,
}

/// Every payload this engine will ever append or fold, tagged by its
/// catalog event type name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "eventType")]
pub enum EventPayload {
    // ── Grant ────────────────────────────────────────────────────────────────
    #[serde(rename = "GRANT_CREATED")]
    GrantCreated {
        grant_id: GrantId,
        grant_cycle_id: GrantCycleId,
        buckets: Vec<BucketInit>,
    },
    #[serde(rename = "GRANT_AGREEMENT_SIGNED")]
    GrantAgreementSigned { grant_id: GrantId },
    #[serde(rename = "GRANT_ACTIVATED")]
    GrantActivated { grant_id: GrantId },
    #[serde(rename = "GRANT_SUSPENDED")]
    GrantSuspended { grant_id: GrantId, reason: Option<String> },
    #[serde(rename = "GRANT_REINSTATED")]
    GrantReinstated { grant_id: GrantId },
    #[serde(rename = "GRANT_CLOSED")]
    GrantClosed { grant_id: GrantId },
    #[serde(rename = "GRANT_PERIOD_ENDED")]
    GrantPeriodEnded { grant_id: GrantId },
    #[serde(rename = "GRANT_CLAIMS_DEADLINE_PASSED")]
    GrantClaimsDeadlinePassed { grant_id: GrantId },
    #[serde(rename = "GRANT_FUNDS_ENCUMBERED")]
    GrantFundsEncumbered {
        grant_id: GrantId,
        bucket: String,
        amount: Money,
        voucher_id: VoucherId,
    },
    #[serde(rename = "GRANT_FUNDS_RELEASED")]
    GrantFundsReleased {
        grant_id: GrantId,
        bucket: String,
        amount: Money,
        voucher_id: VoucherId,
    },
    #[serde(rename = "GRANT_FUNDS_LIQUIDATED")]
    GrantFundsLiquidated {
        grant_id: GrantId,
        bucket: String,
        amount: Money,
        claim_id: ClaimId,
    },
    #[serde(rename = "MATCHING_FUNDS_REPORTED")]
    MatchingFundsReported {
        grant_id: GrantId,
        bucket: String,
        amount: Money,
    },
    #[serde(rename = "LIRP_MUST_HONOR_ENFORCED")]
    LirpMustHonorEnforced { grant_id: GrantId, voucher_id: VoucherId },

    // ── Voucher ──────────────────────────────────────────────────────────────
    #[serde(rename = "VOUCHER_ISSUED")]
    VoucherIssued {
        voucher_id: VoucherId,
        grant_id: GrantId,
        bucket: String,
        clinic_id: ClinicId,
        max_reimbursement: Money,
        is_lirp: bool,
        valid_from: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    #[serde(rename = "VOUCHER_ISSUED_TENTATIVE")]
    VoucherIssuedTentative {
        voucher_id: VoucherId,
        grant_id: GrantId,
        bucket: String,
        clinic_id: ClinicId,
        max_reimbursement: Money,
        is_lirp: bool,
        valid_from: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        tentative_expires_at: DateTime<Utc>,
    },
    #[serde(rename = "VOUCHER_ISSUED_CONFIRMED")]
    VoucherIssuedConfirmed { voucher_id: VoucherId },
    #[serde(rename = "VOUCHER_ISSUED_REJECTED")]
    VoucherIssuedRejected { voucher_id: VoucherId, reason: String },
    #[serde(rename = "VOUCHER_REDEEMED")]
    VoucherRedeemed { voucher_id: VoucherId, claim_id: ClaimId },
    #[serde(rename = "VOUCHER_EXPIRED")]
    VoucherExpired { voucher_id: VoucherId },
    #[serde(rename = "VOUCHER_VOIDED")]
    VoucherVoided { voucher_id: VoucherId, reason: String },
    #[serde(rename = "VOUCHER_CODE_ALLOCATED")]
    VoucherCodeAllocated {
        voucher_id: VoucherId,
        allocator_id: AllocatorId,
        voucher_code: String,
        sequence: u64,
    },

    // ── Claim ────────────────────────────────────────────────────────────────
    #[serde(rename = "CLAIM_SUBMITTED")]
    ClaimSubmitted {
        claim_id: ClaimId,
        voucher_id: VoucherId,
        clinic_id: ClinicId,
        grant_cycle_id: GrantCycleId,
        procedure_code: String,
        date_of_service: DateTime<Utc>,
        rabies_flag: bool,
        charge_amount: Money,
        co_pay: Money,
        claim_fingerprint: String,
    },
    #[serde(rename = "CLAIM_APPROVED")]
    ClaimApproved {
        claim_id: ClaimId,
        approved_amount: Money,
        decision_basis: DecisionBasis,
    },
    #[serde(rename = "CLAIM_DENIED")]
    ClaimDenied {
        claim_id: ClaimId,
        decision_basis: DecisionBasis,
    },
    #[serde(rename = "CLAIM_ADJUSTED")]
    ClaimAdjusted {
        claim_id: ClaimId,
        new_approved_amount: Money,
        decision_basis: DecisionBasis,
    },
    #[serde(rename = "CLAIM_INVOICED")]
    ClaimInvoiced { claim_id: ClaimId, invoice_id: InvoiceId },
    #[serde(rename = "CLAIM_DECISION_CONFLICT_RECORDED")]
    ClaimDecisionConflictRecorded {
        claim_id: ClaimId,
        attempted_decision: String,
        decision_basis: DecisionBasis,
    },

    // ── Invoice / Payment / Adjustment ────────────────────────────────────────
    #[serde(rename = "INVOICE_GENERATED")]
    InvoiceGenerated {
        invoice_id: InvoiceId,
        clinic_id: ClinicId,
        grant_cycle_id: GrantCycleId,
        year: i32,
        month: u32,
        claim_ids: Vec<ClaimId>,
        adjustment_ids: Vec<AdjustmentId>,
        total: Money,
    },
    #[serde(rename = "INVOICE_SUBMITTED")]
    InvoiceSubmitted { invoice_id: InvoiceId },
    #[serde(rename = "PAYMENT_RECORDED")]
    PaymentRecorded {
        payment_id: PaymentId,
        invoice_id: InvoiceId,
        amount: Money,
        channel: String,
        reference: String,
    },
    #[serde(rename = "INVOICE_ADJUSTMENT_CREATED")]
    InvoiceAdjustmentCreated {
        adjustment_id: AdjustmentId,
        source_invoice_id: InvoiceId,
        clinic_id: Option<ClinicId>,
        amount: Money,
        reason: String,
    },
    #[serde(rename = "INVOICE_ADJUSTMENT_APPLIED")]
    InvoiceAdjustmentApplied {
        adjustment_id: AdjustmentId,
        target_invoice_id: InvoiceId,
    },

    // ── Application intake (out of scope; catalog membership only) ──────────
    #[serde(rename = "APPLICATION_STARTED")]
    ApplicationStarted { application_id: Uuid },
    #[serde(rename = "APPLICATION_SECTION_COMPLETED")]
    ApplicationSectionCompleted { application_id: Uuid, section: String },
    #[serde(rename = "APPLICATION_SUBMITTED")]
    ApplicationSubmitted { application_id: Uuid },
    #[serde(rename = "APPLICATION_SCORED")]
    ApplicationScored { application_id: Uuid, score: i64 },
    #[serde(rename = "APPLICATION_AWARDED")]
    ApplicationAwarded { application_id: Uuid, grant_id: GrantId },
    #[serde(rename = "APPLICATION_WAITLISTED")]
    ApplicationWaitlisted { application_id: Uuid },
    #[serde(rename = "APPLICATION_DENIED")]
    ApplicationDenied { application_id: Uuid },
    #[serde(rename = "APPLICATION_TOKEN_CONSUMED")]
    ApplicationTokenConsumed { application_id: Uuid, token: String },
    #[serde(rename = "ATTACHMENT_ADDED")]
    AttachmentAdded { application_id: Uuid, attachment_hash: String },
    #[serde(rename = "ATTACHMENT_REMOVED")]
    AttachmentRemoved { application_id: Uuid, attachment_hash: String },
}

/// Whether `name` matches the closed catalog's event-type regex
/// `^[A-Z][A-Z0-9_]+$`. Every `EventPayload::event_type()` already satisfies
/// this by construction; the append path still checks it explicitly so the
/// enforcement exists in code, not just in the type system.
pub fn is_valid_event_type_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.clone().count() >= 1
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

impl EventPayload {
    /// The catalog event type name, exactly as it appears on the wire. This
    /// is the single source of truth for `eventType` — it is never set
    /// independently of the payload variant.
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::GrantCreated { .. } => "GRANT_CREATED",
            EventPayload::GrantAgreementSigned { .. } => "GRANT_AGREEMENT_SIGNED",
            EventPayload::GrantActivated { .. } => "GRANT_ACTIVATED",
            EventPayload::GrantSuspended { .. } => "GRANT_SUSPENDED",
            EventPayload::GrantReinstated { .. } => "GRANT_REINSTATED",
            EventPayload::GrantClosed { .. } => "GRANT_CLOSED",
            EventPayload::GrantPeriodEnded { .. } => "GRANT_PERIOD_ENDED",
            EventPayload::GrantClaimsDeadlinePassed { .. } => "GRANT_CLAIMS_DEADLINE_PASSED",
            EventPayload::GrantFundsEncumbered { .. } => "GRANT_FUNDS_ENCUMBERED",
            EventPayload::GrantFundsReleased { .. } => "GRANT_FUNDS_RELEASED",
            EventPayload::GrantFundsLiquidated { .. } => "GRANT_FUNDS_LIQUIDATED",
            EventPayload::MatchingFundsReported { .. } => "MATCHING_FUNDS_REPORTED",
            EventPayload::LirpMustHonorEnforced { .. } => "LIRP_MUST_HONOR_ENFORCED",
            EventPayload::VoucherIssued { .. } => "VOUCHER_ISSUED",
            EventPayload::VoucherIssuedTentative { .. } => "VOUCHER_ISSUED_TENTATIVE",
            EventPayload::VoucherIssuedConfirmed { .. } => "VOUCHER_ISSUED_CONFIRMED",
            EventPayload::VoucherIssuedRejected { .. } => "VOUCHER_ISSUED_REJECTED",
            EventPayload::VoucherRedeemed { .. } => "VOUCHER_REDEEMED",
            EventPayload::VoucherExpired { .. } => "VOUCHER_EXPIRED",
            EventPayload::VoucherVoided { .. } => "VOUCHER_VOIDED",
            EventPayload::VoucherCodeAllocated { .. } => "VOUCHER_CODE_ALLOCATED",
            EventPayload::ClaimSubmitted { .. } => "CLAIM_SUBMITTED",
            EventPayload::ClaimApproved { .. } => "CLAIM_APPROVED",
            EventPayload::ClaimDenied { .. } => "CLAIM_DENIED",
            EventPayload::ClaimAdjusted { .. } => "CLAIM_ADJUSTED",
            EventPayload::ClaimInvoiced { .. } => "CLAIM_INVOICED",
            EventPayload::ClaimDecisionConflictRecorded { .. } => "CLAIM_DECISION_CONFLICT_RECORDED",
            EventPayload::InvoiceGenerated { .. } => "INVOICE_GENERATED",
            EventPayload::InvoiceSubmitted { .. } => "INVOICE_SUBMITTED",
            EventPayload::PaymentRecorded { .. } => "PAYMENT_RECORDED",
            EventPayload::InvoiceAdjustmentCreated { .. } => "INVOICE_ADJUSTMENT_CREATED",
            EventPayload::InvoiceAdjustmentApplied { .. } => "INVOICE_ADJUSTMENT_APPLIED",
            EventPayload::ApplicationStarted { .. } => "APPLICATION_STARTED",
            EventPayload::ApplicationSectionCompleted { .. } => "APPLICATION_SECTION_COMPLETED",
            EventPayload::ApplicationSubmitted { .. } => "APPLICATION_SUBMITTED",
            EventPayload::ApplicationScored { .. } => "APPLICATION_SCORED",
            EventPayload::ApplicationAwarded { .. } => "APPLICATION_AWARDED",
            EventPayload::ApplicationWaitlisted { .. } => "APPLICATION_WAITLISTED",
            EventPayload::ApplicationDenied { .. } => "APPLICATION_DENIED",
            EventPayload::ApplicationTokenConsumed { .. } => "APPLICATION_TOKEN_CONSUMED",
            EventPayload::AttachmentAdded { .. } => "ATTACHMENT_ADDED",
            EventPayload::AttachmentRemoved { .. } => "ATTACHMENT_REMOVED",
        }
    }

    pub fn aggregate_type(&self) -> AggregateType {
        match self {
            EventPayload::GrantCreated { .. }
            | EventPayload::GrantAgreementSigned { .. }
            | EventPayload::GrantActivated { .. }
            | EventPayload::GrantSuspended { .. }
            | EventPayload::GrantReinstated { .. }
            | EventPayload::GrantClosed { .. }
            | EventPayload::GrantPeriodEnded { .. }
            | EventPayload::GrantClaimsDeadlinePassed { .. }
            | EventPayload::GrantFundsEncumbered { .. }
            | EventPayload::GrantFundsReleased { .. }
            | EventPayload::GrantFundsLiquidated { .. }
            | EventPayload::MatchingFundsReported { .. }
            | EventPayload::LirpMustHonorEnforced { .. } => AggregateType::Grant,

            EventPayload::VoucherIssued { .. }
            | EventPayload::VoucherIssuedTentative { .. }
            | EventPayload::VoucherIssuedConfirmed { .. }
            | EventPayload::VoucherIssuedRejected { .. }
            | EventPayload::VoucherRedeemed { .. }
            | EventPayload::VoucherExpired { .. }
            | EventPayload::VoucherVoided { .. } => AggregateType::Voucher,

            EventPayload::VoucherCodeAllocated { .. } => AggregateType::Allocator,

            EventPayload::ClaimSubmitted { .. }
            | EventPayload::ClaimApproved { .. }
            | EventPayload::ClaimDenied { .. }
            | EventPayload::ClaimAdjusted { .. }
            | EventPayload::ClaimInvoiced { .. }
            | EventPayload::ClaimDecisionConflictRecorded { .. } => AggregateType::Claim,

            EventPayload::InvoiceGenerated { .. } | EventPayload::InvoiceSubmitted { .. } => {
                AggregateType::Invoice
            }
            EventPayload::PaymentRecorded { .. } => AggregateType::Payment,
            EventPayload::InvoiceAdjustmentCreated { .. }
            | EventPayload::InvoiceAdjustmentApplied { .. } => AggregateType::Adjustment,

            EventPayload::ApplicationStarted { .. }
            | EventPayload::ApplicationSectionCompleted { .. }
            | EventPayload::ApplicationSubmitted { .. }
            | EventPayload::ApplicationScored { .. }
            | EventPayload::ApplicationAwarded { .. }
            | EventPayload::ApplicationWaitlisted { .. }
            | EventPayload::ApplicationDenied { .. }
            | EventPayload::ApplicationTokenConsumed { .. }
            | EventPayload::AttachmentAdded { .. }
            | EventPayload::AttachmentRemoved { .. } => AggregateType::Application,
        }
    }
}

/// Trace metadata required on every event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceMeta {
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,
    pub actor_id: Uuid,
    pub actor_type: String,
}

/// An immutable, appended event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub aggregate_id: Uuid,
    pub grant_cycle_id: GrantCycleId,
    pub payload: EventPayload,
    pub occurred_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub trace: TraceMeta,
}

impl Event {
    pub fn aggregate_type(&self) -> AggregateType {
        self.payload.aggregate_type()
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// The `(ingestedAt, eventId)` tuple used for all ordering, watermark
    /// pagination, and monthly-invoice-selection comparisons.
    pub fn watermark_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.ingested_at, self.event_id.inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_matches_closed_catalog_regex() {
        let re_ok = |s: &str| {
            let mut chars = s.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
                && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        };
        let sample = EventPayload::VoucherExpired {
            voucher_id: VoucherId::new(Uuid::nil()),
        };
        assert!(re_ok(sample.event_type()));
    }

    #[test]
    fn grant_funds_encumbered_routes_to_grant_aggregate() {
        let p = EventPayload::GrantFundsEncumbered {
            grant_id: GrantId::new(Uuid::nil()),
            bucket: "GENERAL".into(),
            amount: Money::zero(),
            voucher_id: VoucherId::new(Uuid::nil()),
        };
        assert_eq!(p.aggregate_type(), AggregateType::Grant);
    }
}
