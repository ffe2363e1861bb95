use thiserror::Error;
use uuid::Uuid;

use crate::money::Money;

/// Every fallible operation in the grant engine returns this error type.
/// Variants are grouped by category; the category itself is never encoded
/// as a separate field — callers match on the variant.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GrantError {
    // ── Validation ────────────────────────────────────────────────────────────
    #[error("missing required trace field: {field}")]
    MissingTraceField { field: &'static str },

    #[error("invalid event type: {event_type}")]
    InvalidEventType { event_type: String },

    #[error("event type not in closed catalog: {event_type}")]
    UnrecognizedEventType { event_type: String },

    #[error("invalid money string: {raw}")]
    InvalidMoney { raw: String },

    #[error("invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    // ── Business rules ────────────────────────────────────────────────────────
    #[error("insufficient funds in bucket {bucket} of grant {grant_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        grant_id: Uuid,
        bucket: String,
        available: Money,
        requested: Money,
    },

    #[error("LIRP voucher {voucher_id} forbids a non-zero co-pay (got {co_pay})")]
    LirpCopayForbidden { voucher_id: Uuid, co_pay: Money },

    #[error("voucher {voucher_id} has expired as of {expires_at}")]
    VoucherExpired {
        voucher_id: Uuid,
        expires_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("voucher {voucher_id} is not in TENTATIVE status")]
    VoucherNotTentative { voucher_id: Uuid },

    #[error("grant {grant_id} period has ended")]
    GrantPeriodEnded { grant_id: Uuid },

    #[error("claim submission deadline has passed for grant cycle {grant_cycle_id}")]
    ClaimDeadlinePassed { grant_cycle_id: Uuid },

    #[error("duplicate claim fingerprint for clinic {clinic_id} in cycle {grant_cycle_id}; existing claim {existing_claim_id}")]
    DuplicateClaim {
        grant_cycle_id: Uuid,
        clinic_id: Uuid,
        existing_claim_id: Uuid,
    },

    #[error("clinic {clinic_id} is not active")]
    ClinicNotActive { clinic_id: Uuid },

    #[error("grant {grant_id} is not ACTIVE (current status {status})")]
    GrantNotActive { grant_id: Uuid, status: String },

    #[error("invoice {invoice_id} is locked and cannot accept further claims")]
    InvoiceLocked { invoice_id: Uuid },

    #[error("adjustment {adjustment_id} is scoped to clinic {adjustment_clinic_id} and cannot apply to clinic {target_clinic_id}")]
    AdjustmentClinicMismatch {
        adjustment_id: Uuid,
        adjustment_clinic_id: Uuid,
        target_clinic_id: Uuid,
    },

    // ── Concurrency ───────────────────────────────────────────────────────────
    #[error("operation already in progress for idempotency key {idempotency_key}")]
    OperationInProgress { idempotency_key: String },

    #[error("transaction conflict while applying command, retry")]
    TransactionConflict,

    // ── Not found ─────────────────────────────────────────────────────────────
    #[error("{aggregate_type} {aggregate_id} not found")]
    NotFound {
        aggregate_type: &'static str,
        aggregate_id: Uuid,
    },

    // ── Invariant violation (always fatal) ───────────────────────────────────
    #[error("grant bucket balance invariant violated for grant {grant_id} bucket {bucket}: available {available} + encumbered {encumbered} + liquidated {liquidated} != awarded {awarded}")]
    BalanceInvariantViolated {
        grant_id: Uuid,
        bucket: String,
        available: Money,
        encumbered: Money,
        liquidated: Money,
        awarded: Money,
    },

    #[error("illegal state transition for {aggregate_type} {aggregate_id}: {from} -> {to}")]
    IllegalTransition {
        aggregate_type: &'static str,
        aggregate_id: Uuid,
        from: String,
        to: String,
    },

    #[error("event id {event_id} is not monotonic relative to the log watermark")]
    NonMonotonicEventId { event_id: Uuid },

    #[error("uuidv7 sequence counter overflowed within one millisecond tick")]
    SequenceOverflow,

    #[error("event log is append-only: {attempted} of event {event_id} is rejected")]
    EventLogImmutable {
        attempted: &'static str,
        event_id: Uuid,
    },

    // ── Authorization ─────────────────────────────────────────────────────────
    #[error("actor {actor_id} is not authorized for {aggregate_type} {aggregate_id}")]
    NotAuthorized {
        actor_id: Uuid,
        aggregate_type: &'static str,
        aggregate_id: Uuid,
    },

    // ── Storage ───────────────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GrantError {
    /// True for errors that are always fatal to the enclosing command and
    /// must never be treated as a recoverable business outcome.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            GrantError::BalanceInvariantViolated { .. }
                | GrantError::IllegalTransition { .. }
                | GrantError::NonMonotonicEventId { .. }
                | GrantError::SequenceOverflow
                | GrantError::EventLogImmutable { .. }
        )
    }

    /// True for errors the caller may retry (idempotency already `FAILED`,
    /// or an optimistic transaction conflict).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GrantError::OperationInProgress { .. } | GrantError::TransactionConflict
        )
    }
}
