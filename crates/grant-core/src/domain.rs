//! Aggregate state shapes — the fold target of each reducer. These are pure
//! data; the fold functions and invariant checks that produce them live in
//! `grant-store`, which owns the event log these are replayed from.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::DecisionBasis;
use crate::ids::{
    AdjustmentId, AllocatorId, ClaimId, ClinicId, GrantCycleId, GrantId, InvoiceId, PaymentId,
    VoucherId,
};
use crate::money::Money;

// ── Grant ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantStatus {
    Created,
    AgreementSigned,
    Active,
    Suspended,
    Closed,
}

impl GrantStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GrantStatus::Closed)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrantBucket {
    pub bucket: String,
    pub awarded: Money,
    pub available: Money,
    pub encumbered: Money,
    pub liquidated: Money,
    /// Cumulative memo of funds released back to `available` from expired
    /// or voided tentative reservations. Never part of the balance equation.
    pub released: Money,
    pub rate_numerator_cents: i64,
    pub rate_denominator_cents: i64,
    /// Matching-funds memo fields: tracked but never constrain the balance
    /// equation, exactly like `released`.
    pub matching_funds_committed: Money,
    pub matching_funds_reported: Money,
}

impl GrantBucket {
    pub fn new(bucket: impl Into<String>, awarded: Money, rate_num: i64, rate_den: i64) -> Self {
        GrantBucket {
            bucket: bucket.into(),
            awarded: awarded.clone(),
            available: awarded,
            encumbered: Money::zero(),
            liquidated: Money::zero(),
            released: Money::zero(),
            rate_numerator_cents: rate_num,
            rate_denominator_cents: rate_den,
            matching_funds_committed: Money::zero(),
            matching_funds_reported: Money::zero(),
        }
    }

    /// `available + encumbered + liquidated == awarded`, all non-negative.
    pub fn balances(&self) -> bool {
        let sum = self
            .available
            .checked_add(&self.encumbered)
            .checked_add(&self.liquidated);
        sum == self.awarded
            && !self.available.is_negative()
            && !self.encumbered.is_negative()
            && !self.liquidated.is_negative()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrantState {
    pub grant_id: GrantId,
    pub grant_cycle_id: GrantCycleId,
    pub status: GrantStatus,
    pub buckets: BTreeMap<String, GrantBucket>,
}

impl GrantState {
    pub fn bucket(&self, name: &str) -> Option<&GrantBucket> {
        self.buckets.get(name)
    }
}

// ── Voucher ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoucherStatus {
    Tentative,
    Issued,
    Redeemed,
    Expired,
    Voided,
}

impl VoucherStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VoucherStatus::Redeemed | VoucherStatus::Expired | VoucherStatus::Voided
        )
    }

    /// Legal next states from this state. `Tentative` transitions to
    /// `Issued` only via the confirm path, which a reducer models as a
    /// direct status write rather than a transition through `Issued`'s own
    /// legality check.
    pub fn can_transition_to(&self, next: VoucherStatus) -> bool {
        use VoucherStatus::*;
        matches!(
            (self, next),
            (Tentative, Issued) | (Tentative, Voided) | (Issued, Redeemed) | (Issued, Expired) | (Issued, Voided)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VoucherState {
    pub voucher_id: VoucherId,
    pub grant_id: GrantId,
    pub bucket: String,
    pub clinic_id: ClinicId,
    pub status: VoucherStatus,
    pub voucher_code: Option<String>,
    pub max_reimbursement: Money,
    pub is_lirp: bool,
    pub valid_from: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub tentative_expires_at: Option<DateTime<Utc>>,
    pub claim_id: Option<ClaimId>,
}

// ── Allocator ──────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocatorState {
    pub allocator_id: AllocatorId,
    pub grant_cycle_id: GrantCycleId,
    pub county_code: String,
    /// The next code number to hand out, 1-based. A fresh allocator starts
    /// here; after issuing code `NNNN` this holds `NNNN + 1`.
    pub next_sequence: u64,
    pub allocated_codes: Vec<String>,
}

// ── Claim ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimStatus {
    Submitted,
    Approved,
    Denied,
    Adjusted,
    Invoiced,
}

impl ClaimStatus {
    pub fn is_terminal_decision(&self) -> bool {
        matches!(
            self,
            ClaimStatus::Approved | ClaimStatus::Denied | ClaimStatus::Adjusted | ClaimStatus::Invoiced
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClaimState {
    pub claim_id: ClaimId,
    pub voucher_id: VoucherId,
    pub clinic_id: ClinicId,
    pub grant_cycle_id: GrantCycleId,
    pub procedure_code: String,
    pub date_of_service: DateTime<Utc>,
    pub rabies_flag: bool,
    pub charge_amount: Money,
    pub co_pay: Money,
    pub claim_fingerprint: String,
    pub status: ClaimStatus,
    pub approved_amount: Option<Money>,
    pub approved_event_id: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub decision_basis: Option<DecisionBasis>,
    pub invoice_id: Option<InvoiceId>,
}

// ── Invoice ────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceLifecycle {
    Draft,
    Submitted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvoiceState {
    pub invoice_id: InvoiceId,
    pub clinic_id: ClinicId,
    pub grant_cycle_id: GrantCycleId,
    pub year: i32,
    pub month: u32,
    pub lifecycle: InvoiceLifecycle,
    pub claim_ids: Vec<ClaimId>,
    pub adjustment_ids: Vec<AdjustmentId>,
    pub total: Money,
}

/// Payment status is derived, never stored as an event-driven field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Draft,
    Submitted,
    PartiallyPaid,
    Paid,
}

pub fn derive_payment_status(invoice: &InvoiceState, paid_total: &Money) -> PaymentStatus {
    if matches!(invoice.lifecycle, InvoiceLifecycle::Draft) {
        return PaymentStatus::Draft;
    }
    if paid_total.is_zero() {
        PaymentStatus::Submitted
    } else if paid_total >= &invoice.total {
        PaymentStatus::Paid
    } else {
        PaymentStatus::PartiallyPaid
    }
}

// ── Payment ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub payment_id: PaymentId,
    pub invoice_id: InvoiceId,
    pub amount: Money,
    pub channel: String,
    pub reference: String,
}

// ── Adjustment ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentState {
    pub adjustment_id: AdjustmentId,
    pub source_invoice_id: InvoiceId,
    pub grant_cycle_id: GrantCycleId,
    /// `None` = cycle-wide; eligible against any clinic in the same cycle.
    pub clinic_id: Option<ClinicId>,
    pub amount: Money,
    pub reason: String,
    pub applied_to_invoice_id: Option<InvoiceId>,
}

impl AdjustmentState {
    pub fn eligible_for_clinic(&self, clinic: ClinicId) -> bool {
        match self.clinic_id {
            None => true,
            Some(scoped) => scoped == clinic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_balances_when_equation_holds() {
        let mut b = GrantBucket::new("GENERAL", Money::from_cents(1_000_000), 1, 1);
        b.available = Money::from_cents(985_000);
        b.encumbered = Money::from_cents(15_000);
        assert!(b.balances());
    }

    #[test]
    fn bucket_does_not_balance_when_equation_broken() {
        let mut b = GrantBucket::new("GENERAL", Money::from_cents(1_000_000), 1, 1);
        b.available = Money::from_cents(900_000);
        assert!(!b.balances());
    }

    #[test]
    fn voucher_transitions_respect_state_machine() {
        use VoucherStatus::*;
        assert!(Tentative.can_transition_to(Issued));
        assert!(Issued.can_transition_to(Redeemed));
        assert!(!Redeemed.can_transition_to(Expired));
        assert!(!Tentative.can_transition_to(Redeemed));
    }

    #[test]
    fn adjustment_scoping_excludes_other_clinics() {
        let clinic_a = ClinicId::new(Uuid::new_v4());
        let clinic_b = ClinicId::new(Uuid::new_v4());
        let scoped = AdjustmentState {
            adjustment_id: AdjustmentId::new(Uuid::new_v4()),
            source_invoice_id: InvoiceId::new(Uuid::new_v4()),
            grant_cycle_id: GrantCycleId::new(Uuid::new_v4()),
            clinic_id: Some(clinic_a),
            amount: Money::from_cents(100),
            reason: "test".into(),
            applied_to_invoice_id: None,
        };
        assert!(scoped.eligible_for_clinic(clinic_a));
        assert!(!scoped.eligible_for_clinic(clinic_b));
    }
}
