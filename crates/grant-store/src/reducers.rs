//! Pure `(state, event) -> state` folds, one per aggregate family, plus the
//! invariant check each fold re-validates after every step. A reducer never
//! touches storage; it only ever sees the events handed to it.

use grant_core::error::GrantError;
use grant_core::event::{Event, EventPayload};
use grant_core::{
    AdjustmentState, AllocatorState, ClaimState, ClaimStatus, GrantBucket, GrantState,
    GrantStatus, InvoiceLifecycle, InvoiceState, VoucherState, VoucherStatus,
};
use std::collections::BTreeMap;

fn illegal<T>(aggregate_type: &'static str, aggregate_id: uuid::Uuid, from: &str, to: &str) -> Result<T, GrantError> {
    Err(GrantError::IllegalTransition {
        aggregate_type,
        aggregate_id,
        from: from.to_string(),
        to: to.to_string(),
    })
}

// ── Grant ────────────────────────────────────────────────────────────────────

pub fn fold_grant(events: &[Event]) -> Result<Option<GrantState>, GrantError> {
    let mut state: Option<GrantState> = None;
    for event in events {
        match &event.payload {
            EventPayload::GrantCreated { grant_id, grant_cycle_id, buckets } => {
                let mut map = BTreeMap::new();
                for b in buckets {
                    map.insert(
                        b.bucket.clone(),
                        GrantBucket::new(b.bucket.clone(), b.awarded.clone(), b.rate_numerator_cents, b.rate_denominator_cents),
                    );
                }
                state = Some(GrantState {
                    grant_id: *grant_id,
                    grant_cycle_id: *grant_cycle_id,
                    status: GrantStatus::Created,
                    buckets: map,
                });
            }
            EventPayload::GrantAgreementSigned { grant_id } => {
                let s = state.as_mut().expect("grant projection exists before agreement signed");
                if s.status != GrantStatus::Created {
                    return illegal("Grant", grant_id.inner(), "non-Created", "AgreementSigned");
                }
                s.status = GrantStatus::AgreementSigned;
            }
            EventPayload::GrantActivated { grant_id } => {
                let s = state.as_mut().expect("grant projection exists before activation");
                if !matches!(s.status, GrantStatus::AgreementSigned | GrantStatus::Suspended) {
                    return illegal("Grant", grant_id.inner(), "non-signed/suspended", "Active");
                }
                s.status = GrantStatus::Active;
            }
            EventPayload::GrantSuspended { grant_id, .. } => {
                let s = state.as_mut().expect("grant projection exists before suspension");
                if s.status != GrantStatus::Active {
                    return illegal("Grant", grant_id.inner(), "non-Active", "Suspended");
                }
                s.status = GrantStatus::Suspended;
            }
            EventPayload::GrantReinstated { grant_id } => {
                let s = state.as_mut().expect("grant projection exists before reinstatement");
                if s.status != GrantStatus::Suspended {
                    return illegal("Grant", grant_id.inner(), "non-Suspended", "Active");
                }
                s.status = GrantStatus::Active;
            }
            EventPayload::GrantClosed { grant_id } => {
                let s = state.as_mut().expect("grant projection exists before close");
                if s.status.is_terminal() {
                    return illegal("Grant", grant_id.inner(), "Closed", "Closed");
                }
                s.status = GrantStatus::Closed;
            }
            EventPayload::GrantPeriodEnded { .. } | EventPayload::GrantClaimsDeadlinePassed { .. } => {
                // Memo events; they gate command-level business rules but do
                // not themselves change bucket or status shape.
            }
            EventPayload::GrantFundsEncumbered { grant_id, bucket, amount, .. } => {
                let s = state.as_mut().expect("grant projection exists before encumbrance");
                let b = s.buckets.get_mut(bucket).ok_or_else(|| GrantError::InvalidField {
                    field: "bucket",
                    reason: format!("unknown bucket {bucket} on grant {grant_id}"),
                })?;
                b.available = b.available.checked_sub(amount);
                b.encumbered = b.encumbered.checked_add(amount);
                check_bucket_balance(*grant_id, b)?;
            }
            EventPayload::GrantFundsReleased { grant_id, bucket, amount, .. } => {
                let s = state.as_mut().expect("grant projection exists before release");
                let b = s.buckets.get_mut(bucket).ok_or_else(|| GrantError::InvalidField {
                    field: "bucket",
                    reason: format!("unknown bucket {bucket} on grant {grant_id}"),
                })?;
                b.encumbered = b.encumbered.checked_sub(amount);
                b.available = b.available.checked_add(amount);
                b.released = b.released.checked_add(amount);
                check_bucket_balance(*grant_id, b)?;
            }
            EventPayload::GrantFundsLiquidated { grant_id, bucket, amount, .. } => {
                let s = state.as_mut().expect("grant projection exists before liquidation");
                let b = s.buckets.get_mut(bucket).ok_or_else(|| GrantError::InvalidField {
                    field: "bucket",
                    reason: format!("unknown bucket {bucket} on grant {grant_id}"),
                })?;
                b.encumbered = b.encumbered.checked_sub(amount);
                b.liquidated = b.liquidated.checked_add(amount);
                check_bucket_balance(*grant_id, b)?;
            }
            EventPayload::MatchingFundsReported { bucket, amount, .. } => {
                let s = state.as_mut().expect("grant projection exists before matching report");
                if let Some(b) = s.buckets.get_mut(bucket) {
                    b.matching_funds_reported = b.matching_funds_reported.checked_add(amount);
                }
            }
            EventPayload::LirpMustHonorEnforced { .. } => {}
            _ => {}
        }
    }
    Ok(state)
}

fn check_bucket_balance(grant_id: grant_core::ids::GrantId, bucket: &GrantBucket) -> Result<(), GrantError> {
    if !bucket.balances() {
        return Err(GrantError::BalanceInvariantViolated {
            grant_id: grant_id.inner(),
            bucket: bucket.bucket.clone(),
            available: bucket.available.clone(),
            encumbered: bucket.encumbered.clone(),
            liquidated: bucket.liquidated.clone(),
            awarded: bucket.awarded.clone(),
        });
    }
    Ok(())
}

// ── Voucher ──────────────────────────────────────────────────────────────────

pub fn fold_voucher(events: &[Event]) -> Result<Option<VoucherState>, GrantError> {
    let mut state: Option<VoucherState> = None;
    for event in events {
        match &event.payload {
            EventPayload::VoucherIssuedTentative {
                voucher_id, grant_id, bucket, clinic_id, max_reimbursement, is_lirp,
                valid_from, expires_at, tentative_expires_at,
            } => {
                state = Some(VoucherState {
                    voucher_id: *voucher_id,
                    grant_id: *grant_id,
                    bucket: bucket.clone(),
                    clinic_id: *clinic_id,
                    status: VoucherStatus::Tentative,
                    voucher_code: None,
                    max_reimbursement: max_reimbursement.clone(),
                    is_lirp: *is_lirp,
                    valid_from: *valid_from,
                    expires_at: *expires_at,
                    tentative_expires_at: Some(*tentative_expires_at),
                    claim_id: None,
                });
            }
            EventPayload::VoucherIssued {
                voucher_id, grant_id, bucket, clinic_id, max_reimbursement, is_lirp, valid_from, expires_at,
            } => {
                state = Some(VoucherState {
                    voucher_id: *voucher_id,
                    grant_id: *grant_id,
                    bucket: bucket.clone(),
                    clinic_id: *clinic_id,
                    status: VoucherStatus::Issued,
                    voucher_code: None,
                    max_reimbursement: max_reimbursement.clone(),
                    is_lirp: *is_lirp,
                    valid_from: *valid_from,
                    expires_at: *expires_at,
                    tentative_expires_at: None,
                    claim_id: None,
                });
            }
            EventPayload::VoucherIssuedConfirmed { voucher_id } => {
                transition_voucher(&mut state, *voucher_id, VoucherStatus::Issued)?;
                if let Some(s) = state.as_mut() {
                    s.tentative_expires_at = None;
                }
            }
            EventPayload::VoucherIssuedRejected { voucher_id, .. } => {
                transition_voucher(&mut state, *voucher_id, VoucherStatus::Voided)?;
            }
            EventPayload::VoucherRedeemed { voucher_id, claim_id } => {
                transition_voucher(&mut state, *voucher_id, VoucherStatus::Redeemed)?;
                if let Some(s) = state.as_mut() {
                    s.claim_id = Some(*claim_id);
                }
            }
            EventPayload::VoucherExpired { voucher_id } => {
                transition_voucher(&mut state, *voucher_id, VoucherStatus::Expired)?;
            }
            EventPayload::VoucherVoided { voucher_id, .. } => {
                transition_voucher(&mut state, *voucher_id, VoucherStatus::Voided)?;
            }
            EventPayload::VoucherCodeAllocated { voucher_id, voucher_code, .. } => {
                if let Some(s) = state.as_mut() {
                    if s.voucher_id == *voucher_id {
                        s.voucher_code = Some(voucher_code.clone());
                    }
                }
            }
            _ => {}
        }
    }
    Ok(state)
}

fn transition_voucher(
    state: &mut Option<VoucherState>,
    voucher_id: grant_core::ids::VoucherId,
    next: VoucherStatus,
) -> Result<(), GrantError> {
    let s = state.as_mut().expect("voucher projection exists before transition");
    if !s.status.can_transition_to(next) {
        return illegal("Voucher", voucher_id.inner(), &format!("{:?}", s.status), &format!("{:?}", next));
    }
    s.status = next;
    Ok(())
}

// ── Allocator ──────────────────────────────────────────────────────────────

pub fn fold_allocator(events: &[Event]) -> Result<Option<AllocatorState>, GrantError> {
    let mut state: Option<AllocatorState> = None;
    for event in events {
        if let EventPayload::VoucherCodeAllocated { allocator_id, sequence, voucher_code, .. } = &event.payload {
            let s = state.get_or_insert_with(|| AllocatorState {
                allocator_id: *allocator_id,
                grant_cycle_id: event.grant_cycle_id,
                county_code: String::new(),
                next_sequence: 1,
                allocated_codes: Vec::new(),
            });
            s.next_sequence = sequence + 1;
            s.allocated_codes.push(voucher_code.clone());
        }
    }
    Ok(state)
}

// ── Claim ────────────────────────────────────────────────────────────────────

pub fn fold_claim(events: &[Event]) -> Result<Option<ClaimState>, GrantError> {
    let mut state: Option<ClaimState> = None;
    for event in events {
        match &event.payload {
            EventPayload::ClaimSubmitted {
                claim_id, voucher_id, clinic_id, grant_cycle_id, procedure_code,
                date_of_service, rabies_flag, charge_amount, co_pay, claim_fingerprint,
            } => {
                state = Some(ClaimState {
                    claim_id: *claim_id,
                    voucher_id: *voucher_id,
                    clinic_id: *clinic_id,
                    grant_cycle_id: *grant_cycle_id,
                    procedure_code: procedure_code.clone(),
                    date_of_service: *date_of_service,
                    rabies_flag: *rabies_flag,
                    charge_amount: charge_amount.clone(),
                    co_pay: co_pay.clone(),
                    claim_fingerprint: claim_fingerprint.clone(),
                    status: ClaimStatus::Submitted,
                    approved_amount: None,
                    approved_event_id: None,
                    approved_at: None,
                    decision_basis: None,
                    invoice_id: None,
                });
            }
            EventPayload::ClaimApproved { claim_id, approved_amount, decision_basis } => {
                let s = state.as_mut().expect("claim projection exists before approval");
                if s.status.is_terminal_decision() {
                    return illegal("Claim", claim_id.inner(), &format!("{:?}", s.status), "Approved");
                }
                s.status = ClaimStatus::Approved;
                s.approved_amount = Some(approved_amount.clone());
                s.approved_event_id = Some(event.event_id.inner());
                s.approved_at = Some(event.ingested_at);
                s.decision_basis = Some(decision_basis.clone());
            }
            EventPayload::ClaimDenied { claim_id, decision_basis } => {
                let s = state.as_mut().expect("claim projection exists before denial");
                if s.status.is_terminal_decision() {
                    return illegal("Claim", claim_id.inner(), &format!("{:?}", s.status), "Denied");
                }
                s.status = ClaimStatus::Denied;
                s.decision_basis = Some(decision_basis.clone());
            }
            EventPayload::ClaimAdjusted { new_approved_amount, decision_basis, .. } => {
                let s = state.as_mut().expect("claim projection exists before adjustment");
                // ADJUSTED carries a new approved amount but lands back on APPROVED
                // so the claim remains eligible for monthly invoice selection.
                s.status = ClaimStatus::Approved;
                s.approved_amount = Some(new_approved_amount.clone());
                s.decision_basis = Some(decision_basis.clone());
            }
            EventPayload::ClaimInvoiced { invoice_id, .. } => {
                let s = state.as_mut().expect("claim projection exists before invoicing");
                s.status = ClaimStatus::Invoiced;
                s.invoice_id = Some(*invoice_id);
            }
            EventPayload::ClaimDecisionConflictRecorded { .. } => {}
            _ => {}
        }
    }
    Ok(state)
}

// ── Invoice ──────────────────────────────────────────────────────────────────

pub fn fold_invoice(events: &[Event]) -> Result<Option<InvoiceState>, GrantError> {
    let mut state: Option<InvoiceState> = None;
    for event in events {
        match &event.payload {
            EventPayload::InvoiceGenerated {
                invoice_id, clinic_id, grant_cycle_id, year, month, claim_ids, adjustment_ids, total,
            } => {
                state = Some(InvoiceState {
                    invoice_id: *invoice_id,
                    clinic_id: *clinic_id,
                    grant_cycle_id: *grant_cycle_id,
                    year: *year,
                    month: *month,
                    lifecycle: InvoiceLifecycle::Draft,
                    claim_ids: claim_ids.clone(),
                    adjustment_ids: adjustment_ids.clone(),
                    total: total.clone(),
                });
            }
            EventPayload::InvoiceSubmitted { invoice_id } => {
                let s = state.as_mut().expect("invoice projection exists before submission");
                if s.lifecycle != InvoiceLifecycle::Draft {
                    return illegal("Invoice", invoice_id.inner(), "non-Draft", "Submitted");
                }
                s.lifecycle = InvoiceLifecycle::Submitted;
            }
            _ => {}
        }
    }
    Ok(state)
}

// ── Adjustment ───────────────────────────────────────────────────────────────

pub fn fold_adjustment(events: &[Event]) -> Result<Option<AdjustmentState>, GrantError> {
    let mut state: Option<AdjustmentState> = None;
    for event in events {
        match &event.payload {
            EventPayload::InvoiceAdjustmentCreated { adjustment_id, source_invoice_id, clinic_id, amount, reason } => {
                state = Some(AdjustmentState {
                    adjustment_id: *adjustment_id,
                    source_invoice_id: *source_invoice_id,
                    grant_cycle_id: event.grant_cycle_id,
                    clinic_id: *clinic_id,
                    amount: amount.clone(),
                    reason: reason.clone(),
                    applied_to_invoice_id: None,
                });
            }
            EventPayload::InvoiceAdjustmentApplied { target_invoice_id, .. } => {
                let s = state.as_mut().expect("adjustment projection exists before application");
                s.applied_to_invoice_id = Some(*target_invoice_id);
            }
            _ => {}
        }
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use grant_core::event::{BucketInit, DecisionBasis, TraceMeta};
    use grant_core::ids::{GrantCycleId, GrantId};
    use grant_core::Money;
    use uuid::Uuid;

    use super::*;

    fn wrap(grant_cycle_id: GrantCycleId, aggregate_id: Uuid, payload: EventPayload) -> Event {
        Event {
            event_id: grant_core::ids::EventId::new(Uuid::new_v4()),
            aggregate_id,
            grant_cycle_id,
            payload,
            occurred_at: Utc::now(),
            ingested_at: Utc::now(),
            trace: TraceMeta {
                correlation_id: Uuid::new_v4(),
                causation_id: None,
                actor_id: Uuid::new_v4(),
                actor_type: "test".into(),
            },
        }
    }

    #[test]
    fn grant_fold_tracks_encumbrance_and_balances() {
        let cycle = GrantCycleId::new(Uuid::new_v4());
        let grant_id = GrantId::new(Uuid::new_v4());
        let voucher_id = grant_core::ids::VoucherId::new(Uuid::new_v4());
        let events = vec![
            wrap(cycle, grant_id.inner(), EventPayload::GrantCreated {
                grant_id,
                grant_cycle_id: cycle,
                buckets: vec![BucketInit {
                    bucket: "GENERAL".into(),
                    awarded: Money::from_cents(1_000_000),
                    rate_numerator_cents: 1,
                    rate_denominator_cents: 1,
                }],
            }),
            wrap(cycle, grant_id.inner(), EventPayload::GrantFundsEncumbered {
                grant_id,
                bucket: "GENERAL".into(),
                amount: Money::from_cents(50_000),
                voucher_id,
            }),
        ];
        let state = fold_grant(&events).unwrap().unwrap();
        let bucket = state.bucket("GENERAL").unwrap();
        assert_eq!(bucket.encumbered, Money::from_cents(50_000));
        assert_eq!(bucket.available, Money::from_cents(950_000));
        assert!(bucket.balances());
    }

    #[test]
    fn voucher_fold_rejects_illegal_transition() {
        let cycle = GrantCycleId::new(Uuid::new_v4());
        let grant_id = GrantId::new(Uuid::new_v4());
        let voucher_id = grant_core::ids::VoucherId::new(Uuid::new_v4());
        let clinic = grant_core::ids::ClinicId::new(Uuid::new_v4());
        let now = Utc::now();
        let events = vec![
            wrap(cycle, voucher_id.inner(), EventPayload::VoucherIssued {
                voucher_id, grant_id, bucket: "GENERAL".into(), clinic_id: clinic,
                max_reimbursement: Money::from_cents(10_000), is_lirp: false,
                valid_from: now, expires_at: now,
            }),
            wrap(cycle, voucher_id.inner(), EventPayload::VoucherRedeemed {
                voucher_id, claim_id: grant_core::ids::ClaimId::new(Uuid::new_v4()),
            }),
            wrap(cycle, voucher_id.inner(), EventPayload::VoucherExpired { voucher_id }),
        ];
        let err = fold_voucher(&events).unwrap_err();
        assert!(matches!(err, GrantError::IllegalTransition { .. }));
    }

    #[test]
    fn claim_fold_captures_approval_metadata() {
        let cycle = GrantCycleId::new(Uuid::new_v4());
        let claim_id = grant_core::ids::ClaimId::new(Uuid::new_v4());
        let voucher_id = grant_core::ids::VoucherId::new(Uuid::new_v4());
        let clinic = grant_core::ids::ClinicId::new(Uuid::new_v4());
        let now = Utc::now();
        let events = vec![
            wrap(cycle, claim_id.inner(), EventPayload::ClaimSubmitted {
                claim_id, voucher_id, clinic_id: clinic, grant_cycle_id: cycle,
                procedure_code: "SN-DOG".into(), date_of_service: now, rabies_flag: false,
                charge_amount: Money::from_cents(10_000), co_pay: Money::zero(),
                claim_fingerprint: "abc".into(),
            }),
            wrap(cycle, claim_id.inner(), EventPayload::ClaimApproved {
                claim_id,
                approved_amount: Money::from_cents(8_000),
                decision_basis: DecisionBasis {
                    policy_snapshot_id: Uuid::new_v4(),
                    decided_by: Uuid::new_v4(),
                    decided_at: now,
                    reason: None,
                },
            }),
        ];
        let state = fold_claim(&events).unwrap().unwrap();
        assert_eq!(state.status, ClaimStatus::Approved);
        assert!(state.approved_event_id.is_some());
        assert_eq!(state.approved_amount, Some(Money::from_cents(8_000)));
    }
}
