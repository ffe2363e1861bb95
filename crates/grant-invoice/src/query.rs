use grant_core::error::GrantError;
use grant_core::ids::InvoiceId;
use grant_core::{derive_payment_status, InvoiceState, Money, PaymentRecord, PaymentStatus};
use grant_store::GrantDb;

/// Read-side queries over invoices and the payments recorded against them.
pub struct InvoiceQuery<'a> {
    db: &'a GrantDb,
}

impl<'a> InvoiceQuery<'a> {
    pub fn new(db: &'a GrantDb) -> Self {
        InvoiceQuery { db }
    }

    pub fn get(&self, id: InvoiceId) -> Result<Option<InvoiceState>, GrantError> {
        self.db.get_invoice(&id)
    }

    pub fn payments(&self, id: InvoiceId) -> Result<Vec<PaymentRecord>, GrantError> {
        self.db.payments_for_invoice(id)
    }

    pub fn paid_total(&self, id: InvoiceId) -> Result<Money, GrantError> {
        let payments = self.payments(id)?;
        Ok(payments.iter().fold(Money::zero(), |acc, p| acc.checked_add(&p.amount)))
    }

    /// Derived payment status — never stored, always recomputed from the
    /// invoice lifecycle and the sum of its payments.
    pub fn payment_status(&self, id: InvoiceId) -> Result<PaymentStatus, GrantError> {
        let invoice = self
            .db
            .get_invoice(&id)?
            .ok_or(GrantError::NotFound { aggregate_type: "Invoice", aggregate_id: id.inner() })?;
        let paid = self.paid_total(id)?;
        Ok(derive_payment_status(&invoice, &paid))
    }

    /// Human-readable one-line summary, mainly for CLI/log output.
    pub fn describe(&self, id: InvoiceId) -> Result<String, GrantError> {
        let invoice = self
            .db
            .get_invoice(&id)?
            .ok_or(GrantError::NotFound { aggregate_type: "Invoice", aggregate_id: id.inner() })?;
        let status = self.payment_status(id)?;
        Ok(format!(
            "Invoice {} | clinic {} | {}-{:02} | {} claims, {} adjustments | total {} | {:?}",
            invoice.invoice_id,
            invoice.clinic_id,
            invoice.year,
            invoice.month,
            invoice.claim_ids.len(),
            invoice.adjustment_ids.len(),
            invoice.total,
            status,
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Datelike, Utc};
    use grant_core::constants::BUCKET_GENERAL;
    use grant_core::event::BucketInit;
    use grant_core::ids::{ClinicId, GrantCycleId, GrantId, VoucherId};
    use grant_store::commands::{CommandEnvelope, CommandPayload};
    use grant_store::{GrantDb, GrantEngine};
    use uuid::Uuid;

    use super::*;

    fn trace() -> grant_core::event::TraceMeta {
        grant_core::event::TraceMeta {
            correlation_id: Uuid::new_v4(),
            causation_id: None,
            actor_id: Uuid::new_v4(),
            actor_type: "TEST".into(),
        }
    }

    fn envelope(payload: CommandPayload) -> CommandEnvelope {
        CommandEnvelope { command_id: Uuid::new_v4(), idempotency_key: Uuid::new_v4().to_string(), trace: trace(), payload }
    }

    #[test]
    fn invoice_moves_from_submitted_to_partially_paid_to_paid() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(GrantDb::open(dir.path()).unwrap());
        let engine = GrantEngine::new(db.clone());
        let now = Utc::now();

        let grant_id = GrantId::new(Uuid::new_v4());
        let grant_cycle_id = GrantCycleId::new(Uuid::new_v4());
        engine
            .execute(
                &envelope(CommandPayload::CreateGrant {
                    grant_id,
                    grant_cycle_id,
                    buckets: vec![BucketInit {
                        bucket: BUCKET_GENERAL.to_string(),
                        awarded: Money::from_cents(1_000_000),
                        rate_numerator_cents: 1,
                        rate_denominator_cents: 1,
                    }],
                }),
                now,
            )
            .unwrap();
        engine.execute(&envelope(CommandPayload::SignGrantAgreement { grant_id }), now).unwrap();
        engine.execute(&envelope(CommandPayload::ActivateGrant { grant_id }), now).unwrap();

        let voucher_id = VoucherId::new(Uuid::new_v4());
        let clinic_id = ClinicId::new(Uuid::new_v4());
        engine
            .execute(
                &envelope(CommandPayload::IssueVoucherOnline {
                    voucher_id,
                    grant_id,
                    bucket: BUCKET_GENERAL.to_string(),
                    clinic_id,
                    county_code: "MERCED".to_string(),
                    max_reimbursement: Money::from_cents(15_000),
                    is_lirp: false,
                    valid_from: now,
                    expires_at: now + chrono::Duration::days(30),
                }),
                now,
            )
            .unwrap();
        let claim_id = grant_core::ids::ClaimId::new(Uuid::new_v4());
        engine
            .execute(
                &envelope(CommandPayload::SubmitClaim {
                    claim_id,
                    voucher_id,
                    procedure_code: "SN-DOG".to_string(),
                    date_of_service: now,
                    rabies_flag: false,
                    charge_amount: Money::from_cents(15_000),
                    co_pay: Money::zero(),
                    grant_period_start: now - chrono::Duration::days(1),
                    grant_period_end: now + chrono::Duration::days(60),
                    claim_submission_deadline: now + chrono::Duration::days(90),
                }),
                now,
            )
            .unwrap();
        engine
            .execute(
                &envelope(CommandPayload::ApproveClaim { claim_id, decided_by: Uuid::new_v4(), policy_snapshot_id: Uuid::new_v4(), reason: None }),
                now,
            )
            .unwrap();

        let window = crate::period::MonthlyRunWindow::for_month(now.year(), now.month(), now + chrono::Duration::minutes(1)).unwrap();
        let outcome = engine
            .execute(
                &envelope(CommandPayload::GenerateMonthlyInvoices {
                    grant_cycle_id,
                    year: window.year,
                    month: window.month,
                    watermark_ingested_at: window.watermark_ingested_at,
                    watermark_event_id: Uuid::max(),
                    clinic_ids: vec![clinic_id],
                }),
                now,
            )
            .unwrap();
        let invoice_id = match outcome {
            grant_store::commands::CommandOutcome::InvoicesGenerated { invoice_ids } => invoice_ids[0],
            other => panic!("unexpected outcome: {other:?}"),
        };

        let query = InvoiceQuery::new(&db);
        assert_eq!(query.payment_status(invoice_id).unwrap(), PaymentStatus::Draft);

        engine.execute(&envelope(CommandPayload::SubmitInvoice { invoice_id }), now).unwrap();
        assert_eq!(query.payment_status(invoice_id).unwrap(), PaymentStatus::Submitted);

        engine
            .execute(
                &envelope(CommandPayload::RecordPayment {
                    payment_id: Uuid::new_v4(),
                    invoice_id,
                    amount: Money::from_cents(10_000),
                    channel: "ACH".to_string(),
                    reference: "batch-1".to_string(),
                }),
                now,
            )
            .unwrap();
        assert_eq!(query.payment_status(invoice_id).unwrap(), PaymentStatus::PartiallyPaid);

        engine
            .execute(
                &envelope(CommandPayload::RecordPayment {
                    payment_id: Uuid::new_v4(),
                    invoice_id,
                    amount: Money::from_cents(5_000),
                    channel: "ACH".to_string(),
                    reference: "batch-2".to_string(),
                }),
                now,
            )
            .unwrap();
        assert_eq!(query.payment_status(invoice_id).unwrap(), PaymentStatus::Paid);
        assert_eq!(query.paid_total(invoice_id).unwrap(), Money::from_cents(15_000));
    }
}
