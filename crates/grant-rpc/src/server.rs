use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use grant_core::error::GrantError;
use grant_core::event::TraceMeta;
use grant_core::ids::{AdjustmentId, ClaimId, GrantId, InvoiceId, VoucherId};
use grant_invoice::InvoiceQuery;
use grant_store::commands::{CommandEnvelope, CommandOutcome, CommandPayload};
use grant_store::GrantEngine;

use crate::api::GrantApiServer;
use crate::types::{
    AdjustClaimRequest, ConfirmTentativeVoucherRequest, CreateAdjustmentRequest, CreateGrantRequest,
    DecideClaimRequest, DecideClaimResponse, GenerateMonthlyInvoicesRequest, GrantIdRequest,
    InvoiceIdRequest, IssueVoucherOnlineRequest, IssueVoucherTentativeRequest, RecordPaymentRequest,
    RejectTentativeVoucherRequest, ReportMatchingFundsRequest, RpcAdjustment, RpcClaim, RpcGrant,
    RpcInvoiceView, RpcTrace, RpcVersionInfo, RpcVoucher, SubmitClaimRequest, SubmitClaimResponse,
    SuspendGrantRequest, VoidVoucherRequest, VoucherIssuedResponse,
};

/// Maps a `GrantError` to a JSON-RPC error code. The facade never invents
/// a parallel error taxonomy — it just buckets the existing one.
fn rpc_error(err: GrantError) -> ErrorObject<'static> {
    let code = match &err {
        GrantError::MissingTraceField { .. }
        | GrantError::InvalidEventType { .. }
        | GrantError::UnrecognizedEventType { .. }
        | GrantError::InvalidMoney { .. }
        | GrantError::InvalidField { .. } => -32602,

        GrantError::NotFound { .. } => -32001,

        GrantError::OperationInProgress { .. } | GrantError::TransactionConflict => -32002,

        GrantError::NotAuthorized { .. } => -32003,

        GrantError::InsufficientFunds { .. }
        | GrantError::LirpCopayForbidden { .. }
        | GrantError::VoucherExpired { .. }
        | GrantError::VoucherNotTentative { .. }
        | GrantError::GrantPeriodEnded { .. }
        | GrantError::ClaimDeadlinePassed { .. }
        | GrantError::DuplicateClaim { .. }
        | GrantError::ClinicNotActive { .. }
        | GrantError::GrantNotActive { .. }
        | GrantError::InvoiceLocked { .. }
        | GrantError::AdjustmentClinicMismatch { .. } => -32010,

        GrantError::BalanceInvariantViolated { .. }
        | GrantError::IllegalTransition { .. }
        | GrantError::NonMonotonicEventId { .. }
        | GrantError::SequenceOverflow
        | GrantError::EventLogImmutable { .. } => -32099,

        GrantError::Storage(_) | GrantError::Serialization(_) => -32603,
    };
    ErrorObject::owned(code, err.to_string(), None::<()>)
}

fn trace_meta(trace: &RpcTrace) -> TraceMeta {
    TraceMeta {
        correlation_id: trace.correlation_id.unwrap_or_else(Uuid::new_v4),
        causation_id: trace.causation_id,
        actor_id: trace.actor_id,
        actor_type: trace.actor_type.clone(),
    }
}

fn envelope(trace: &RpcTrace, payload: CommandPayload) -> CommandEnvelope {
    CommandEnvelope {
        command_id: Uuid::new_v4(),
        idempotency_key: trace.idempotency_key.clone(),
        trace: trace_meta(trace),
        payload,
    }
}

/// Shared state passed to the RPC server.
pub struct RpcServerState {
    pub engine: Arc<GrantEngine>,
}

/// The RPC server implementation.
pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers. Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "RPC server started");
        Ok(handle)
    }
}

#[async_trait]
impl GrantApiServer for RpcServer {
    // ── Grant lifecycle ────────────────────────────────────────────────────

    async fn create_grant(&self, req: CreateGrantRequest) -> RpcResult<()> {
        let cmd = envelope(
            &req.trace,
            CommandPayload::CreateGrant { grant_id: req.grant_id, grant_cycle_id: req.grant_cycle_id, buckets: req.buckets },
        );
        self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?;
        Ok(())
    }

    async fn sign_grant_agreement(&self, req: GrantIdRequest) -> RpcResult<()> {
        let cmd = envelope(&req.trace, CommandPayload::SignGrantAgreement { grant_id: req.grant_id });
        self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?;
        Ok(())
    }

    async fn activate_grant(&self, req: GrantIdRequest) -> RpcResult<()> {
        let cmd = envelope(&req.trace, CommandPayload::ActivateGrant { grant_id: req.grant_id });
        self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?;
        Ok(())
    }

    async fn suspend_grant(&self, req: SuspendGrantRequest) -> RpcResult<()> {
        let cmd = envelope(&req.trace, CommandPayload::SuspendGrant { grant_id: req.grant_id, reason: req.reason });
        self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?;
        Ok(())
    }

    async fn reinstate_grant(&self, req: GrantIdRequest) -> RpcResult<()> {
        let cmd = envelope(&req.trace, CommandPayload::ReinstateGrant { grant_id: req.grant_id });
        self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?;
        Ok(())
    }

    async fn close_grant(&self, req: GrantIdRequest) -> RpcResult<()> {
        let cmd = envelope(&req.trace, CommandPayload::CloseGrant { grant_id: req.grant_id });
        self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?;
        Ok(())
    }

    async fn report_matching_funds(&self, req: ReportMatchingFundsRequest) -> RpcResult<()> {
        let cmd = envelope(
            &req.trace,
            CommandPayload::ReportMatchingFunds { grant_id: req.grant_id, bucket: req.bucket, amount: req.amount },
        );
        self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?;
        Ok(())
    }

    // ── Voucher ────────────────────────────────────────────────────────────

    async fn issue_voucher_online(&self, req: IssueVoucherOnlineRequest) -> RpcResult<VoucherIssuedResponse> {
        let cmd = envelope(
            &req.trace,
            CommandPayload::IssueVoucherOnline {
                voucher_id: req.voucher_id,
                grant_id: req.grant_id,
                bucket: req.bucket,
                clinic_id: req.clinic_id,
                county_code: req.county_code,
                max_reimbursement: req.max_reimbursement,
                is_lirp: req.is_lirp,
                valid_from: req.valid_from,
                expires_at: req.expires_at,
            },
        );
        match self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)? {
            CommandOutcome::VoucherIssued { voucher_id, voucher_code } => Ok(VoucherIssuedResponse { voucher_id, voucher_code }),
            other => Err(unexpected_outcome(other)),
        }
    }

    async fn issue_voucher_tentative(&self, req: IssueVoucherTentativeRequest) -> RpcResult<VoucherIssuedResponse> {
        let cmd = envelope(
            &req.trace,
            CommandPayload::IssueVoucherTentative {
                voucher_id: req.voucher_id,
                grant_id: req.grant_id,
                bucket: req.bucket,
                clinic_id: req.clinic_id,
                max_reimbursement: req.max_reimbursement,
                is_lirp: req.is_lirp,
                valid_from: req.valid_from,
                expires_at: req.expires_at,
                tentative_hold_secs: req.tentative_hold_secs,
            },
        );
        match self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)? {
            CommandOutcome::VoucherIssued { voucher_id, voucher_code } => Ok(VoucherIssuedResponse { voucher_id, voucher_code }),
            other => Err(unexpected_outcome(other)),
        }
    }

    async fn confirm_tentative_voucher(&self, req: ConfirmTentativeVoucherRequest) -> RpcResult<VoucherIssuedResponse> {
        let cmd = envelope(
            &req.trace,
            CommandPayload::ConfirmTentativeVoucher { voucher_id: req.voucher_id, county_code: req.county_code },
        );
        match self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)? {
            CommandOutcome::VoucherIssued { voucher_id, voucher_code } => Ok(VoucherIssuedResponse { voucher_id, voucher_code }),
            other => Err(unexpected_outcome(other)),
        }
    }

    async fn reject_tentative_voucher(&self, req: RejectTentativeVoucherRequest) -> RpcResult<()> {
        let cmd = envelope(
            &req.trace,
            CommandPayload::RejectTentativeVoucher { voucher_id: req.voucher_id, reason: req.reason },
        );
        self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?;
        Ok(())
    }

    async fn void_voucher(&self, req: VoidVoucherRequest) -> RpcResult<()> {
        let cmd = envelope(&req.trace, CommandPayload::VoidVoucher { voucher_id: req.voucher_id, reason: req.reason });
        self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?;
        Ok(())
    }

    // ── Claim ──────────────────────────────────────────────────────────────

    async fn submit_claim(&self, req: SubmitClaimRequest) -> RpcResult<SubmitClaimResponse> {
        let fallback_claim_id = req.claim_id;
        let cmd = envelope(
            &req.trace,
            CommandPayload::SubmitClaim {
                claim_id: req.claim_id,
                voucher_id: req.voucher_id,
                procedure_code: req.procedure_code,
                date_of_service: req.date_of_service,
                rabies_flag: req.rabies_flag,
                charge_amount: req.charge_amount,
                co_pay: req.co_pay,
                grant_period_start: req.grant_period_start,
                grant_period_end: req.grant_period_end,
                claim_submission_deadline: req.claim_submission_deadline,
            },
        );
        match self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)? {
            CommandOutcome::ClaimSubmitted { claim_id } => Ok(SubmitClaimResponse { claim_id, duplicate_of: None }),
            CommandOutcome::ClaimDuplicateDetected { existing_claim_id } => {
                Ok(SubmitClaimResponse { claim_id: fallback_claim_id, duplicate_of: Some(existing_claim_id) })
            }
            other => Err(unexpected_outcome(other)),
        }
    }

    async fn approve_claim(&self, req: DecideClaimRequest) -> RpcResult<DecideClaimResponse> {
        let cmd = envelope(
            &req.trace,
            CommandPayload::ApproveClaim {
                claim_id: req.claim_id,
                decided_by: req.decided_by,
                policy_snapshot_id: req.policy_snapshot_id,
                reason: req.reason,
            },
        );
        decide_claim_outcome(self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?)
    }

    async fn deny_claim(&self, req: DecideClaimRequest) -> RpcResult<DecideClaimResponse> {
        let cmd = envelope(
            &req.trace,
            CommandPayload::DenyClaim {
                claim_id: req.claim_id,
                decided_by: req.decided_by,
                policy_snapshot_id: req.policy_snapshot_id,
                reason: req.reason,
            },
        );
        decide_claim_outcome(self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?)
    }

    async fn adjust_claim(&self, req: AdjustClaimRequest) -> RpcResult<()> {
        let cmd = envelope(
            &req.trace,
            CommandPayload::AdjustClaim {
                claim_id: req.claim_id,
                new_approved_amount: req.new_approved_amount,
                decided_by: req.decided_by,
                policy_snapshot_id: req.policy_snapshot_id,
                reason: req.reason,
            },
        );
        self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?;
        Ok(())
    }

    // ── Invoice / payment / adjustment ───────────────────────────────────────

    async fn generate_monthly_invoices(&self, req: GenerateMonthlyInvoicesRequest) -> RpcResult<Vec<InvoiceId>> {
        let cmd = envelope(
            &req.trace,
            CommandPayload::GenerateMonthlyInvoices {
                grant_cycle_id: req.grant_cycle_id,
                year: req.year,
                month: req.month,
                watermark_ingested_at: req.watermark_ingested_at,
                watermark_event_id: req.watermark_event_id,
                clinic_ids: req.clinic_ids,
            },
        );
        match self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)? {
            CommandOutcome::InvoicesGenerated { invoice_ids } => Ok(invoice_ids),
            other => Err(unexpected_outcome(other)),
        }
    }

    async fn submit_invoice(&self, req: InvoiceIdRequest) -> RpcResult<()> {
        let cmd = envelope(&req.trace, CommandPayload::SubmitInvoice { invoice_id: req.invoice_id });
        self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?;
        Ok(())
    }

    async fn record_payment(&self, req: RecordPaymentRequest) -> RpcResult<()> {
        let cmd = envelope(
            &req.trace,
            CommandPayload::RecordPayment {
                payment_id: req.payment_id,
                invoice_id: req.invoice_id,
                amount: req.amount,
                channel: req.channel,
                reference: req.reference,
            },
        );
        self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)?;
        Ok(())
    }

    async fn create_adjustment(&self, req: CreateAdjustmentRequest) -> RpcResult<AdjustmentId> {
        let cmd = envelope(
            &req.trace,
            CommandPayload::CreateAdjustment {
                adjustment_id: req.adjustment_id,
                source_invoice_id: req.source_invoice_id,
                clinic_id: req.clinic_id,
                amount: req.amount,
                reason: req.reason,
            },
        );
        match self.state.engine.execute(&cmd, Utc::now()).map_err(rpc_error)? {
            CommandOutcome::AdjustmentCreated { adjustment_id } => Ok(adjustment_id),
            other => Err(unexpected_outcome(other)),
        }
    }

    // ── Queries ────────────────────────────────────────────────────────────

    async fn get_grant(&self, grant_id: GrantId) -> RpcResult<Option<RpcGrant>> {
        self.state.engine.db().get_grant(&grant_id).map_err(rpc_error)
    }

    async fn get_voucher(&self, voucher_id: VoucherId) -> RpcResult<Option<RpcVoucher>> {
        self.state.engine.db().get_voucher(&voucher_id).map_err(rpc_error)
    }

    async fn get_claim(&self, claim_id: ClaimId) -> RpcResult<Option<RpcClaim>> {
        self.state.engine.db().get_claim(&claim_id).map_err(rpc_error)
    }

    async fn get_invoice(&self, invoice_id: InvoiceId) -> RpcResult<Option<RpcInvoiceView>> {
        let query = InvoiceQuery::new(self.state.engine.db());
        let Some(invoice) = query.get(invoice_id).map_err(rpc_error)? else { return Ok(None) };
        let payments = query.payments(invoice_id).map_err(rpc_error)?;
        let payment_status = query.payment_status(invoice_id).map_err(rpc_error)?;
        Ok(Some(RpcInvoiceView { invoice, payments, payment_status }))
    }

    async fn get_adjustment(&self, adjustment_id: AdjustmentId) -> RpcResult<Option<RpcAdjustment>> {
        self.state.engine.db().get_adjustment(&adjustment_id).map_err(rpc_error)
    }

    async fn get_version(&self) -> RpcResult<RpcVersionInfo> {
        Ok(RpcVersionInfo::current())
    }
}

fn decide_claim_outcome(outcome: CommandOutcome) -> RpcResult<DecideClaimResponse> {
    match outcome {
        CommandOutcome::ClaimDecided { claim_id } => Ok(DecideClaimResponse { claim_id, conflict: false }),
        CommandOutcome::ClaimDecisionConflict { claim_id } => Ok(DecideClaimResponse { claim_id, conflict: true }),
        other => Err(unexpected_outcome(other)),
    }
}

fn unexpected_outcome(outcome: CommandOutcome) -> ErrorObject<'static> {
    ErrorObject::owned(-32603, format!("unexpected command outcome: {outcome:?}"), None::<()>)
}
