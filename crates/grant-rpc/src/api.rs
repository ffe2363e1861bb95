use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use grant_core::ids::{AdjustmentId, ClaimId, GrantId, InvoiceId, VoucherId};

use crate::types::{
    AdjustClaimRequest, ConfirmTentativeVoucherRequest, CreateAdjustmentRequest, CreateGrantRequest,
    DecideClaimRequest, DecideClaimResponse, GenerateMonthlyInvoicesRequest, GrantIdRequest,
    InvoiceIdRequest, IssueVoucherOnlineRequest, IssueVoucherTentativeRequest, RecordPaymentRequest,
    RejectTentativeVoucherRequest, ReportMatchingFundsRequest, RpcAdjustment, RpcClaim, RpcGrant,
    RpcInvoiceView, RpcVersionInfo, RpcVoucher, SubmitClaimRequest, SubmitClaimResponse,
    SuspendGrantRequest, VoidVoucherRequest, VoucherIssuedResponse,
};

/// The grant engine's kernel API surface, exposed as JSON-RPC 2.0.
///
/// Every mutating method marshals its request into a `CommandEnvelope` and
/// hands it to `GrantEngine::execute` — this trait carries no business
/// logic of its own, only request/response shape and error-code mapping.
#[rpc(server, namespace = "grant")]
pub trait GrantApi {
    // ── Grant lifecycle ────────────────────────────────────────────────────

    #[method(name = "createGrant")]
    async fn create_grant(&self, req: CreateGrantRequest) -> RpcResult<()>;

    #[method(name = "signGrantAgreement")]
    async fn sign_grant_agreement(&self, req: GrantIdRequest) -> RpcResult<()>;

    #[method(name = "activateGrant")]
    async fn activate_grant(&self, req: GrantIdRequest) -> RpcResult<()>;

    #[method(name = "suspendGrant")]
    async fn suspend_grant(&self, req: SuspendGrantRequest) -> RpcResult<()>;

    #[method(name = "reinstateGrant")]
    async fn reinstate_grant(&self, req: GrantIdRequest) -> RpcResult<()>;

    #[method(name = "closeGrant")]
    async fn close_grant(&self, req: GrantIdRequest) -> RpcResult<()>;

    #[method(name = "reportMatchingFunds")]
    async fn report_matching_funds(&self, req: ReportMatchingFundsRequest) -> RpcResult<()>;

    // ── Voucher ────────────────────────────────────────────────────────────

    #[method(name = "issueVoucherOnline")]
    async fn issue_voucher_online(&self, req: IssueVoucherOnlineRequest) -> RpcResult<VoucherIssuedResponse>;

    #[method(name = "issueVoucherTentative")]
    async fn issue_voucher_tentative(&self, req: IssueVoucherTentativeRequest) -> RpcResult<VoucherIssuedResponse>;

    #[method(name = "confirmTentativeVoucher")]
    async fn confirm_tentative_voucher(&self, req: ConfirmTentativeVoucherRequest) -> RpcResult<VoucherIssuedResponse>;

    #[method(name = "rejectTentativeVoucher")]
    async fn reject_tentative_voucher(&self, req: RejectTentativeVoucherRequest) -> RpcResult<()>;

    #[method(name = "voidVoucher")]
    async fn void_voucher(&self, req: VoidVoucherRequest) -> RpcResult<()>;

    // ── Claim ──────────────────────────────────────────────────────────────

    #[method(name = "submitClaim")]
    async fn submit_claim(&self, req: SubmitClaimRequest) -> RpcResult<SubmitClaimResponse>;

    #[method(name = "approveClaim")]
    async fn approve_claim(&self, req: DecideClaimRequest) -> RpcResult<DecideClaimResponse>;

    #[method(name = "denyClaim")]
    async fn deny_claim(&self, req: DecideClaimRequest) -> RpcResult<DecideClaimResponse>;

    #[method(name = "adjustClaim")]
    async fn adjust_claim(&self, req: AdjustClaimRequest) -> RpcResult<()>;

    // ── Invoice / payment / adjustment ───────────────────────────────────────

    #[method(name = "generateMonthlyInvoices")]
    async fn generate_monthly_invoices(&self, req: GenerateMonthlyInvoicesRequest) -> RpcResult<Vec<InvoiceId>>;

    #[method(name = "submitInvoice")]
    async fn submit_invoice(&self, req: InvoiceIdRequest) -> RpcResult<()>;

    #[method(name = "recordPayment")]
    async fn record_payment(&self, req: RecordPaymentRequest) -> RpcResult<()>;

    #[method(name = "createAdjustment")]
    async fn create_adjustment(&self, req: CreateAdjustmentRequest) -> RpcResult<AdjustmentId>;

    // ── Queries ────────────────────────────────────────────────────────────

    #[method(name = "getGrant")]
    async fn get_grant(&self, grant_id: GrantId) -> RpcResult<Option<RpcGrant>>;

    #[method(name = "getVoucher")]
    async fn get_voucher(&self, voucher_id: VoucherId) -> RpcResult<Option<RpcVoucher>>;

    #[method(name = "getClaim")]
    async fn get_claim(&self, claim_id: ClaimId) -> RpcResult<Option<RpcClaim>>;

    #[method(name = "getInvoice")]
    async fn get_invoice(&self, invoice_id: InvoiceId) -> RpcResult<Option<RpcInvoiceView>>;

    #[method(name = "getAdjustment")]
    async fn get_adjustment(&self, adjustment_id: AdjustmentId) -> RpcResult<Option<RpcAdjustment>>;

    #[method(name = "getVersion")]
    async fn get_version(&self) -> RpcResult<RpcVersionInfo>;
}
