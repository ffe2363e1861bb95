//! grant-rpc
//!
//! JSON-RPC 2.0 facade over the grant engine.
//!
//! Namespace: "grant"
//! Methods:
//!   grant_createGrant             — open a new grant cycle with its buckets
//!   grant_signGrantAgreement      — transition Draft → Signed
//!   grant_activateGrant           — transition Signed → Active
//!   grant_suspendGrant            — transition Active → Suspended
//!   grant_reinstateGrant          — transition Suspended → Active
//!   grant_closeGrant              — terminal transition to Closed
//!   grant_reportMatchingFunds     — record a county's matching-funds report
//!   grant_issueVoucherOnline      — issue a voucher with an allocated code immediately
//!   grant_issueVoucherTentative   — reserve a voucher pending confirmation
//!   grant_confirmTentativeVoucher — confirm a reservation and allocate its code
//!   grant_rejectTentativeVoucher  — release an unconfirmed reservation
//!   grant_voidVoucher             — void an issued voucher
//!   grant_submitClaim             — submit a claim against a voucher
//!   grant_approveClaim            — record an approval decision
//!   grant_denyClaim               — record a denial decision
//!   grant_adjustClaim             — adjust a previously decided claim
//!   grant_generateMonthlyInvoices — run the monthly invoice batch for a cycle
//!   grant_submitInvoice           — lock an invoice for payment
//!   grant_recordPayment           — record a payment against an invoice
//!   grant_createAdjustment        — create a carry-forward adjustment
//!   grant_getGrant                — read a grant's current projection
//!   grant_getVoucher              — read a voucher's current projection
//!   grant_getClaim                — read a claim's current projection
//!   grant_getInvoice              — read an invoice plus its payments and derived status
//!   grant_getAdjustment           — read an adjustment's current projection
//!   grant_getVersion              — facade version info
//!
//! This crate is additive server plumbing over `grant_store::GrantEngine` —
//! it performs no business logic beyond request/response marshalling and
//! mapping `GrantError` to JSON-RPC error codes.

pub mod api;
pub mod server;
pub mod types;

pub use api::GrantApiServer;
pub use server::{RpcServer, RpcServerState};
pub use types::{RpcAdjustment, RpcClaim, RpcGrant, RpcInvoiceView, RpcTrace, RpcVersionInfo, RpcVoucher};
