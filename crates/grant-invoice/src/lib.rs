//! grant-invoice
//!
//! High-level query and scheduling layer for monthly invoice generation.
//! The actual claim selection, event emission, and projection writes live
//! in `grant_store::GrantEngine::execute`, which is the only place that is
//! allowed to touch the canonical lock order. This crate computes *when*
//! and *for what period* a run should fire, and provides read-side queries
//! over invoices and payments once they exist.

pub mod period;
pub mod query;

pub use period::{previous_month, MonthlyRunWindow};
pub use query::InvoiceQuery;
