//! ─── Grant Engine Constants ─────────────────────────────────────────────────
//!
//! The book of record for a state-administered spay/neuter voucher program:
//! grants are awarded, encumbered into vouchers, redeemed as claims, rolled
//! into monthly invoices, and paid.

// ── Idempotency ──────────────────────────────────────────────────────────────

/// Default TTL for an idempotency reservation before it is considered stale.
pub const IDEMPOTENCY_TTL_SECS: i64 = 24 * 3600;

// ── Event log ─────────────────────────────────────────────────────────────────

/// Event type names must match `^[A-Z][A-Z0-9_]+$`.
pub const EVENT_TYPE_REGEX: &str = "^[A-Z][A-Z0-9_]+$";

/// Maximum events returned by a single `fetchSince` page.
pub const MAX_FETCH_PAGE: usize = 1_000;

// ── Grant buckets ─────────────────────────────────────────────────────────────

/// Bucket names recognized on a grant ledger.
pub const BUCKET_GENERAL: &str = "GENERAL";
pub const BUCKET_LIRP: &str = "LIRP";

// ── Tentative voucher sweep ───────────────────────────────────────────────────

/// Default interval between tentative-voucher sweep runs.
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Default tentative-reservation lifetime if a command does not set one.
pub const DEFAULT_TENTATIVE_HOLD_SECS: i64 = 15 * 60;

/// Fixed, well-known actor id used for all events emitted by the sweeper.
/// Never a free-form string — a stable UUID so sweep-originated events are
/// attributable without inventing an "actor" per run.
pub const SWEEP_SYSTEM_ACTOR_ID: &str = "00000000-0000-0000-0000-000000000001";

// ── Voucher code allocation ───────────────────────────────────────────────────

/// Namespace prefix hashed together with `grantCycleId` and `countyCode` to
/// derive a deterministic `AllocatorId`.
pub const ALLOCATOR_ID_NAMESPACE: &str = "VoucherCodeAllocator:";

// ── Claim validation ──────────────────────────────────────────────────────────

/// `rabiesFlag` is encoded as 0 or 1 in the claim fingerprint input, never a bool.
pub const RABIES_FLAG_TRUE: u8 = 1;
pub const RABIES_FLAG_FALSE: u8 = 0;
