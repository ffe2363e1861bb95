//! Idempotency cache.
//!
//! Every command carries a caller-supplied idempotency key. Before doing
//! any work, the engine reserves the key: `NEW` if unseen, `PROCESSING`
//! while a handler is mid-flight, `COMPLETED` with the cached result once
//! it finishes, or `FAILED` if the handler returned an error — a `FAILED`
//! reservation may be retried, unlike `COMPLETED`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use grant_core::constants::IDEMPOTENCY_TTL_SECS;
use grant_core::error::GrantError;

use crate::db::GrantDb;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyState {
    Processing,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub state: IdempotencyState,
    pub operation: String,
    pub request_hash: String,
    pub reserved_at: DateTime<Utc>,
    /// The bincode-serialized command outcome, populated once `Completed`.
    pub result: Option<Vec<u8>>,
}

/// What the caller should do having presented `(key, op, requestHash)`.
pub enum ReservationOutcome {
    /// Freshly reserved; proceed with the command.
    Reserved,
    /// Another caller is mid-flight with the same key; caller should wait
    /// and retry, not restart the command.
    InProgress,
    /// A prior call with this key already completed; the bincode-encoded
    /// result is the one to return, unchanged.
    AlreadyCompleted(Vec<u8>),
}

/// Reserve `key` for `(operation, request_hash)`. A stale `Processing`
/// reservation (older than the TTL) is treated as abandoned and retried.
/// A mismatched `operation`/`request_hash` on an existing key is a
/// validation error — the caller is reusing a key for a different request.
pub fn check_and_reserve(
    db: &GrantDb,
    key: &str,
    operation: &str,
    request_hash: &str,
    now: DateTime<Utc>,
) -> Result<ReservationOutcome, GrantError> {
    loop {
        let existing = db.get_idempotency(key)?;
        match &existing {
            None => {
                let new = IdempotencyRecord {
                    state: IdempotencyState::Processing,
                    operation: operation.to_string(),
                    request_hash: request_hash.to_string(),
                    reserved_at: now,
                    result: None,
                };
                if db.cas_idempotency(key, None, &new)? {
                    return Ok(ReservationOutcome::Reserved);
                }
                // Lost the race; loop and re-read.
            }
            Some(record) => {
                if record.operation != operation || record.request_hash != request_hash {
                    return Err(GrantError::InvalidField {
                        field: "idempotencyKey",
                        reason: "reused for a different operation or request body".into(),
                    });
                }
                match record.state {
                    IdempotencyState::Completed => {
                        return Ok(ReservationOutcome::AlreadyCompleted(
                            record.result.clone().unwrap_or_default(),
                        ));
                    }
                    IdempotencyState::Failed => {
                        let retry = IdempotencyRecord {
                            state: IdempotencyState::Processing,
                            operation: operation.to_string(),
                            request_hash: request_hash.to_string(),
                            reserved_at: now,
                            result: None,
                        };
                        if db.cas_idempotency(key, Some(record), &retry)? {
                            return Ok(ReservationOutcome::Reserved);
                        }
                    }
                    IdempotencyState::Processing => {
                        let age = now.signed_duration_since(record.reserved_at).num_seconds();
                        if age > IDEMPOTENCY_TTL_SECS {
                            let retry = IdempotencyRecord {
                                state: IdempotencyState::Processing,
                                operation: operation.to_string(),
                                request_hash: request_hash.to_string(),
                                reserved_at: now,
                                result: None,
                            };
                            if db.cas_idempotency(key, Some(record), &retry)? {
                                return Ok(ReservationOutcome::Reserved);
                            }
                        } else {
                            return Ok(ReservationOutcome::InProgress);
                        }
                    }
                }
            }
        }
    }
}

pub fn mark_completed(
    db: &GrantDb,
    key: &str,
    prior: &IdempotencyRecord,
    result: Vec<u8>,
) -> Result<(), GrantError> {
    let completed = IdempotencyRecord {
        state: IdempotencyState::Completed,
        result: Some(result),
        ..prior.clone()
    };
    if !db.cas_idempotency(key, Some(prior), &completed)? {
        return Err(GrantError::TransactionConflict);
    }
    Ok(())
}

pub fn mark_failed(db: &GrantDb, key: &str, prior: &IdempotencyRecord) -> Result<(), GrantError> {
    let failed = IdempotencyRecord {
        state: IdempotencyState::Failed,
        ..prior.clone()
    };
    if !db.cas_idempotency(key, Some(prior), &failed)? {
        return Err(GrantError::TransactionConflict);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_key_reserves_then_completes() {
        let dir = tempfile::tempdir().unwrap();
        let db = GrantDb::open(dir.path()).unwrap();
        let now = Utc::now();
        let outcome = check_and_reserve(&db, "k1", "CreateGrant", "hash1", now).unwrap();
        assert!(matches!(outcome, ReservationOutcome::Reserved));
        let record = db.get_idempotency("k1").unwrap().unwrap();
        mark_completed(&db, "k1", &record, b"ok".to_vec()).unwrap();
        let outcome2 = check_and_reserve(&db, "k1", "CreateGrant", "hash1", now).unwrap();
        assert!(matches!(outcome2, ReservationOutcome::AlreadyCompleted(ref r) if r == b"ok"));
    }

    #[test]
    fn failed_key_is_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let db = GrantDb::open(dir.path()).unwrap();
        let now = Utc::now();
        check_and_reserve(&db, "k2", "CreateGrant", "hash1", now).unwrap();
        let record = db.get_idempotency("k2").unwrap().unwrap();
        mark_failed(&db, "k2", &record).unwrap();
        let outcome = check_and_reserve(&db, "k2", "CreateGrant", "hash1", now).unwrap();
        assert!(matches!(outcome, ReservationOutcome::Reserved));
    }

    #[test]
    fn mismatched_request_body_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let db = GrantDb::open(dir.path()).unwrap();
        let now = Utc::now();
        check_and_reserve(&db, "k3", "CreateGrant", "hash1", now).unwrap();
        let err = check_and_reserve(&db, "k3", "CreateGrant", "hash2", now).unwrap_err();
        assert!(matches!(err, GrantError::InvalidField { .. }));
    }
}
