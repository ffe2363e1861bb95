//! Identity generation.
//!
//! Aggregate ids (`GrantId`, `VoucherId`, `ClaimId`, ...) are UUIDv4 — random,
//! with no embedded ordering. Event ids are UUIDv7 — time-sortable, server
//! generated, with a 12-bit intra-millisecond sequence counter so that two
//! events appended in the same millisecond still compare in append order.
//!
//! Event ids and aggregate ids are never interchangeable: an aggregate id
//! is never derived from a hash, and an event id is never used to identify
//! a Grant, Voucher, Claim, Invoice, Payment, or Adjustment.

use std::sync::Mutex;

use rand::RngCore;
use uuid::Uuid;

use crate::error::GrantError;

/// Generate a new random aggregate identifier (UUIDv4).
pub fn new_aggregate_id() -> Uuid {
    Uuid::new_v4()
}

/// Monotonic UUIDv7 generator for event ids.
///
/// Holds the millisecond of the last id issued and the 12-bit sequence
/// counter used within that millisecond. The counter's initial value per
/// tick is randomized (per RFC 9562 guidance) and incremented for each
/// subsequent id generated in the same millisecond; overflowing the 12 bits
/// within one millisecond is a hard error rather than silently wrapping
/// into a non-monotonic id.
pub struct EventIdSequencer {
    state: Mutex<SequencerState>,
}

struct SequencerState {
    last_millis: u64,
    last_seq: u16,
}

impl Default for EventIdSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventIdSequencer {
    pub fn new() -> Self {
        EventIdSequencer {
            state: Mutex::new(SequencerState {
                last_millis: 0,
                last_seq: 0,
            }),
        }
    }

    /// Generate the next event id using the current wall-clock time.
    pub fn next(&self) -> Result<Uuid, GrantError> {
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.next_at(millis)
    }

    /// Generate the next event id as of an explicit millisecond timestamp.
    /// Exposed separately so tests can exercise same-tick sequencing
    /// deterministically.
    pub fn next_at(&self, millis: u64) -> Result<Uuid, GrantError> {
        let mut state = self.state.lock().expect("sequencer mutex poisoned");
        let seq = if millis > state.last_millis {
            state.last_millis = millis;
            (rand::thread_rng().next_u32() as u16) & 0x0FFF
        } else {
            let next_seq = state.last_seq.checked_add(1).ok_or(GrantError::SequenceOverflow)?;
            if next_seq > 0x0FFF {
                return Err(GrantError::SequenceOverflow);
            }
            next_seq
        };
        state.last_seq = seq;
        Ok(build_uuid_v7(millis, seq))
    }
}

fn build_uuid_v7(millis: u64, seq: u16) -> Uuid {
    let mut bytes = [0u8; 16];
    let ms = millis.to_be_bytes();
    bytes[0..6].copy_from_slice(&ms[2..8]);

    bytes[6] = 0x70 | (((seq >> 8) & 0x0F) as u8);
    bytes[7] = (seq & 0xFF) as u8;

    let mut rand_b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut rand_b);
    bytes[8] = 0x80 | (rand_b[0] & 0x3F);
    bytes[9..16].copy_from_slice(&rand_b[1..8]);

    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_tick_ids_are_strictly_increasing() {
        let seq = EventIdSequencer::new();
        let a = seq.next_at(1_000).unwrap();
        let b = seq.next_at(1_000).unwrap();
        let c = seq.next_at(1_000).unwrap();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn new_tick_resets_and_still_increases() {
        let seq = EventIdSequencer::new();
        let a = seq.next_at(1_000).unwrap();
        let b = seq.next_at(1_001).unwrap();
        assert!(a < b);
    }

    #[test]
    fn sequence_overflow_is_a_hard_error() {
        let seq = EventIdSequencer {
            state: Mutex::new(SequencerState {
                last_millis: 5_000,
                last_seq: 0x0FFF,
            }),
        };
        assert!(matches!(seq.next_at(5_000), Err(GrantError::SequenceOverflow)));
    }

    #[test]
    fn version_and_variant_bits_are_set() {
        let seq = EventIdSequencer::new();
        let id = seq.next_at(42).unwrap();
        assert_eq!(id.get_version_num(), 7);
    }
}
