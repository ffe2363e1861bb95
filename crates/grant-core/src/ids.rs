//! Branded aggregate identifiers. Each id wraps a `Uuid` so that, say, a
//! `ClaimId` and a `VoucherId` are never accidentally interchangeable even
//! though both are UUIDs underneath.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_uuid {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                $name(id)
            }

            pub fn inner(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                $name(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

branded_uuid!(EventId);
branded_uuid!(GrantCycleId);
branded_uuid!(GrantId);
branded_uuid!(VoucherId);
branded_uuid!(AllocatorId);
branded_uuid!(ClaimId);
branded_uuid!(InvoiceId);
branded_uuid!(PaymentId);
branded_uuid!(AdjustmentId);
branded_uuid!(ClinicId);
branded_uuid!(ActorId);

/// The all-zero watermark UUID used as the start-of-log marker for
/// projection rebuilds (`fetchSince(ZERO, n)` returns the whole log).
pub fn zero_event_id() -> EventId {
    EventId(Uuid::nil())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_event_id_is_nil() {
        assert_eq!(zero_event_id().inner(), Uuid::nil());
    }

    #[test]
    fn distinct_brands_do_not_compare_equal_by_accident() {
        let raw = Uuid::new_v4();
        let voucher = VoucherId::new(raw);
        let claim = ClaimId::new(raw);
        // Different types entirely; this just checks the inner values still
        // round-trip independently of the brand.
        assert_eq!(voucher.inner(), claim.inner());
    }
}
