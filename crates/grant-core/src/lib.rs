pub mod constants;
pub mod domain;
pub mod error;
pub mod event;
pub mod identity;
pub mod ids;
pub mod money;

pub use domain::*;
pub use error::GrantError;
pub use event::{AggregateType, DecisionBasis, Event, EventPayload, TraceMeta};
pub use identity::{new_aggregate_id, EventIdSequencer};
pub use ids::*;
pub use money::Money;
