pub mod commands;
pub mod db;
pub mod engine;
pub mod idempotency;
pub mod locks;
pub mod reducers;

pub use commands::{allocator_for, CommandEnvelope, CommandOutcome, CommandPayload};
pub use db::GrantDb;
pub use engine::GrantEngine;
