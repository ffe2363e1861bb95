pub mod hash;

pub use hash::{allocator_id, claim_fingerprint, sha256_hash};
