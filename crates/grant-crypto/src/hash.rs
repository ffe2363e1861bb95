use sha2::{Digest, Sha256};
use uuid::Uuid;

use grant_core::ids::AllocatorId;

/// Compute SHA-256 of arbitrary bytes → 32-byte array.
pub fn sha256_hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// The claim fingerprint: SHA-256 over the business key
/// `voucherId + clinicId + procedureCode + dateOfService + rabiesFlag(0|1)`,
/// hex-encoded. Used only for de-duplication — never as an id.
pub fn claim_fingerprint(
    voucher_id: Uuid,
    clinic_id: Uuid,
    procedure_code: &str,
    date_of_service: &str,
    rabies_flag: bool,
) -> String {
    let mut input = Vec::new();
    input.extend_from_slice(voucher_id.as_bytes());
    input.extend_from_slice(clinic_id.as_bytes());
    input.extend_from_slice(procedure_code.as_bytes());
    input.extend_from_slice(date_of_service.as_bytes());
    input.push(if rabies_flag { 1 } else { 0 });
    hex::encode(sha256_hash(&input))
}

/// The deterministic allocator id for a `(grantCycleId, countyCode)` pair:
/// `SHA-256("VoucherCodeAllocator:" + grantCycleId + ":" + countyCode)`
/// formatted as a standard UUID. One allocator per (cycle, county).
pub fn allocator_id(grant_cycle_id: Uuid, county_code: &str) -> AllocatorId {
    let input = format!(
        "{}{}:{}",
        grant_core::constants::ALLOCATOR_ID_NAMESPACE,
        grant_cycle_id,
        county_code
    );
    let hash = sha256_hash(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[0..16]);
    AllocatorId::new(Uuid::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let v = Uuid::new_v4();
        let c = Uuid::new_v4();
        let a = claim_fingerprint(v, c, "SN-DOG", "2026-02-10", false);
        let b = claim_fingerprint(v, c, "SN-DOG", "2026-02-10", false);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_rabies_flag() {
        let v = Uuid::new_v4();
        let c = Uuid::new_v4();
        let a = claim_fingerprint(v, c, "SN-DOG", "2026-02-10", false);
        let b = claim_fingerprint(v, c, "SN-DOG", "2026-02-10", true);
        assert_ne!(a, b);
    }

    #[test]
    fn allocator_id_is_stable_per_cycle_and_county() {
        let cycle = Uuid::new_v4();
        let a1 = allocator_id(cycle, "ALAMEDA");
        let a2 = allocator_id(cycle, "ALAMEDA");
        let a3 = allocator_id(cycle, "FRESNO");
        assert_eq!(a1, a2);
        assert_ne!(a1, a3);
    }
}
