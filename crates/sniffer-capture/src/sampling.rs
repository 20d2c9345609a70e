//! Deterministic per-connection sampling (spec.md §4.2, open question
//! resolved in SPEC_FULL.md §9): the sample/drop decision is made once, at
//! connection creation, and held for the connection's lifetime — never
//! re-rolled per segment, so a sampled connection's messages are never torn
//! across the sample boundary mid-stream.

use sniffer_core::model::ConnectionId;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// `true` iff the connection identified by `id` falls inside `sample_rate`
/// (0.0 = never, 1.0 = always). The hash is taken over the canonical,
/// direction-independent connection id, so sampling is also
/// direction-independent.
pub fn is_sampled(id: &ConnectionId, sample_rate: f64) -> bool {
    if sample_rate >= 1.0 {
        return true;
    }
    if sample_rate <= 0.0 {
        return false;
    }
    let hash = fnv1a_64(id.0.as_bytes());
    let threshold = (sample_rate * (u64::MAX as f64)) as u64;
    hash <= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_never_samples() {
        let id = ConnectionId("10.0.0.1:1|10.0.0.2:2".to_string());
        assert!(!is_sampled(&id, 0.0));
    }

    #[test]
    fn full_rate_always_samples() {
        let id = ConnectionId("10.0.0.1:1|10.0.0.2:2".to_string());
        assert!(is_sampled(&id, 1.0));
    }

    #[test]
    fn decision_is_stable_for_the_same_id() {
        let id = ConnectionId("10.0.0.1:1|10.0.0.2:2".to_string());
        let first = is_sampled(&id, 0.5);
        for _ in 0..10 {
            assert_eq!(is_sampled(&id, 0.5), first);
        }
    }

    #[test]
    fn roughly_half_of_many_ids_pass_at_half_rate() {
        let sampled = (0..2000)
            .filter(|i| {
                let id = ConnectionId(format!("10.0.0.1:{i}|10.0.0.2:9999"));
                is_sampled(&id, 0.5)
            })
            .count();
        assert!((700..1300).contains(&sampled), "got {sampled}/2000");
    }
}
