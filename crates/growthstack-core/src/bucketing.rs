use sha2::{Digest, Sha256};

use crate::experiment::ExperimentVariant;

/// Fold the sha256 of a user id into a u64.
///
/// A pure function of the id string alone (no time, no randomness), so the
/// same user lands in the same bucket across sessions and restarts. Not
/// suitable for adversarial contexts (users who know the scheme can craft
/// ids to pick their bucket); reproducibility is the requirement here, not
/// resistance to gaming.
pub fn hash_user_id(user_id: &str) -> u64 {
    let hash = Sha256::digest(user_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash[..8]);
    u64::from_be_bytes(prefix)
}

/// Reduce a user id to a bucket in `0..100`.
pub fn bucket_for(user_id: &str) -> u8 {
    (hash_user_id(user_id) % 100) as u8
}

/// Whether the bucket falls inside the experiment-level traffic allocation.
/// Buckets at or above the allocation percentage are excluded entirely.
pub fn included(bucket: u8, traffic_allocation: f64) -> bool {
    f64::from(bucket) < traffic_allocation
}

/// Standard cumulative-weight bucketing: walk variants in order, return the
/// first whose cumulative allocation exceeds the bucket.
pub fn pick_variant(variants: &[ExperimentVariant], bucket: u8) -> Option<&ExperimentVariant> {
    let mut cumulative = 0.0;
    for variant in variants {
        cumulative += variant.traffic_allocation;
        if f64::from(bucket) < cumulative {
            return Some(variant);
        }
    }
    // Float drift can leave the final cumulative a hair under 100.
    variants.last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn variants(allocations: &[(f64, bool)]) -> Vec<ExperimentVariant> {
        allocations
            .iter()
            .enumerate()
            .map(|(i, (allocation, is_control))| ExperimentVariant {
                id: format!("v{i}"),
                name: format!("variant-{i}"),
                traffic_allocation: *allocation,
                is_control: *is_control,
                config: Map::new(),
            })
            .collect()
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_user_id("user123"), hash_user_id("user123"));
        assert_eq!(bucket_for("user123"), bucket_for("user123"));
        assert_ne!(hash_user_id("user123"), hash_user_id("user124"));
    }

    #[test]
    fn buckets_stay_under_100() {
        for i in 0..500 {
            assert!(bucket_for(&format!("user-{i}")) < 100);
        }
    }

    #[test]
    fn zero_allocation_excludes_everyone() {
        for i in 0..100 {
            assert!(!included(bucket_for(&format!("user-{i}")), 0.0));
        }
    }

    #[test]
    fn full_allocation_includes_everyone() {
        for i in 0..100 {
            assert!(included(bucket_for(&format!("user-{i}")), 100.0));
        }
    }

    #[test]
    fn cumulative_walk_respects_boundaries() {
        let vs = variants(&[(50.0, true), (50.0, false)]);
        assert_eq!(pick_variant(&vs, 0).map(|v| v.id.as_str()), Some("v0"));
        assert_eq!(pick_variant(&vs, 49).map(|v| v.id.as_str()), Some("v0"));
        assert_eq!(pick_variant(&vs, 50).map(|v| v.id.as_str()), Some("v1"));
        assert_eq!(pick_variant(&vs, 99).map(|v| v.id.as_str()), Some("v1"));
    }

    #[test]
    fn uneven_split_routes_in_order() {
        let vs = variants(&[(10.0, true), (30.0, false), (60.0, false)]);
        assert_eq!(pick_variant(&vs, 9).map(|v| v.id.as_str()), Some("v0"));
        assert_eq!(pick_variant(&vs, 10).map(|v| v.id.as_str()), Some("v1"));
        assert_eq!(pick_variant(&vs, 39).map(|v| v.id.as_str()), Some("v1"));
        assert_eq!(pick_variant(&vs, 40).map(|v| v.id.as_str()), Some("v2"));
    }
}
