//! Consistent hash continuum
//!
//! Points are placed with SHA-1 (`"{seed}:{index}"`, high 32 bits) and keys
//! are looked up with CRC32. Each target receives
//! `points_hint * 160 * weight / total_weight` points, truncated, so a target
//! whose share falls below that resolution gets no point at all.

use crate::RoutingError;
use serde_json::Value;
use sha1::{Digest, Sha1};

/// Ring points per unit of the points hint
pub const POINTS_PER_UNIT: u64 = 160;
/// Upper bound on `points_hint * POINTS_PER_UNIT`
pub const MAX_POINTS: u64 = 1 << 24;

/// One point on the ring
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuumPoint<T> {
    pub hash: u32,
    pub target: T,
}

/// Target to place on the ring
#[derive(Debug, Clone)]
pub struct WeightedTarget<T> {
    pub target: T,
    pub weight: f64,
    /// Prefix hashed together with the point index
    pub seed: String,
}

impl<T> WeightedTarget<T> {
    pub fn new(target: T, weight: f64, seed: impl Into<String>) -> Self {
        Self {
            target,
            weight,
            seed: seed.into(),
        }
    }
}

/// Sorted ring of points
#[derive(Debug, Clone)]
pub struct Continuum<T> {
    points: Vec<ContinuumPoint<T>>,
}

impl<T: Clone> Continuum<T> {
    /// Build a continuum over weighted targets
    pub fn build(
        targets: Vec<WeightedTarget<T>>,
        points_hint: u64,
    ) -> Result<Self, RoutingError> {
        if targets.is_empty() {
            return Err(RoutingError::InvalidWeightConfiguration(
                "continuum needs at least one target".to_string(),
            ));
        }
        if let Some(bad) = targets.iter().find(|t| !t.weight.is_finite() || t.weight < 0.0) {
            return Err(RoutingError::InvalidWeightConfiguration(format!(
                "weight of {} must be a non-negative number, got {}",
                bad.seed, bad.weight
            )));
        }

        let total_weight: f64 = targets.iter().map(|t| t.weight).sum();
        if total_weight <= 0.0 {
            return Err(RoutingError::InvalidWeightConfiguration(
                "total weight must be larger than zero".to_string(),
            ));
        }

        let scale = points_hint
            .checked_mul(POINTS_PER_UNIT)
            .filter(|points| *points <= MAX_POINTS)
            .ok_or_else(|| {
                RoutingError::InvalidWeightConfiguration(format!(
                    "points hint {} exceeds the continuum size limit of {} points",
                    points_hint, MAX_POINTS
                ))
            })? as f64;
        let mut points = Vec::new();
        for target in targets {
            let n_points = (scale * target.weight / total_weight).floor() as u64;
            for index in 0..n_points {
                points.push(ContinuumPoint {
                    hash: point_hash(&target.seed, index),
                    target: target.target.clone(),
                });
            }
        }

        if points.is_empty() {
            return Err(RoutingError::InvalidWeightConfiguration(
                "no target received a point on the continuum".to_string(),
            ));
        }

        // Stable: equal hashes keep insertion order.
        points.sort_by_key(|point| point.hash);

        Ok(Self { points })
    }

    /// Target owning `key`
    pub fn lookup(&self, key: &[u8]) -> &T {
        self.lookup_hash(crc32fast::hash(key))
    }

    /// Target owning the first point at or after `hash`, wrapping to the last point
    pub fn lookup_hash(&self, hash: u32) -> &T {
        let index = self.points.partition_point(|point| point.hash < hash);
        let index = index.min(self.points.len() - 1);
        &self.points[index].target
    }

    pub fn points(&self) -> &[ContinuumPoint<T>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// High 32 bits of `SHA1("{seed}:{index}")`
pub fn point_hash(seed: &str, index: u64) -> u32 {
    let digest = Sha1::digest(format!("{}:{}", seed, index).as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// String form of a routing key; integers hash as their decimal form
pub fn routing_key(value: &Value) -> Result<String, RoutingError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        other => Err(RoutingError::UnhashableKey(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn three_targets() -> Vec<WeightedTarget<&'static str>> {
        vec![
            WeightedTarget::new("a", 10.0, "zone-a"),
            WeightedTarget::new("b", 20.0, "zone-b"),
            WeightedTarget::new("c", 30.0, "zone-c"),
        ]
    }

    #[test]
    fn test_point_hash_is_sha1_prefix() {
        let digest = Sha1::digest(b"key:0");
        let expected = u32::from_str_radix(
            &digest[..4].iter().map(|b| format!("{:02x}", b)).collect::<String>(),
            16,
        )
        .unwrap();
        assert_eq!(point_hash("key", 0), expected);
    }

    #[test]
    fn test_points_are_sorted() {
        let continuum = Continuum::build(three_targets(), 2).unwrap();
        let hashes: Vec<u32> = continuum.points().iter().map(|p| p.hash).collect();
        let mut sorted = hashes.clone();
        sorted.sort();
        assert_eq!(hashes, sorted);
    }

    #[test]
    fn test_weight_proportionality() {
        let continuum = Continuum::build(three_targets(), 3).unwrap();
        let count = |name: &str| continuum.points().iter().filter(|p| p.target == name).count();

        // 3 * 160 * w / 60
        assert_eq!(count("a"), 80);
        assert_eq!(count("b"), 160);
        assert_eq!(count("c"), 240);
    }

    #[test]
    fn test_tiny_weight_gets_no_points() {
        let targets = vec![
            WeightedTarget::new("big", 100_000.0, "big"),
            WeightedTarget::new("tiny", 1.0, "tiny"),
        ];
        let continuum = Continuum::build(targets, 1).unwrap();
        assert!(continuum.points().iter().all(|p| p.target == "big"));
    }

    #[test]
    fn test_lookup_is_deterministic() {
        let first = Continuum::build(three_targets(), 2).unwrap();
        let second = Continuum::build(three_targets(), 2).unwrap();
        for i in 0..200 {
            let key = format!("key-{}", i);
            assert_eq!(first.lookup(key.as_bytes()), second.lookup(key.as_bytes()));
        }
    }

    #[test]
    fn test_lookup_wraps_to_last_point() {
        let continuum = Continuum::build(three_targets(), 1).unwrap();
        let last = continuum.points().last().unwrap();
        assert_eq!(continuum.lookup_hash(u32::MAX), &last.target);
        if last.hash < u32::MAX {
            assert_eq!(continuum.lookup_hash(last.hash + 1), &last.target);
        }
    }

    #[test]
    fn test_lookup_exact_and_between_points() {
        let continuum = Continuum::build(three_targets(), 1).unwrap();
        let points = continuum.points();
        assert_eq!(continuum.lookup_hash(points[5].hash), &points[5].target);
        assert_eq!(continuum.lookup_hash(0), &points[0].target);
    }

    #[test]
    fn test_rejects_empty_and_zero_weight() {
        let empty: Vec<WeightedTarget<&str>> = Vec::new();
        assert!(matches!(
            Continuum::build(empty, 1),
            Err(RoutingError::InvalidWeightConfiguration(_))
        ));

        let zero = vec![
            WeightedTarget::new("a", 0.0, "a"),
            WeightedTarget::new("b", 0.0, "b"),
        ];
        assert!(matches!(
            Continuum::build(zero, 1),
            Err(RoutingError::InvalidWeightConfiguration(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_points_hint() {
        for hint in [u64::MAX, u64::MAX / POINTS_PER_UNIT + 1, MAX_POINTS / POINTS_PER_UNIT + 1] {
            let err = Continuum::build(three_targets(), hint).unwrap_err();
            assert!(matches!(err, RoutingError::InvalidWeightConfiguration(_)));
        }
    }

    #[test]
    fn test_single_target_owns_every_key() {
        let continuum =
            Continuum::build(vec![WeightedTarget::new("only", 1.0, "only")], 1).unwrap();
        assert_eq!(continuum.len(), 160);
        assert_eq!(*continuum.lookup(b"anything"), "only");
    }

    #[test]
    fn test_routing_key_stringifies_integers() {
        assert_eq!(routing_key(&json!("abc")).unwrap(), "abc");
        assert_eq!(routing_key(&json!(42)).unwrap(), "42");
        assert_eq!(routing_key(&json!(-7)).unwrap(), "-7");
        assert!(routing_key(&json!(1.5)).is_err());
        assert!(routing_key(&json!(null)).is_err());
    }
}
