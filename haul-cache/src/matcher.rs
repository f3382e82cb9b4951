//! Key matching strategies for invalidation.
//!
//! Exact invalidation compares tokens. Predicate invalidation is delegated to
//! a [`KeyMatcher`] chosen when the store is built; the default
//! [`SubstringMatcher`] accepts any key whose token contains the target, so a
//! coarse key such as `order` also hits `order-list/page=1` (and `reorder`).
//! [`SegmentMatcher`] is the stricter alternative.

use haul_core::key::KEY_SEPARATOR;
use haul_core::QueryKey;

/// Decides whether a cached key is selected by an invalidation target.
pub trait KeyMatcher: Send + Sync {
    fn matches(&self, key: &QueryKey, target: &str) -> bool;

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// Token equality.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatcher;

impl KeyMatcher for ExactMatcher {
    fn matches(&self, key: &QueryKey, target: &str) -> bool {
        key.token() == target
    }

    fn name(&self) -> &'static str {
        "exact"
    }
}

/// Token containment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubstringMatcher;

impl KeyMatcher for SubstringMatcher {
    fn matches(&self, key: &QueryKey, target: &str) -> bool {
        key.token().contains(target)
    }

    fn name(&self) -> &'static str {
        "substring"
    }
}

/// Whole-segment containment.
///
/// The target is split on the key separator and must appear as a contiguous
/// run of complete segments, so `order` matches `["order", "1"]` but not
/// `["reorder"]` nor `["order-list"]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentMatcher;

impl KeyMatcher for SegmentMatcher {
    fn matches(&self, key: &QueryKey, target: &str) -> bool {
        let needle: Vec<&str> = target.split(KEY_SEPARATOR).collect();
        let segments = key.segments();
        if needle.len() > segments.len() {
            return false;
        }
        segments
            .windows(needle.len())
            .any(|window| window.iter().zip(&needle).all(|(a, b)| a == b))
    }

    fn name(&self) -> &'static str {
        "segment"
    }
}
