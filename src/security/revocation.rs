//! Revoked token identifiers.
//!
//! The set is published by an external updater (revocation events from the
//! control plane) and read by the pipeline without locking. Each update swaps
//! in a whole new snapshot.

use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::sync::Arc;

/// Snapshot handle over the set of revoked token identifiers.
///
/// Cloning the handle shares the same underlying set.
#[derive(Clone, Default)]
pub struct RevokedSet {
    inner: Arc<ArcSwap<HashSet<String>>>,
}

impl RevokedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: HashSet<String> = ids.into_iter().map(Into::into).collect();
        Self {
            inner: Arc::new(ArcSwap::from_pointee(set)),
        }
    }

    /// O(1) membership check against the current snapshot.
    pub fn is_revoked(&self, token_id: &str) -> bool {
        self.inner.load().contains(token_id)
    }

    /// Publish a complete replacement snapshot.
    pub fn replace(&self, ids: HashSet<String>) {
        self.inner.store(Arc::new(ids));
    }

    /// Add one identifier (copy-on-write).
    pub fn revoke(&self, token_id: impl Into<String>) {
        let token_id = token_id.into();
        self.inner.rcu(|current| {
            let mut next = HashSet::clone(current);
            next.insert(token_id.clone());
            next
        });
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for RevokedSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RevokedSet").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revoke_and_check() {
        let set = RevokedSet::new();
        assert!(!set.is_revoked("jti-1"));
        set.revoke("jti-1");
        assert!(set.is_revoked("jti-1"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_replace_swaps_snapshot() {
        let set = RevokedSet::from_ids(["a", "b"]);
        let handle = set.clone();
        set.replace(["c".to_string()].into_iter().collect());
        assert!(!handle.is_revoked("a"));
        assert!(handle.is_revoked("c"));
    }
}
