//! Per (owner, entity-type) pull watermarks.
//!
//! A watermark is the `updated_at` of the most recent remote row already
//! incorporated locally; it bounds the next incremental pull. Values only
//! move forward.

use crate::models::{EntityKind, OwnerId};
use crate::store::LocalStore;

/// Lower bound for the next incremental pull; `None` means cold bootstrap.
pub(crate) fn since(store: &LocalStore, owner: &OwnerId, kind: EntityKind) -> Option<i64> {
    store.watermark(owner, kind)
}

/// Advance the watermark to `candidate` when it moves forward; a candidate at
/// or below the stored value leaves the watermark untouched.
pub(crate) fn advance(store: &mut LocalStore, owner: &OwnerId, kind: EntityKind, candidate: i64) {
    match store.watermark(owner, kind) {
        Some(current) if candidate <= current => {}
        _ => store.set_watermark(owner, kind, candidate),
    }
}

/// Advance from an optional batch maximum; `None` (empty batch) is a no-op.
pub(crate) fn advance_observed(
    store: &mut LocalStore,
    owner: &OwnerId,
    kind: EntityKind,
    observed_max: Option<i64>,
) {
    if let Some(candidate) = observed_max {
        advance(store, owner, kind, candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerId {
        OwnerId::new("user-1")
    }

    #[test]
    fn advance_moves_forward_only() {
        let mut store = LocalStore::in_memory();
        advance(&mut store, &owner(), EntityKind::Note, 100);
        assert_eq!(since(&store, &owner(), EntityKind::Note), Some(100));

        advance(&mut store, &owner(), EntityKind::Note, 50);
        assert_eq!(since(&store, &owner(), EntityKind::Note), Some(100));

        advance(&mut store, &owner(), EntityKind::Note, 150);
        assert_eq!(since(&store, &owner(), EntityKind::Note), Some(150));
    }

    #[test]
    fn empty_batch_leaves_watermark_untouched() {
        let mut store = LocalStore::in_memory();
        advance(&mut store, &owner(), EntityKind::Notebook, 10);

        advance_observed(&mut store, &owner(), EntityKind::Notebook, None);
        assert_eq!(since(&store, &owner(), EntityKind::Notebook), Some(10));
    }

    #[test]
    fn kinds_are_tracked_independently() {
        let mut store = LocalStore::in_memory();
        advance(&mut store, &owner(), EntityKind::Note, 100);
        assert_eq!(since(&store, &owner(), EntityKind::Attachment), None);
    }
}
