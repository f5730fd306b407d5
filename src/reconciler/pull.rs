//! Post-pull helpers (§4.H.3, §4.H.7): poisoned-file detection and external
//! HEAD-change detection. The actual post-pull reprocessing pass
//! (§4.H.9 `syncAfterPull`) needs access to the engine's target list and
//! per-file reconciler, so it lives on `Reconciler` itself in `mod.rs`.
use crate::store::merge::contains_conflict_markers;
use crate::error::Result;
use crate::store::StoreGateway;

/// Has the store's HEAD moved since we last recorded it, other than through
/// our own commits? (§4.H.7 — e.g. someone ran `git pull` outside the engine.)
pub fn detect_external_head_change(gateway: &StoreGateway, last_known_head: &str) -> Result<bool> {
	Ok(gateway.head_identity()? != last_known_head)
}

/// A "poisoned" file is one whose content already contains unresolved
/// conflict markers when we observe it — typically because a pull merged in
/// a commit that itself captured a manually (mis-)resolved conflict.
pub fn is_poisoned(content: &[u8]) -> bool {
	std::str::from_utf8(content).map(contains_conflict_markers).unwrap_or(false)
}


// vim: ts=4
