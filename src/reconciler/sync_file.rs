//! Per-file reconciliation (§4.H.2): given what is currently observed on the
//! store side and the target side, plus what was last known to be in sync,
//! decide what (if anything) needs to happen to bring the file back into
//! agreement.
use crate::error::Result;
use crate::logging::*;
use crate::store::merge::{contains_conflict_markers, parse_conflict_markers, three_way_merge};
use crate::types::{ConflictKind, TrackedFile};
use crate::util::digest_bytes;

/// What's observed right now for one relative path.
pub struct ObservedSide {
	pub content: Option<Vec<u8>>,
	pub digest: Option<String>,
}

impl ObservedSide {
	pub fn present(content: Vec<u8>) -> Self {
		let digest = Some(digest_bytes(&content));
		ObservedSide { content: Some(content), digest }
	}

	pub fn absent() -> Self {
		ObservedSide { content: None, digest: None }
	}
}

/// The outcome of reconciling one tracked file for one pass.
pub enum FileDecision {
	/// Neither side changed since the last pass; truly nothing to do.
	NoOp,
	/// The file is gone on both sides; drop the tracked-file record.
	Untrack,
	/// Both sides now hold identical `content`. Bookkeeping (digests, mtimes,
	/// any pending-conflict auto-clear) still needs to run even though no
	/// bytes need writing (§4.H.2 step 4).
	Converged { content: Vec<u8> },
	/// Write `content` to the target.
	PropagateToTarget { content: Vec<u8> },
	/// Write `content` to the store.
	PropagateToStore { content: Vec<u8> },
	/// A clean three-way merge produced `content`; write it to both sides.
	MergedBothSides { content: Vec<u8> },
	/// Delete the file on the side named by `kind`'s sibling side (the one
	/// whose content is absent here), since nothing changed on the other side.
	PropagateDelete { kind: ConflictKind },
	/// The two sides have diverged in a way that needs a human decision.
	OpenConflict {
		kind: ConflictKind,
		store_content: Option<Vec<u8>>,
		target_content: Option<Vec<u8>>,
		base_content: Option<Vec<u8>>,
	},
	/// A post-pull pass found conflict markers already baked into content
	/// that would otherwise have been treated as agreed or propagated
	/// (§4.H.3). Revert the given side(s) to known-good content and open a
	/// conflict capturing the incoming/local versions split out of the markers.
	PoisonedPull {
		revert_target: Option<Vec<u8>>,
		revert_store: Option<Vec<u8>>,
		conflict_store_content: Vec<u8>,
		conflict_target_content: Vec<u8>,
		conflict_merged_content: Vec<u8>,
	},
}

/// Reconcile one tracked file. `tracked` is `None` the first time a path is
/// observed on either side; `base_content` is the baseline to three-way-merge
/// against, when one was found (§4.H.2 step 6); `post_pull` is set while a
/// `syncAfterPull` reprocessing pass is running (§4.H.9), which both changes
/// the baseline's source and enables the poisoned-marker traps of §4.H.3.
pub fn reconcile_file(
	tracked: Option<&TrackedFile>,
	store: &ObservedSide,
	target: &ObservedSide,
	base_content: Option<&[u8]>,
	post_pull: bool,
) -> Result<FileDecision> {
	match (&store.content, &target.content) {
		(None, None) => Ok(FileDecision::Untrack),

		(Some(store_content), None) => {
			if was_synced_before(tracked) {
				// Target deleted a file that was in sync; did the store also change?
				if store_digest_matches_last_sync(tracked, &store.digest) {
					Ok(FileDecision::PropagateDelete { kind: ConflictKind::MissingInTarget })
				} else {
					Ok(FileDecision::OpenConflict {
						kind: ConflictKind::MissingInTarget,
						store_content: Some(store_content.clone()),
						target_content: None,
						base_content: base_content.map(|b| b.to_vec()),
					})
				}
			} else {
				Ok(FileDecision::PropagateToTarget { content: store_content.clone() })
			}
		}

		(None, Some(target_content)) => {
			if was_synced_before(tracked) {
				if target_digest_matches_last_sync(tracked, &target.digest) {
					Ok(FileDecision::PropagateDelete { kind: ConflictKind::MissingInStore })
				} else {
					Ok(FileDecision::OpenConflict {
						kind: ConflictKind::MissingInStore,
						store_content: None,
						target_content: Some(target_content.clone()),
						base_content: base_content.map(|b| b.to_vec()),
					})
				}
			} else {
				Ok(FileDecision::PropagateToStore { content: target_content.clone() })
			}
		}

		(Some(store_content), Some(target_content)) => {
			if store.digest == target.digest {
				if post_pull {
					if let Some(poisoned) = poisoned_converged_decision(store_content) {
						return Ok(poisoned);
					}
				}
				return Ok(FileDecision::Converged { content: store_content.clone() });
			}

			let store_changed = !store_digest_matches_last_sync(tracked, &store.digest);
			let target_changed = !target_digest_matches_last_sync(tracked, &target.digest);

			match (store_changed, target_changed) {
				(false, false) => Ok(FileDecision::NoOp),
				(true, false) => {
					if post_pull {
						if let Some(poisoned) = poisoned_store_only_decision(store_content, target_content) {
							return Ok(poisoned);
						}
					}
					Ok(FileDecision::PropagateToTarget { content: store_content.clone() })
				}
				(false, true) => Ok(FileDecision::PropagateToStore { content: target_content.clone() }),
				(true, true) => reconcile_both_changed(tracked, store_content, target_content, base_content),
			}
		}
	}
}

/// First poisoned-pull trap (§4.H.3): both sides already byte-identical and
/// carrying embedded conflict markers (a merge "succeeded" but left markers
/// in the file).
fn poisoned_converged_decision(content: &[u8]) -> Option<FileDecision> {
	let text = std::str::from_utf8(content).ok()?;
	if !contains_conflict_markers(text) {
		return None;
	}
	let (ours, theirs) = parse_conflict_markers(text);
	let ours = ours.into_bytes();
	Some(FileDecision::PoisonedPull {
		revert_target: Some(ours.clone()),
		revert_store: Some(ours.clone()),
		conflict_store_content: theirs.into_bytes(),
		conflict_target_content: ours,
		conflict_merged_content: content.to_vec(),
	})
}

/// Second poisoned-pull trap (§4.H.3): the store side alone "changed" per its
/// digest, but that change is a pull that dragged in marker-laden content.
/// Revert the store to the target's current (unaffected) content instead of
/// propagating the markers.
fn poisoned_store_only_decision(store_content: &[u8], target_content: &[u8]) -> Option<FileDecision> {
	let text = std::str::from_utf8(store_content).ok()?;
	if !contains_conflict_markers(text) {
		return None;
	}
	let (_ours, theirs) = parse_conflict_markers(text);
	Some(FileDecision::PoisonedPull {
		revert_target: None,
		revert_store: Some(target_content.to_vec()),
		conflict_store_content: theirs.into_bytes(),
		conflict_target_content: target_content.to_vec(),
		conflict_merged_content: store_content.to_vec(),
	})
}

fn reconcile_both_changed(
	tracked: Option<&TrackedFile>,
	store_content: &[u8],
	target_content: &[u8],
	base_content: Option<&[u8]>,
) -> Result<FileDecision> {
	let base = match base_content {
		Some(b) => b,
		None => {
			// Resolved open question: with no common baseline (never synced, or
			// the baseline content is unavailable), store wins rather than
			// opening an unresolvable conflict.
			warn!(
				path = tracked.map(|t| t.relative_path.as_str()).unwrap_or("<new>"),
				"heuristic mode: both sides changed with no baseline, store wins"
			);
			return Ok(FileDecision::PropagateToTarget { content: store_content.to_vec() });
		}
	};

	let base_text = std::str::from_utf8(base);
	let store_text = std::str::from_utf8(store_content);
	let target_text = std::str::from_utf8(target_content);

	match (base_text, store_text, target_text) {
		(Ok(base), Ok(store), Ok(target)) => {
			let outcome = three_way_merge(base, store, target);
			if outcome.has_conflicts {
				Ok(FileDecision::OpenConflict {
					kind: ConflictKind::Conflict,
					store_content: Some(store_content.to_vec()),
					target_content: Some(target_content.to_vec()),
					base_content: Some(base.as_bytes().to_vec()),
				})
			} else {
				Ok(FileDecision::MergedBothSides { content: outcome.content.into_bytes() })
			}
		}
		_ => {
			// Binary content can't be three-way merged textually; surface a conflict.
			Ok(FileDecision::OpenConflict {
				kind: ConflictKind::Conflict,
				store_content: Some(store_content.to_vec()),
				target_content: Some(target_content.to_vec()),
				base_content: base_content.map(|b| b.to_vec()),
			})
		}
	}
}

fn was_synced_before(tracked: Option<&TrackedFile>) -> bool {
	tracked.map(|t| t.was_previously_synced()).unwrap_or(false)
}

fn store_digest_matches_last_sync(tracked: Option<&TrackedFile>, observed: &Option<String>) -> bool {
	match tracked {
		Some(t) => t.store_digest == *observed,
		None => false,
	}
}

fn target_digest_matches_last_sync(tracked: Option<&TrackedFile>, observed: &Option<String>) -> bool {
	match tracked {
		Some(t) => t.target_digest == *observed,
		None => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::SyncStatus;
	use uuid::Uuid;

	fn synced_tracked(store_digest: &str, target_digest: &str) -> TrackedFile {
		let mut tf = TrackedFile::new(Uuid::new_v4(), "a.txt", SyncStatus::Synced);
		tf.store_digest = Some(store_digest.to_string());
		tf.target_digest = Some(target_digest.to_string());
		tf
	}

	#[test]
	fn new_file_in_store_only_propagates_to_target() {
		let store = ObservedSide::present(b"hello".to_vec());
		let target = ObservedSide::absent();
		let decision = reconcile_file(None, &store, &target, None, false).unwrap();
		assert!(matches!(decision, FileDecision::PropagateToTarget { content } if content == b"hello"));
	}

	#[test]
	fn new_file_in_target_only_propagates_to_store() {
		let store = ObservedSide::absent();
		let target = ObservedSide::present(b"hello".to_vec());
		let decision = reconcile_file(None, &store, &target, None, false).unwrap();
		assert!(matches!(decision, FileDecision::PropagateToStore { content } if content == b"hello"));
	}

	#[test]
	fn identical_content_on_both_sides_converges() {
		let store = ObservedSide::present(b"same".to_vec());
		let target = ObservedSide::present(b"same".to_vec());
		let tracked = synced_tracked(store.digest.as_deref().unwrap(), target.digest.as_deref().unwrap());
		let decision = reconcile_file(Some(&tracked), &store, &target, None, false).unwrap();
		assert!(matches!(decision, FileDecision::Converged { content } if content == b"same"));
	}

	#[test]
	fn store_only_change_propagates_to_target() {
		let old_digest = digest_bytes(b"old");
		let store = ObservedSide::present(b"new".to_vec());
		let target = ObservedSide::present(b"old".to_vec());
		let tracked = synced_tracked(&old_digest, &old_digest);
		let decision = reconcile_file(Some(&tracked), &store, &target, None, false).unwrap();
		assert!(matches!(decision, FileDecision::PropagateToTarget { content } if content == b"new"));
	}

	#[test]
	fn target_only_change_propagates_to_store() {
		let old_digest = digest_bytes(b"old");
		let store = ObservedSide::present(b"old".to_vec());
		let target = ObservedSide::present(b"new".to_vec());
		let tracked = synced_tracked(&old_digest, &old_digest);
		let decision = reconcile_file(Some(&tracked), &store, &target, None, false).unwrap();
		assert!(matches!(decision, FileDecision::PropagateToStore { content } if content == b"new"));
	}

	#[test]
	fn both_changed_with_base_and_clean_merge_writes_both_sides() {
		let base = b"line1\nline2\nline3\n";
		let store_content = b"lineA\nline2\nline3\n".to_vec();
		let target_content = b"line1\nline2\nlineC\n".to_vec();
		let old_digest = digest_bytes(base);
		let tracked = synced_tracked(&old_digest, &old_digest);
		let store = ObservedSide::present(store_content);
		let target = ObservedSide::present(target_content);
		let decision = reconcile_file(Some(&tracked), &store, &target, Some(base), false).unwrap();
		assert!(matches!(decision, FileDecision::MergedBothSides { content } if content == b"lineA\nline2\nlineC\n"));
	}

	#[test]
	fn both_changed_with_base_and_true_conflict_opens_conflict() {
		let base = b"line1\n";
		let old_digest = digest_bytes(base);
		let tracked = synced_tracked(&old_digest, &old_digest);
		let store = ObservedSide::present(b"X\n".to_vec());
		let target = ObservedSide::present(b"Y\n".to_vec());
		let decision = reconcile_file(Some(&tracked), &store, &target, Some(base), false).unwrap();
		assert!(matches!(decision, FileDecision::OpenConflict { kind: ConflictKind::Conflict, .. }));
	}

	#[test]
	fn both_changed_with_no_baseline_heuristic_store_wins() {
		let store = ObservedSide::present(b"X".to_vec());
		let target = ObservedSide::present(b"Y".to_vec());
		let decision = reconcile_file(None, &store, &target, None, false).unwrap();
		assert!(matches!(decision, FileDecision::PropagateToTarget { content } if content == b"X"));
	}

	#[test]
	fn delete_in_target_with_unchanged_store_propagates_delete() {
		let digest = digest_bytes(b"same");
		let tracked = synced_tracked(&digest, &digest);
		let store = ObservedSide::present(b"same".to_vec());
		let target = ObservedSide::absent();
		let decision = reconcile_file(Some(&tracked), &store, &target, None, false).unwrap();
		assert!(matches!(decision, FileDecision::PropagateDelete { kind: ConflictKind::MissingInTarget }));
	}

	#[test]
	fn delete_in_target_with_changed_store_opens_conflict() {
		let old_digest = digest_bytes(b"old");
		let tracked = synced_tracked(&old_digest, &old_digest);
		let store = ObservedSide::present(b"new".to_vec());
		let target = ObservedSide::absent();
		let decision = reconcile_file(Some(&tracked), &store, &target, None, false).unwrap();
		assert!(matches!(decision, FileDecision::OpenConflict { kind: ConflictKind::MissingInTarget, .. }));
	}

	#[test]
	fn both_sides_missing_untracks() {
		let store = ObservedSide::absent();
		let target = ObservedSide::absent();
		let decision = reconcile_file(None, &store, &target, None, false).unwrap();
		assert!(matches!(decision, FileDecision::Untrack));
	}

	#[test]
	fn poisoned_pull_on_converged_sides_splits_and_reverts() {
		let content = b"before\n<<<<<<< HEAD\nlocal\n=======\nremote\n>>>>>>> incoming\nafter\n".to_vec();
		let store = ObservedSide::present(content.clone());
		let target = ObservedSide::present(content);
		let tracked = synced_tracked(store.digest.as_deref().unwrap(), target.digest.as_deref().unwrap());
		let decision = reconcile_file(Some(&tracked), &store, &target, None, true).unwrap();
		match decision {
			FileDecision::PoisonedPull { revert_target, revert_store, conflict_store_content, conflict_target_content, .. } => {
				assert_eq!(revert_target, Some(b"before\nlocal\nafter\n".to_vec()));
				assert_eq!(revert_store, Some(b"before\nlocal\nafter\n".to_vec()));
				assert_eq!(conflict_store_content, b"before\nremote\nafter\n".to_vec());
				assert_eq!(conflict_target_content, b"before\nlocal\nafter\n".to_vec());
			}
			_ => panic!("expected PoisonedPull decision"),
		}
	}

	#[test]
	fn poisoned_pull_is_not_triggered_outside_a_post_pull_pass() {
		let content = b"<<<<<<< HEAD\nlocal\n=======\nremote\n>>>>>>> incoming\n".to_vec();
		let store = ObservedSide::present(content.clone());
		let target = ObservedSide::present(content);
		let tracked = synced_tracked(store.digest.as_deref().unwrap(), target.digest.as_deref().unwrap());
		let decision = reconcile_file(Some(&tracked), &store, &target, None, false).unwrap();
		assert!(matches!(decision, FileDecision::Converged { .. }));
	}

	#[test]
	fn poisoned_store_only_change_reverts_to_target_content() {
		let old_digest = digest_bytes(b"old");
		let tracked = synced_tracked(&old_digest, &old_digest);
		let poisoned = b"before\n<<<<<<< HEAD\nlocal\n=======\nremote\n>>>>>>> incoming\nafter\n".to_vec();
		let store = ObservedSide::present(poisoned.clone());
		let target = ObservedSide::present(b"old".to_vec());
		let decision = reconcile_file(Some(&tracked), &store, &target, None, true).unwrap();
		match decision {
			FileDecision::PoisonedPull { revert_target, revert_store, conflict_store_content, .. } => {
				assert!(revert_target.is_none());
				assert_eq!(revert_store, Some(b"old".to_vec()));
				assert_eq!(conflict_store_content, b"before\nremote\nafter\n".to_vec());
			}
			_ => panic!("expected PoisonedPull decision"),
		}
	}
}

// vim: ts=4
