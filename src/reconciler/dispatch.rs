//! Event ingestion and dispatch (§4.H.1): translates raw watcher events and
//! timer ticks into reconcile requests against a specific target.
use uuid::Uuid;

use crate::watcher::{ChangeEvent, ChangeScope};

/// What triggered a reconcile pass, and for which target.
#[derive(Debug, Clone)]
pub enum ReconcileRequest {
	/// A filesystem change was observed on the store or target side of `target_id`.
	Change { target_id: Uuid, from_store: bool },
	/// The self-chaining poll timer fired; reconcile every active target.
	PollTick,
	/// A manual pull was requested (§4.H.12).
	ManualPull,
	/// Manual-pull mode ended; resume normal event-driven + polling reconciliation.
	ManualPullModeExit,
}

/// Translate a raw watcher event into a reconcile request, given that the
/// event's `key` is a target id string (the scope a watch route was
/// registered under — see `Reconciler::watch_target`).
pub fn request_for_change_event(event: &ChangeEvent) -> Option<ReconcileRequest> {
	let target_id = Uuid::parse_str(&event.key).ok()?;
	let from_store = matches!(event.scope, ChangeScope::StoreChange | ChangeScope::ServiceStoreChange);
	Some(ReconcileRequest::Change { target_id, from_store })
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::path::PathBuf;

	#[test]
	fn translates_store_change_event() {
		let target_id = Uuid::new_v4();
		let event = ChangeEvent { scope: ChangeScope::StoreChange, key: target_id.to_string(), path: PathBuf::from("/x") };
		let req = request_for_change_event(&event).unwrap();
		assert!(matches!(req, ReconcileRequest::Change { target_id: t, from_store: true } if t == target_id));
	}

	#[test]
	fn translates_target_change_event() {
		let target_id = Uuid::new_v4();
		let event = ChangeEvent { scope: ChangeScope::TargetChange, key: target_id.to_string(), path: PathBuf::from("/x") };
		let req = request_for_change_event(&event).unwrap();
		assert!(matches!(req, ReconcileRequest::Change { from_store: false, .. }));
	}

	#[test]
	fn non_uuid_key_yields_none() {
		let event = ChangeEvent { scope: ChangeScope::TargetChange, key: "not-a-uuid".to_string(), path: PathBuf::from("/x") };
		assert!(request_for_change_event(&event).is_none());
	}
}

// vim: ts=4
