//! Reconciler event fan-out (§5, §6): the seven named events the engine
//! raises as it observes and resolves changes, broadcast to any number of
//! subscribers.
use uuid::Uuid;

use crate::types::{Conflict, SyncStatus};

#[derive(Debug, Clone)]
pub enum Event {
	/// A batch of tracked files changed status for a target.
	FilesChanged { target_id: Uuid, relative_paths: Vec<String> },
	/// A single tracked file's status changed.
	SyncStatusChanged { target_id: Uuid, relative_path: String, status: SyncStatus },
	/// A full reconcile pass for a target finished cleanly.
	SyncComplete { target_id: Uuid },
	/// Reconciliation for a target is blocked (e.g. size admission, external HEAD change).
	SyncBlocked { target_id: Uuid, reason: String },
	ConflictCreated { conflict: Conflict },
	ConflictUpdated { conflict: Conflict },
	ConflictResolved { conflict: Conflict },
}

/// A consumer of reconciler events. The default no-op implementation lets
/// callers override only the events they care about.
pub trait EventSink: Send + Sync {
	fn on_event(&self, _event: &Event) {}
}

/// An `EventSink` that discards everything; the default when no UI or
/// logging layer is attached.
pub struct NullEventSink;

impl EventSink for NullEventSink {}

/// Broadcasts events to any number of async subscribers, for callers that
/// want a `tokio::sync::broadcast::Receiver` instead of implementing `EventSink`.
pub struct EventBus {
	tx: tokio::sync::broadcast::Sender<Event>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (tx, _rx) = tokio::sync::broadcast::channel(capacity);
		EventBus { tx }
	}

	pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
		self.tx.subscribe()
	}

	/// Emit to every subscriber; dropped silently if there are none
	/// (mirrors `tokio::sync::broadcast`'s send semantics).
	pub fn emit(&self, event: Event) {
		let _ = self.tx.send(event);
	}
}

impl Default for EventBus {
	fn default() -> Self {
		EventBus::new(256)
	}
}


// vim: ts=4
