//! Persistence-backed conflict operations (§4.G, §3 invariant 3: at most one
//! pending conflict per tracked file).
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::Db;
use crate::error::Result;
use crate::types::{Conflict, ConflictKind, ConflictResolution};

pub struct ConflictStore {
	db: Arc<Db>,
}

impl ConflictStore {
	pub fn new(db: Arc<Db>) -> Self {
		ConflictStore { db }
	}

	/// Open a new conflict for a tracked file, unless one is already pending
	/// for it — in which case this is a no-op and `None` is returned.
	pub fn create(
		&self,
		tracked_file_id: Uuid,
		kind: ConflictKind,
		store_content: Option<Vec<u8>>,
		target_content: Option<Vec<u8>>,
		base_content: Option<Vec<u8>>,
		merged_content: Option<Vec<u8>>,
	) -> Result<Option<Conflict>> {
		if self.db.pending_conflict_for(tracked_file_id)?.is_some() {
			return Ok(None);
		}
		let conflict = Conflict::open(tracked_file_id, kind, store_content, target_content, base_content, merged_content);
		self.db.put_conflict(&conflict)?;
		Ok(Some(conflict))
	}

	/// Refresh a pending conflict's captured content (e.g. after a later pull
	/// observes new competing versions for the same unresolved conflict).
	pub fn update(
		&self,
		mut conflict: Conflict,
		store_content: Option<Vec<u8>>,
		target_content: Option<Vec<u8>>,
		base_content: Option<Vec<u8>>,
		merged_content: Option<Vec<u8>>,
	) -> Result<Conflict> {
		conflict.store_content = store_content;
		conflict.target_content = target_content;
		conflict.base_content = base_content;
		conflict.merged_content = merged_content;
		self.db.put_conflict(&conflict)?;
		Ok(conflict)
	}

	pub fn resolve(&self, mut conflict: Conflict, resolution: ConflictResolution, now: DateTime<Utc>) -> Result<Conflict> {
		conflict.resolve(resolution, now);
		self.db.put_conflict(&conflict)?;
		Ok(conflict)
	}

	/// Mark a conflict resolved automatically, e.g. because both sides
	/// converged to the same content without user intervention.
	pub fn auto_clear(&self, mut conflict: Conflict, now: DateTime<Utc>) -> Result<Conflict> {
		conflict.auto_resolve(now);
		self.db.put_conflict(&conflict)?;
		Ok(conflict)
	}

	pub fn pending_for(&self, tracked_file_id: Uuid) -> Result<Option<Conflict>> {
		self.db.pending_conflict_for(tracked_file_id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn open_store() -> (TempDir, ConflictStore) {
		let dir = TempDir::new().unwrap();
		let db = Arc::new(Db::open(&dir.path().join("state.redb")).unwrap());
		(dir, ConflictStore::new(db))
	}

	#[test]
	fn create_is_noop_when_a_conflict_is_already_pending() {
		let (_dir, store) = open_store();
		let tf_id = Uuid::new_v4();
		let first = store.create(tf_id, ConflictKind::Conflict, None, None, None, None).unwrap();
		assert!(first.is_some());

		let second = store.create(tf_id, ConflictKind::Conflict, None, None, None, None).unwrap();
		assert!(second.is_none());
	}

	#[test]
	fn resolve_marks_conflict_resolved_manual() {
		let (_dir, store) = open_store();
		let tf_id = Uuid::new_v4();
		let conflict = store.create(tf_id, ConflictKind::Conflict, None, None, None, None).unwrap().unwrap();
		let resolved = store.resolve(conflict, ConflictResolution::KeepStore, Utc::now()).unwrap();
		assert!(!resolved.is_pending());
		assert!(store.pending_for(tf_id).unwrap().is_none());
	}

	#[test]
	fn auto_clear_marks_conflict_resolved_auto() {
		let (_dir, store) = open_store();
		let tf_id = Uuid::new_v4();
		let conflict = store.create(tf_id, ConflictKind::MissingInTarget, None, None, None, None).unwrap().unwrap();
		store.auto_clear(conflict, Utc::now()).unwrap();
		assert!(store.pending_for(tf_id).unwrap().is_none());
	}

	#[test]
	fn update_replaces_captured_content() {
		let (_dir, store) = open_store();
		let tf_id = Uuid::new_v4();
		let conflict = store.create(tf_id, ConflictKind::Conflict, None, None, None, None).unwrap().unwrap();
		let updated = store
			.update(conflict, Some(b"s".to_vec()), Some(b"t".to_vec()), None, None)
			.unwrap();
		assert_eq!(updated.store_content, Some(b"s".to_vec()));
		assert_eq!(updated.target_content, Some(b"t".to_vec()));
	}
}

// vim: ts=4
