//! Typed persistence tables (§3): targets, tracked files, conflicts, sync log.
//!
//! Backed by `redb`, mirroring the teacher's `cache.rs` open/read-txn/write-txn
//! idiom, generalized from a single table to the handful of typed tables this
//! spec's data model calls for. Row values are JSON rather than bincode, since
//! `serde_json` is already load-bearing elsewhere in this crate (the settings
//! projection) and these rows are small and infrequently written.
use redb::{ReadableTable, TableDefinition};
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Conflict, SyncLogEntry, Target, TrackedFile};

const TARGETS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("targets");
const TRACKED_FILES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracked_files");
const CONFLICTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("conflicts");
const SYNC_LOG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("sync_log");
const CHECKPOINT_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("checkpoint");

const LAST_KNOWN_HEAD_KEY: &str = "last_known_head";

/// Embedded database holding the reconciler's persistent state.
pub struct Db {
	inner: redb::Database,
}

impl Db {
	pub fn open(path: &std::path::Path) -> Result<Self> {
		let inner = redb::Database::create(path)?;
		{
			let txn = inner.begin_write()?;
			let _ = txn.open_table(TARGETS_TABLE)?;
			let _ = txn.open_table(TRACKED_FILES_TABLE)?;
			let _ = txn.open_table(CONFLICTS_TABLE)?;
			let _ = txn.open_table(SYNC_LOG_TABLE)?;
			let _ = txn.open_table(CHECKPOINT_TABLE)?;
			txn.commit()?;
		}
		Ok(Db { inner })
	}

	pub fn put_target(&self, target: &Target) -> Result<()> {
		let bytes = serde_json::to_vec(target)?;
		let txn = self.inner.begin_write()?;
		{
			let mut table = txn.open_table(TARGETS_TABLE)?;
			table.insert(target.id.to_string().as_str(), bytes.as_slice())?;
		}
		txn.commit()?;
		Ok(())
	}

	pub fn get_target(&self, id: Uuid) -> Result<Option<Target>> {
		let txn = self.inner.begin_read()?;
		let table = txn.open_table(TARGETS_TABLE)?;
		match table.get(id.to_string().as_str())? {
			Some(v) => Ok(Some(serde_json::from_slice(&v.value())?)),
			None => Ok(None),
		}
	}

	pub fn remove_target(&self, id: Uuid) -> Result<()> {
		let txn = self.inner.begin_write()?;
		{
			let mut table = txn.open_table(TARGETS_TABLE)?;
			table.remove(id.to_string().as_str())?;
		}
		txn.commit()?;
		Ok(())
	}

	pub fn list_targets(&self) -> Result<Vec<Target>> {
		let txn = self.inner.begin_read()?;
		let table = txn.open_table(TARGETS_TABLE)?;
		let mut out = Vec::new();
		for row in table.iter()? {
			let (_, v) = row?;
			out.push(serde_json::from_slice(&v.value())?);
		}
		Ok(out)
	}

	pub fn put_tracked_file(&self, tf: &TrackedFile) -> Result<()> {
		let bytes = serde_json::to_vec(tf)?;
		let txn = self.inner.begin_write()?;
		{
			let mut table = txn.open_table(TRACKED_FILES_TABLE)?;
			table.insert(tf.id.to_string().as_str(), bytes.as_slice())?;
		}
		txn.commit()?;
		Ok(())
	}

	pub fn get_tracked_file(&self, id: Uuid) -> Result<Option<TrackedFile>> {
		let txn = self.inner.begin_read()?;
		let table = txn.open_table(TRACKED_FILES_TABLE)?;
		match table.get(id.to_string().as_str())? {
			Some(v) => Ok(Some(serde_json::from_slice(&v.value())?)),
			None => Ok(None),
		}
	}

	pub fn remove_tracked_file(&self, id: Uuid) -> Result<()> {
		let txn = self.inner.begin_write()?;
		{
			let mut table = txn.open_table(TRACKED_FILES_TABLE)?;
			table.remove(id.to_string().as_str())?;
		}
		txn.commit()?;
		Ok(())
	}

	/// Tracked files for a given target. (§3 invariant 1: (target, relative path) unique.)
	pub fn tracked_files_for_target(&self, target_id: Uuid) -> Result<Vec<TrackedFile>> {
		let txn = self.inner.begin_read()?;
		let table = txn.open_table(TRACKED_FILES_TABLE)?;
		let mut out = Vec::new();
		for row in table.iter()? {
			let (_, v) = row?;
			let tf: TrackedFile = serde_json::from_slice(&v.value())?;
			if tf.target_id == target_id {
				out.push(tf);
			}
		}
		Ok(out)
	}

	pub fn find_tracked_file(&self, target_id: Uuid, relative_path: &str) -> Result<Option<TrackedFile>> {
		Ok(self
			.tracked_files_for_target(target_id)?
			.into_iter()
			.find(|tf| tf.relative_path == relative_path))
	}

	pub fn put_conflict(&self, conflict: &Conflict) -> Result<()> {
		let bytes = serde_json::to_vec(conflict)?;
		let txn = self.inner.begin_write()?;
		{
			let mut table = txn.open_table(CONFLICTS_TABLE)?;
			table.insert(conflict.id.to_string().as_str(), bytes.as_slice())?;
		}
		txn.commit()?;
		Ok(())
	}

	/// The single pending conflict for a tracked file, if any (§3 invariant 3).
	pub fn pending_conflict_for(&self, tracked_file_id: Uuid) -> Result<Option<Conflict>> {
		let txn = self.inner.begin_read()?;
		let table = txn.open_table(CONFLICTS_TABLE)?;
		for row in table.iter()? {
			let (_, v) = row?;
			let c: Conflict = serde_json::from_slice(&v.value())?;
			if c.tracked_file_id == tracked_file_id && c.is_pending() {
				return Ok(Some(c));
			}
		}
		Ok(None)
	}

	pub fn append_sync_log(&self, entry: &SyncLogEntry) -> Result<()> {
		let bytes = serde_json::to_vec(entry)?;
		let txn = self.inner.begin_write()?;
		{
			let mut table = txn.open_table(SYNC_LOG_TABLE)?;
			table.insert(entry.id.to_string().as_str(), bytes.as_slice())?;
		}
		txn.commit()?;
		Ok(())
	}

	/// Prune sync log entries older than `cutoff` (§4.H.11: rolling 30-day window).
	pub fn prune_sync_log(&self, cutoff: chrono::DateTime<chrono::Utc>) -> Result<usize> {
		let mut stale = Vec::new();
		{
			let txn = self.inner.begin_read()?;
			let table = txn.open_table(SYNC_LOG_TABLE)?;
			for row in table.iter()? {
				let (k, v) = row?;
				let entry: SyncLogEntry = serde_json::from_slice(&v.value())?;
				if entry.at < cutoff {
					stale.push(k.value().to_string());
				}
			}
		}
		let removed = stale.len();
		let txn = self.inner.begin_write()?;
		{
			let mut table = txn.open_table(SYNC_LOG_TABLE)?;
			for key in &stale {
				table.remove(key.as_str())?;
			}
		}
		txn.commit()?;
		Ok(removed)
	}

	/// Persisted `lastKnownHead` checkpoint (Open Question resolution, §9):
	/// read back on startup so a missed restart still has an accurate
	/// pre-pull baseline instead of adopting the current HEAD as its own.
	pub fn set_last_known_head(&self, head: &str) -> Result<()> {
		let txn = self.inner.begin_write()?;
		{
			let mut table = txn.open_table(CHECKPOINT_TABLE)?;
			table.insert(LAST_KNOWN_HEAD_KEY, head.as_bytes())?;
		}
		txn.commit()?;
		Ok(())
	}

	pub fn last_known_head(&self) -> Result<Option<String>> {
		let txn = self.inner.begin_read()?;
		let table = txn.open_table(CHECKPOINT_TABLE)?;
		match table.get(LAST_KNOWN_HEAD_KEY)? {
			Some(v) => Ok(Some(String::from_utf8_lossy(&v.value()).into_owned())),
			None => Ok(None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::{ConflictKind, SyncStatus};
	use tempfile::TempDir;

	fn open_db() -> (TempDir, Db) {
		let dir = TempDir::new().unwrap();
		let db = Db::open(&dir.path().join("state.redb")).unwrap();
		(dir, db)
	}

	#[test]
	fn put_and_get_target_round_trips() {
		let (_dir, db) = open_db();
		let target = Target::new_repo("r1", "/home/u/r1", "r1");
		db.put_target(&target).unwrap();
		let back = db.get_target(target.id).unwrap().unwrap();
		assert_eq!(back, target);
	}

	#[test]
	fn remove_target_deletes_row() {
		let (_dir, db) = open_db();
		let target = Target::new_repo("r1", "/home/u/r1", "r1");
		db.put_target(&target).unwrap();
		db.remove_target(target.id).unwrap();
		assert!(db.get_target(target.id).unwrap().is_none());
	}

	#[test]
	fn find_tracked_file_by_target_and_path() {
		let (_dir, db) = open_db();
		let target = Target::new_repo("r1", "/home/u/r1", "r1");
		let tf = TrackedFile::new(target.id, "CLAUDE.md", SyncStatus::PendingToTarget);
		db.put_tracked_file(&tf).unwrap();
		let found = db.find_tracked_file(target.id, "CLAUDE.md").unwrap().unwrap();
		assert_eq!(found.id, tf.id);
		assert!(db.find_tracked_file(target.id, "missing.md").unwrap().is_none());
	}

	#[test]
	fn pending_conflict_for_returns_only_pending() {
		let (_dir, db) = open_db();
		let tf_id = Uuid::new_v4();
		let mut c = Conflict::open(tf_id, ConflictKind::Conflict, None, None, None, None);
		db.put_conflict(&c).unwrap();
		assert!(db.pending_conflict_for(tf_id).unwrap().is_some());

		c.auto_resolve(chrono::Utc::now());
		db.put_conflict(&c).unwrap();
		assert!(db.pending_conflict_for(tf_id).unwrap().is_none());
	}

	#[test]
	fn prune_sync_log_removes_entries_older_than_cutoff() {
		let (_dir, db) = open_db();
		let old = SyncLogEntry::new(None, "old", chrono::Utc::now() - chrono::Duration::days(40));
		let recent = SyncLogEntry::new(None, "recent", chrono::Utc::now());
		db.append_sync_log(&old).unwrap();
		db.append_sync_log(&recent).unwrap();

		let removed = db.prune_sync_log(chrono::Utc::now() - chrono::Duration::days(30)).unwrap();
		assert_eq!(removed, 1);
	}

	#[test]
	fn last_known_head_checkpoint_persists() {
		let (_dir, db) = open_db();
		assert!(db.last_known_head().unwrap().is_none());
		db.set_last_known_head("deadbeef").unwrap();
		assert_eq!(db.last_known_head().unwrap(), Some("deadbeef".to_string()));
	}
}

// vim: ts=4
