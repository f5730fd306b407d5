//! Core data model (§3).
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A syncable endpoint: either a general working directory ("repo") or a
/// tool configuration directory ("service").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
	pub id: Uuid,
	pub name: String,
	pub local_path: std::path::PathBuf,
	/// Store-relative path, of the form `repos/<slug>` or `services/<slug>`.
	pub store_path: String,
	pub kind: TargetKind,
	pub status: TargetStatus,
	/// Only meaningful for `TargetKind::Service`.
	pub service_type: Option<String>,
}

impl Target {
	pub fn new_repo(name: impl Into<String>, local_path: impl Into<std::path::PathBuf>, slug: impl AsRef<str>) -> Self {
		Target {
			id: Uuid::new_v4(),
			name: name.into(),
			local_path: local_path.into(),
			store_path: format!("repos/{}", slug.as_ref()),
			kind: TargetKind::Repo,
			status: TargetStatus::Active,
			service_type: None,
		}
	}

	pub fn new_service(
		name: impl Into<String>,
		local_path: impl Into<std::path::PathBuf>,
		slug: impl AsRef<str>,
		service_type: impl Into<String>,
	) -> Self {
		Target {
			id: Uuid::new_v4(),
			name: name.into(),
			local_path: local_path.into(),
			store_path: format!("services/{}", slug.as_ref()),
			kind: TargetKind::Service,
			status: TargetStatus::Active,
			service_type: Some(service_type.into()),
		}
	}

	pub fn is_active(&self) -> bool {
		self.status == TargetStatus::Active
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
	Repo,
	Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
	Active,
	Paused,
	Error,
}

/// A single path tracked for a target (§3 "Tracked file").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedFile {
	pub id: Uuid,
	pub target_id: Uuid,
	/// Path relative to both the target root and its mirror under the store.
	pub relative_path: String,
	pub kind: FileKind,
	pub store_digest: Option<String>,
	pub target_digest: Option<String>,
	pub store_mtime: Option<DateTime<Utc>>,
	pub target_mtime: Option<DateTime<Utc>>,
	pub status: SyncStatus,
	pub last_reconciled_at: Option<DateTime<Utc>>,
}

impl TrackedFile {
	pub fn new(target_id: Uuid, relative_path: impl Into<String>, status: SyncStatus) -> Self {
		TrackedFile {
			id: Uuid::new_v4(),
			target_id,
			relative_path: relative_path.into(),
			kind: FileKind::File,
			store_digest: None,
			target_digest: None,
			store_mtime: None,
			target_mtime: None,
			status,
			last_reconciled_at: None,
		}
	}

	/// Was this row previously observed as `synced` with digests recorded on both sides?
	pub fn was_previously_synced(&self) -> bool {
		self.status == SyncStatus::Synced && self.store_digest.is_some() && self.target_digest.is_some()
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
	File,
	Symlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
	Synced,
	PendingToStore,
	PendingToTarget,
	Conflict,
	MissingInStore,
	MissingInTarget,
}

impl std::fmt::Display for SyncStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			SyncStatus::Synced => "synced",
			SyncStatus::PendingToStore => "pending_to_store",
			SyncStatus::PendingToTarget => "pending_to_target",
			SyncStatus::Conflict => "conflict",
			SyncStatus::MissingInStore => "missing_in_store",
			SyncStatus::MissingInTarget => "missing_in_target",
		};
		write!(f, "{}", s)
	}
}

/// An unresolved discrepancy tied to exactly one tracked file (§3 "Conflict").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
	pub id: Uuid,
	pub tracked_file_id: Uuid,
	pub status: ConflictStatus,
	pub kind: ConflictKind,
	pub store_content: Option<Vec<u8>>,
	pub target_content: Option<Vec<u8>>,
	pub base_content: Option<Vec<u8>>,
	pub merged_content: Option<Vec<u8>>,
	pub store_digest_at_open: Option<String>,
	pub target_digest_at_open: Option<String>,
	pub resolved_at: Option<DateTime<Utc>>,
}

impl Conflict {
	pub fn open(
		tracked_file_id: Uuid,
		kind: ConflictKind,
		store_content: Option<Vec<u8>>,
		target_content: Option<Vec<u8>>,
		base_content: Option<Vec<u8>>,
		merged_content: Option<Vec<u8>>,
	) -> Self {
		let store_digest_at_open = store_content.as_deref().map(crate::util::digest_bytes);
		let target_digest_at_open = target_content.as_deref().map(crate::util::digest_bytes);
		Conflict {
			id: Uuid::new_v4(),
			tracked_file_id,
			status: ConflictStatus::Pending,
			kind,
			store_content,
			target_content,
			base_content,
			merged_content,
			store_digest_at_open,
			target_digest_at_open,
			resolved_at: None,
		}
	}

	pub fn is_pending(&self) -> bool {
		self.status == ConflictStatus::Pending
	}

	pub fn resolve(&mut self, resolution: ConflictResolution, now: DateTime<Utc>) {
		self.status = match resolution {
			ConflictResolution::KeepStore
			| ConflictResolution::KeepTarget
			| ConflictResolution::MergedContent
			| ConflictResolution::DeleteBoth => ConflictStatus::ResolvedManual,
		};
		self.resolved_at = Some(now);
	}

	pub fn auto_resolve(&mut self, now: DateTime<Utc>) {
		self.status = ConflictStatus::ResolvedAuto;
		self.resolved_at = Some(now);
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
	Pending,
	ResolvedManual,
	ResolvedAuto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
	Conflict,
	MissingInStore,
	MissingInTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
	KeepStore,
	KeepTarget,
	MergedContent,
	DeleteBoth,
}

impl std::str::FromStr for ConflictResolution {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"keep_store" => Ok(ConflictResolution::KeepStore),
			"keep_target" => Ok(ConflictResolution::KeepTarget),
			"merged_content" => Ok(ConflictResolution::MergedContent),
			"delete_both" => Ok(ConflictResolution::DeleteBoth),
			other => Err(format!("unknown conflict resolution: {}", other)),
		}
	}
}

/// A single append-only sync-log entry, pruned to a rolling 30-day window (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
	pub id: Uuid,
	pub target_id: Option<Uuid>,
	pub message: String,
	pub at: DateTime<Utc>,
}

impl SyncLogEntry {
	pub fn new(target_id: Option<Uuid>, message: impl Into<String>, at: DateTime<Utc>) -> Self {
		SyncLogEntry { id: Uuid::new_v4(), target_id, message: message.into(), at }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn repo_target_store_path_uses_repos_prefix() {
		let t = Target::new_repo("my-project", "/home/u/my-project", "my-project");
		assert_eq!(t.store_path, "repos/my-project");
		assert_eq!(t.kind, TargetKind::Repo);
		assert!(t.is_active());
	}

	#[test]
	fn service_target_store_path_uses_services_prefix() {
		let t = Target::new_service("Claude Code", "/home/u/.claude", "claude-code", "claude-code");
		assert_eq!(t.store_path, "services/claude-code");
		assert_eq!(t.service_type.as_deref(), Some("claude-code"));
	}

	#[test]
	fn tracked_file_starts_without_digests() {
		let tf = TrackedFile::new(Uuid::new_v4(), "CLAUDE.md", SyncStatus::PendingToTarget);
		assert!(tf.store_digest.is_none());
		assert!(!tf.was_previously_synced());
	}

	#[test]
	fn tracked_file_was_previously_synced_requires_both_digests() {
		let mut tf = TrackedFile::new(Uuid::new_v4(), "CLAUDE.md", SyncStatus::Synced);
		tf.store_digest = Some("abc".into());
		assert!(!tf.was_previously_synced());
		tf.target_digest = Some("def".into());
		assert!(tf.was_previously_synced());
	}

	#[test]
	fn sync_status_display_matches_external_interface_strings() {
		assert_eq!(SyncStatus::MissingInTarget.to_string(), "missing_in_target");
		assert_eq!(SyncStatus::PendingToStore.to_string(), "pending_to_store");
	}

	#[test]
	fn conflict_open_captures_digests_of_provided_content() {
		let c = Conflict::open(
			Uuid::new_v4(),
			ConflictKind::Conflict,
			Some(b"X\n".to_vec()),
			Some(b"Y\n".to_vec()),
			Some(b"a\n".to_vec()),
			None,
		);
		assert!(c.is_pending());
		assert_eq!(c.store_digest_at_open, Some(crate::util::digest_bytes(b"X\n")));
	}

	#[test]
	fn conflict_resolve_sets_resolved_manual_and_timestamp() {
		let mut c = Conflict::open(Uuid::new_v4(), ConflictKind::Conflict, None, None, None, None);
		let now = Utc::now();
		c.resolve(ConflictResolution::KeepStore, now);
		assert_eq!(c.status, ConflictStatus::ResolvedManual);
		assert_eq!(c.resolved_at, Some(now));
		assert!(!c.is_pending());
	}

	#[test]
	fn conflict_auto_resolve_sets_resolved_auto() {
		let mut c = Conflict::open(Uuid::new_v4(), ConflictKind::MissingInTarget, None, None, None, None);
		c.auto_resolve(Utc::now());
		assert_eq!(c.status, ConflictStatus::ResolvedAuto);
	}

	#[test]
	fn conflict_resolution_parses_from_spec_strings() {
		use std::str::FromStr;
		assert_eq!(ConflictResolution::from_str("keep_store").unwrap(), ConflictResolution::KeepStore);
		assert_eq!(ConflictResolution::from_str("delete_both").unwrap(), ConflictResolution::DeleteBoth);
		assert!(ConflictResolution::from_str("bogus").is_err());
	}
}

// vim: ts=4
