//! The reconciliation engine (§4.H): owns the per-target event loop that
//! keeps a target's working directory and its mirror under the store in
//! agreement.
pub mod dispatch;
pub mod pull;
pub mod scan_admission;
pub mod sync_file;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, RwLock};

use crate::config::Config;
use crate::conflict::ConflictStore;
use crate::db::Db;
use crate::error::Result;
use crate::events::{Event, EventBus};
use crate::logging::*;
use crate::pattern::PatternSet;
use crate::store::StoreGateway;
use crate::types::{SyncStatus, Target, TrackedFile};
use crate::util::{digest_symlink, mtime_of};
use crate::watcher::{ChangeScope, Watcher};

use dispatch::{request_for_change_event, ReconcileRequest};
use scan_admission::scan_with_admission;
use sync_file::{reconcile_file, FileDecision, ObservedSide};

/// Engine-wide state that outlives any single reconcile pass (§4.H: `baseCommitOverride`,
/// `pullSyncInProgress`, `pullCompletedAt`, `lastKnownHead`).
struct EngineState {
	base_commit_override: Option<String>,
	pull_sync_in_progress: bool,
	pull_completed_at: Option<chrono::DateTime<Utc>>,
	last_known_head: String,
	last_prune_at: Option<chrono::DateTime<Utc>>,
}

pub struct Reconciler {
	db: Arc<Db>,
	store: Arc<StoreGateway>,
	watcher: Arc<Watcher>,
	conflicts: ConflictStore,
	events: EventBus,
	config: RwLock<Config>,
	state: Mutex<EngineState>,
}

impl Reconciler {
	pub async fn new(db: Arc<Db>, store: Arc<StoreGateway>, watcher: Arc<Watcher>, config: Config) -> Result<Arc<Self>> {
		// Open Question resolution (§9): recover the pre-restart baseline from
		// the checkpoint instead of silently adopting the current HEAD.
		let last_known_head = match db.last_known_head()? {
			Some(head) => head,
			None => {
				let head = store.head_identity()?;
				db.set_last_known_head(&head)?;
				head
			}
		};

		let reconciler = Reconciler {
			conflicts: ConflictStore::new(Arc::clone(&db)),
			db,
			store,
			watcher,
			events: EventBus::default(),
			config: RwLock::new(config),
			state: Mutex::new(EngineState {
				base_commit_override: None,
				pull_sync_in_progress: false,
				pull_completed_at: None,
				last_known_head,
				last_prune_at: None,
			}),
		};
		Ok(Arc::new(reconciler))
	}

	pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
		self.events.subscribe()
	}

	pub fn db(&self) -> &Db {
		&self.db
	}

	pub fn store(&self) -> &StoreGateway {
		&self.store
	}

	pub fn conflict_store(&self) -> &ConflictStore {
		&self.conflicts
	}

	/// Register filesystem watches for both sides of a target (§4.E).
	pub fn watch_target(&self, target: &Target) -> Result<()> {
		self.watcher.watch(&target.local_path, ChangeScope::TargetChange, target.id.to_string())?;
		let store_scope = if target.service_type.is_some() { ChangeScope::ServiceStoreChange } else { ChangeScope::StoreChange };
		self.watcher.watch(&self.store.store_root().join(&target.store_path), store_scope, target.id.to_string())?;
		Ok(())
	}

	/// Drive the reconciler from watcher events and the self-chaining poll
	/// timer until `change_rx` closes.
	pub async fn run(self: Arc<Self>, mut change_rx: mpsc::Receiver<crate::watcher::ChangeEvent>) {
		let poll_handle = Arc::clone(&self);
		tokio::spawn(async move {
			poll_handle.poll_loop().await;
		});

		while let Some(event) = change_rx.recv().await {
			if let Some(request) = request_for_change_event(&event) {
				if let Err(e) = self.handle_request(request).await {
					error!("reconcile request failed: {}", e);
				}
			}
		}
	}

	async fn handle_request(&self, request: ReconcileRequest) -> Result<()> {
		match request {
			ReconcileRequest::Change { target_id, from_store: _ } => {
				if self.state.lock().await.pull_sync_in_progress {
					return Ok(());
				}
				// §4.H.1 step 2: an out-of-band HEAD move (e.g. a `git pull` run
				// outside the engine) short-circuits into a post-pull pass instead
				// of an ordinary single-target reconcile.
				let previous_head = self.state.lock().await.last_known_head.clone();
				if pull::detect_external_head_change(&self.store, &previous_head)? {
					self.sync_after_pull(previous_head).await?;
					return Ok(());
				}
				if let Some(target) = self.db.get_target(target_id)? {
					if target.is_active() {
						self.reconcile_target(&target).await?;
					}
				}
				Ok(())
			}
			ReconcileRequest::PollTick => self.reconcile_all_active().await,
			ReconcileRequest::ManualPull => self.pull_now().await.map(|_| ()),
			ReconcileRequest::ManualPullModeExit => {
				self.leave_manual_pull_mode().await;
				Ok(())
			}
		}
	}

	/// Self-chaining poll timer (§4.H.11): sleeps, checks for an external HEAD
	/// move, reconciles every active target, prunes the sync log at most once
	/// an hour, then reschedules itself. Deliberately not
	/// `tokio::time::interval`, so a slow pass can't queue up a backlog of ticks.
	async fn poll_loop(self: Arc<Self>) {
		loop {
			let interval_ms = self.config.read().await.sync_interval_ms;
			tokio::time::sleep(std::time::Duration::from_millis(interval_ms)).await;

			match self.external_head_change_detected().await {
				Ok(true) => {
					let previous_head = self.state.lock().await.last_known_head.clone();
					if let Err(e) = self.sync_after_pull(previous_head).await {
						error!("post-pull reprocessing failed: {}", e);
					}
					continue;
				}
				Ok(false) => {}
				Err(e) => error!("external head change check failed: {}", e),
			}

			if let Err(e) = self.reconcile_all_active().await {
				error!("poll reconcile failed: {}", e);
			}

			let due_for_prune = {
				let mut state = self.state.lock().await;
				let now = Utc::now();
				let due = state.last_prune_at.map(|t| now - t >= chrono::Duration::hours(1)).unwrap_or(true);
				if due {
					state.last_prune_at = Some(now);
				}
				due
			};
			if due_for_prune {
				let cutoff = Utc::now() - chrono::Duration::days(30);
				if let Err(e) = self.db.prune_sync_log(cutoff) {
					error!("sync log prune failed: {}", e);
				}
			}
		}
	}

	async fn reconcile_all_active(&self) -> Result<()> {
		if self.state.lock().await.pull_sync_in_progress {
			return Ok(());
		}
		for target in self.db.list_targets()? {
			if target.is_active() {
				self.reconcile_target(&target).await?;
			}
		}
		Ok(())
	}

	/// Enter manual pull mode (§4.H.12): event-driven and polled reconciles are
	/// suspended until `leave_manual_pull_mode` is called.
	pub async fn enter_manual_pull_mode(&self) {
		let mut state = self.state.lock().await;
		state.pull_sync_in_progress = true;
	}

	/// Leave manual pull mode (§4.H.12). The debounce timers *must* be cleared
	/// before the in-flight flag, or a timer firing in the gap could re-trigger
	/// a local-change reconcile against content a pull is about to replace.
	pub async fn leave_manual_pull_mode(&self) {
		self.watcher.clear_store_debounce_timers();
		let mut state = self.state.lock().await;
		state.pull_completed_at = Some(Utc::now());
		state.pull_sync_in_progress = false;
	}

	/// Pull from the remote, then reprocess every tracked file against the
	/// pre-pull HEAD as baseline (§4.H.9).
	pub async fn pull_now(&self) -> Result<Vec<crate::store::PulledManifestConflict>> {
		let pre_pull_head = self.store.head_identity()?;
		self.enter_manual_pull_mode().await;

		let manifest_conflicts = match self.store.pull() {
			Ok(conflicts) => conflicts,
			Err(e) => {
				self.leave_manual_pull_mode().await;
				return Err(e);
			}
		};

		self.reprocess_after_pull(pre_pull_head).await?;
		Ok(manifest_conflicts)
	}

	/// Has the store moved outside of our own commits since we last looked? (§4.H.7)
	pub async fn external_head_change_detected(&self) -> Result<bool> {
		let last_known = self.state.lock().await.last_known_head.clone();
		pull::detect_external_head_change(&self.store, &last_known)
	}

	/// `syncAfterPull` (§4.H.9) — "the single most delicate routine". Called
	/// both when we ourselves drove the pull (`pull_now`) and when an
	/// out-of-band HEAD move was detected (§4.H.1 step 2, §4.H.11 poll tick);
	/// in the latter case the pull itself already happened outside the engine,
	/// so this only runs the reprocessing pass and the finally-ordered cleanup.
	async fn sync_after_pull(&self, pre_pull_head: String) -> Result<()> {
		self.enter_manual_pull_mode().await;
		self.reprocess_after_pull(pre_pull_head).await
	}

	/// Shared body of §4.H.9 steps 1-5, given that `pull_sync_in_progress` is
	/// already set and `pre_pull_head` is the baseline to reprocess against.
	async fn reprocess_after_pull(&self, pre_pull_head: String) -> Result<()> {
		{
			let mut state = self.state.lock().await;
			state.base_commit_override = Some(pre_pull_head);
		}

		for target in self.db.list_targets()? {
			if target.is_active() {
				if let Err(e) = self.reconcile_target(&target).await {
					error!(target_name = %target.name, "post-pull reconcile failed: {}", e);
				}
			}
		}

		// finally: debounce timers, then completed_at/flag (via leave_manual_pull_mode), then the override.
		self.leave_manual_pull_mode().await;
		{
			let mut state = self.state.lock().await;
			state.base_commit_override = None;
		}

		self.store.commit_current_changes("Sync after pull")?;
		let new_head = self.store.head_identity()?;
		{
			let mut state = self.state.lock().await;
			state.last_known_head = new_head.clone();
		}
		self.db.set_last_known_head(&new_head)?;
		Ok(())
	}

	/// Reconcile one target: scan both sides, resolve each tracked path, apply
	/// the resulting decision, and emit the relevant events.
	pub async fn reconcile_target(&self, target: &Target) -> Result<()> {
		let config = self.config.read().await.clone();

		match self.store.ensure_committed_before_comparison().await {
			Ok(conflicts) if !conflicts.is_empty() => {
				warn!(target_name = %target.name, count = conflicts.len(), "aborted an in-progress merge with unresolved conflicts before comparison");
			}
			Ok(_) => {}
			Err(e) => {
				self.events.emit(Event::SyncBlocked { target_id: target.id, reason: e.to_string() });
				return Err(e);
			}
		}

		let includes = PatternSet::includes(&[])?;
		let ignores = PatternSet::ignores(&[])?;

		let target_scan = match scan_with_admission(&target.local_path, &target.store_path, &includes, &ignores, &config) {
			Ok(s) => s,
			Err(e) => {
				self.events.emit(Event::SyncBlocked { target_id: target.id, reason: e.to_string() });
				return Err(e);
			}
		};

		let store_subtree = self.store.store_root().join(&target.store_path);
		let store_scan = match scan_with_admission(&store_subtree, &target.store_path, &includes, &ignores, &config) {
			Ok(s) => s,
			Err(_) => scan_admission::AdmittedScan { entries: Vec::new(), total_bytes: 0 },
		};

		let mut relative_paths: HashSet<String> = HashSet::new();
		relative_paths.extend(target_scan.entries.iter().map(|e| e.relative_path.clone()));
		relative_paths.extend(store_scan.entries.iter().map(|e| e.relative_path.clone()));
		relative_paths.extend(
			self.db
				.tracked_files_for_target(target.id)?
				.into_iter()
				.map(|tf| tf.relative_path),
		);

		let mut changed_paths = Vec::new();
		for relative_path in relative_paths {
			if self.reconcile_one_path(target, &relative_path).await? {
				changed_paths.push(relative_path);
			}
		}

		if !changed_paths.is_empty() {
			self.events.emit(Event::FilesChanged { target_id: target.id, relative_paths: changed_paths });
		}
		// Auto-commits are suppressed during a post-pull pass (§4.H.9): the
		// reprocessing loop commits once, synchronously, after every target
		// has been reprocessed, under the "Sync after pull" message.
		let pull_in_progress = self.state.lock().await.pull_sync_in_progress;
		if config.auto_commit_store && !pull_in_progress {
			self.store.commit_current_changes(&format!("sync: {}", target.store_path))?;
		}
		self.events.emit(Event::SyncComplete { target_id: target.id });
		Ok(())
	}

	async fn reconcile_one_path(&self, target: &Target, relative_path: &str) -> Result<bool> {
		let tracked = self.db.find_tracked_file(target.id, relative_path)?;

		let target_path = target.local_path.join(relative_path);
		let target_side = read_side(&target_path)?;

		let store_relative = format!("{}/{}", target.store_path, relative_path);
		let store_content = self.store.get_content_at_head(&store_relative)?;
		let store_side = match store_content {
			Some(content) => ObservedSide::present(content),
			None => ObservedSide::absent(),
		};

		// Baseline acquisition (§4.H.2 step 6): during a post-pull pass, the
		// baseline is always the pre-pull HEAD the override carries — that's
		// the whole point of `baseCommitOverride`. Outside a post-pull pass,
		// `@HEAD` is not a usable baseline (by the time we get here the store
		// side has already been committed-before-comparison, so it trivially
		// equals the current store content); instead we walk history for the
		// revision the tracked file was last known to agree with.
		let base_commit_override = self.state.lock().await.base_commit_override.clone();
		let post_pull = base_commit_override.is_some();
		let base_content = match &base_commit_override {
			Some(revision) => self.store.get_content_at_revision(&store_relative, revision)?,
			None => match &tracked {
				Some(tf) => match &tf.store_digest {
					Some(digest) => self.store.find_content_by_digest(&store_relative, digest).ok().flatten(),
					None => None,
				},
				None => None,
			},
		};

		let decision = reconcile_file(tracked.as_ref(), &store_side, &target_side, base_content.as_deref(), post_pull)?;

		self.apply_decision(target, relative_path, tracked, decision).await
	}

	async fn apply_decision(
		&self,
		target: &Target,
		relative_path: &str,
		tracked: Option<TrackedFile>,
		decision: FileDecision,
	) -> Result<bool> {
		let target_path = target.local_path.join(relative_path);
		let store_relative = format!("{}/{}", target.store_path, relative_path);
		let store_path = self.store.store_root().join(&store_relative);

		match decision {
			FileDecision::NoOp => Ok(false),

			FileDecision::Converged { content } => self.settle_converged(target, relative_path, tracked, content).await,

			FileDecision::PoisonedPull { revert_target, revert_store, conflict_store_content, conflict_target_content, conflict_merged_content } => {
				if let Some(content) = &revert_target {
					write_and_mark(&self.watcher, &target_path, content)?;
				}
				if let Some(content) = &revert_store {
					write_and_mark(&self.watcher, &store_path, content)?;
				}
				let tf = match tracked {
					Some(tf) => tf,
					None => TrackedFile::new(target.id, relative_path, SyncStatus::Conflict),
				};
				let mut tf = tf;
				tf.status = SyncStatus::Conflict;
				self.db.put_tracked_file(&tf)?;

				if let Some(conflict) = self.conflicts.create(
					tf.id,
					crate::types::ConflictKind::Conflict,
					Some(conflict_store_content),
					Some(conflict_target_content),
					None,
					Some(conflict_merged_content),
				)? {
					self.events.emit(Event::ConflictCreated { conflict });
				}
				Ok(true)
			}

			FileDecision::Untrack => {
				if let Some(tf) = tracked {
					self.db.remove_tracked_file(tf.id)?;
				}
				Ok(false)
			}

			FileDecision::PropagateToTarget { content } => {
				write_and_mark(&self.watcher, &target_path, &content)?;
				self.record_synced(target, relative_path, tracked, &content, true).await?;
				Ok(true)
			}

			FileDecision::PropagateToStore { content } => {
				write_and_mark(&self.watcher, &store_path, &content)?;
				self.record_synced(target, relative_path, tracked, &content, false).await?;
				Ok(true)
			}

			FileDecision::MergedBothSides { content } => {
				write_and_mark(&self.watcher, &target_path, &content)?;
				write_and_mark(&self.watcher, &store_path, &content)?;
				self.record_synced_both(target, relative_path, tracked, &content).await?;
				Ok(true)
			}

			FileDecision::PropagateDelete { kind } => {
				match kind {
					crate::types::ConflictKind::MissingInTarget => {
						let _ = std::fs::remove_file(&store_path);
					}
					crate::types::ConflictKind::MissingInStore => {
						let _ = std::fs::remove_file(&target_path);
					}
					crate::types::ConflictKind::Conflict => {}
				}
				if let Some(tf) = tracked {
					self.db.remove_tracked_file(tf.id)?;
				}
				Ok(true)
			}

			FileDecision::OpenConflict { kind, store_content, target_content, base_content } => {
				let tf = match tracked {
					Some(tf) => tf,
					None => TrackedFile::new(target.id, relative_path, SyncStatus::Conflict),
				};
				let mut tf = tf;
				tf.status = SyncStatus::Conflict;
				self.db.put_tracked_file(&tf)?;

				if let Some(conflict) = self.conflicts.create(tf.id, kind, store_content, target_content, base_content, None)? {
					self.events.emit(Event::ConflictCreated { conflict });
				}
				Ok(true)
			}
		}
	}

	async fn record_synced(
		&self,
		target: &Target,
		relative_path: &str,
		tracked: Option<TrackedFile>,
		content: &[u8],
		wrote_to_target: bool,
	) -> Result<()> {
		let digest = crate::util::digest_bytes(content);
		let now = Utc::now();
		let mut tf = tracked.unwrap_or_else(|| TrackedFile::new(target.id, relative_path, SyncStatus::Synced));
		tf.status = SyncStatus::Synced;
		tf.store_digest = Some(digest.clone());
		tf.target_digest = Some(digest);
		tf.last_reconciled_at = Some(now);
		if wrote_to_target {
			tf.target_mtime = mtime_of(&target.local_path.join(relative_path)).ok();
		} else {
			tf.store_mtime = mtime_of(&self.store.store_root().join(format!("{}/{}", target.store_path, relative_path))).ok();
		}
		self.db.put_tracked_file(&tf)?;
		self.events.emit(Event::SyncStatusChanged { target_id: target.id, relative_path: relative_path.to_string(), status: SyncStatus::Synced });
		Ok(())
	}

	async fn record_synced_both(&self, target: &Target, relative_path: &str, tracked: Option<TrackedFile>, content: &[u8]) -> Result<()> {
		self.record_synced(target, relative_path, tracked, content, true).await
	}

	/// Both sides now hold identical `content` (§4.H.2 step 4). Update
	/// bookkeeping and, per §4.H.4, either auto-clear a pending conflict whose
	/// captured sides both now match the converged content, or preserve it
	/// (digests still get refreshed) when only the locally-resolved side
	/// matches — the remote side still needs review.
	async fn settle_converged(&self, target: &Target, relative_path: &str, tracked: Option<TrackedFile>, content: Vec<u8>) -> Result<bool> {
		let digest = crate::util::digest_bytes(&content);
		let pending = match &tracked {
			Some(tf) => self.conflicts.pending_for(tf.id)?,
			None => None,
		};

		if let Some(conflict) = pending {
			let matches_store_capture = conflict.store_content.as_deref() == Some(content.as_slice());
			let matches_target_capture = conflict.target_content.as_deref() == Some(content.as_slice());

			if !matches_store_capture && matches_target_capture {
				let mut tf = tracked.expect("pending conflict implies a tracked file");
				let changed = tf.store_digest.as_deref() != Some(digest.as_str()) || tf.target_digest.as_deref() != Some(digest.as_str());
				tf.store_digest = Some(digest.clone());
				tf.target_digest = Some(digest);
				tf.target_mtime = mtime_of(&target.local_path.join(relative_path)).ok();
				tf.store_mtime = mtime_of(&self.store.store_root().join(format!("{}/{}", target.store_path, relative_path))).ok();
				tf.last_reconciled_at = Some(Utc::now());
				tf.status = SyncStatus::Conflict;
				self.db.put_tracked_file(&tf)?;
				return Ok(changed);
			}

			let resolved = self.conflicts.auto_clear(conflict, Utc::now())?;
			self.events.emit(Event::ConflictResolved { conflict: resolved });
		}

		let changed = tracked
			.as_ref()
			.map(|t| t.store_digest.as_deref() != Some(digest.as_str()) || t.target_digest.as_deref() != Some(digest.as_str()) || t.status != SyncStatus::Synced)
			.unwrap_or(true);
		self.record_synced(target, relative_path, tracked, &content, true).await?;
		Ok(changed)
	}
}

fn read_side(path: &Path) -> Result<ObservedSide> {
	match std::fs::symlink_metadata(path) {
		Ok(meta) if meta.file_type().is_symlink() => {
			let digest = digest_symlink(path)?;
			let link_target = std::fs::read_link(path).map_err(|e| crate::error::io_at(path, e))?;
			Ok(ObservedSide { content: Some(link_target.to_string_lossy().into_owned().into_bytes()), digest: Some(digest) })
		}
		Ok(_) => match std::fs::read(path) {
			Ok(content) => Ok(ObservedSide::present(content)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ObservedSide::absent()),
			Err(e) => Err(crate::error::io_at(path, e)),
		},
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ObservedSide::absent()),
		Err(e) => Err(crate::error::io_at(path, e)),
	}
}

fn write_and_mark(watcher: &Watcher, path: &Path, content: &[u8]) -> Result<()> {
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent).map_err(|e| crate::error::io_at(parent, e))?;
	}
	watcher.mark_self_change(path);
	std::fs::write(path, content).map_err(|e| crate::error::io_at(path, e))
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	async fn make_reconciler() -> (TempDir, TempDir, Arc<Reconciler>) {
		let db_dir = TempDir::new().unwrap();
		let store_dir = TempDir::new().unwrap();
		let db = Arc::new(Db::open(&db_dir.path().join("state.redb")).unwrap());
		let store = Arc::new(StoreGateway::initialize(store_dir.path()).unwrap());
		let (watcher, _rx) = Watcher::new(50).unwrap();
		let reconciler = Reconciler::new(db, store, watcher, Config::default()).await.unwrap();
		(db_dir, store_dir, reconciler)
	}

	#[tokio::test]
	async fn reconcile_target_propagates_new_target_file_into_store() {
		let (_db_dir, store_dir, reconciler) = make_reconciler().await;
		let target_dir = TempDir::new().unwrap();
		std::fs::write(target_dir.path().join("hello.txt"), b"hi").unwrap();

		let target = Target::new_repo("demo", target_dir.path(), "demo");
		reconciler.db.put_target(&target).unwrap();
		reconciler.reconcile_target(&target).await.unwrap();

		let stored = std::fs::read(store_dir.path().join("repos/demo/hello.txt")).unwrap();
		assert_eq!(stored, b"hi");

		let tracked = reconciler.db.find_tracked_file(target.id, "hello.txt").unwrap().unwrap();
		assert_eq!(tracked.status, SyncStatus::Synced);
	}

	#[tokio::test]
	async fn reconcile_target_propagates_new_store_file_into_target() {
		let (_db_dir, store_dir, reconciler) = make_reconciler().await;
		let target_dir = TempDir::new().unwrap();
		std::fs::create_dir_all(store_dir.path().join("repos/demo")).unwrap();
		std::fs::write(store_dir.path().join("repos/demo/seed.txt"), b"seed").unwrap();
		reconciler.store.commit_current_changes("seed").unwrap();

		let target = Target::new_repo("demo", target_dir.path(), "demo");
		reconciler.db.put_target(&target).unwrap();
		reconciler.reconcile_target(&target).await.unwrap();

		let on_disk = std::fs::read(target_dir.path().join("seed.txt")).unwrap();
		assert_eq!(on_disk, b"seed");
	}
}

// vim: ts=4
