//! Store repository gateway (§4.C): the only surface through which the
//! reconciler touches the external version-control backend.
pub mod merge;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::{GatewayError, Result, SyncError};
use crate::logging::*;

pub use merge::{contains_conflict_markers, parse_conflict_markers, parse_conflict_markers_bytes, three_way_merge, MergeOutcome};

const PRIVATE_DATA_DIR: &str = ".db";
const MANIFEST_FILE: &str = "machines.json";
/// Small, known set of machine-wide config files whose conflicts during pull
/// are surfaced to the caller instead of left for per-file reconciliation.
const KNOWN_MANIFEST_BASENAMES: &[&str] = &[MANIFEST_FILE];
const DEBOUNCE_COMMIT_WINDOW: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct FileConflict {
	pub path: String,
	pub ours: Vec<u8>,
	pub theirs: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PulledManifestConflict {
	pub file: String,
	pub content: Vec<u8>,
	pub ours: Vec<u8>,
	pub theirs: Vec<u8>,
}

#[derive(Default)]
struct PendingBatch {
	messages: Vec<String>,
	generation: u64,
}

/// Wraps the version-control backend behind the store: a single local `git2`
/// repository. Every operation the reconciler needs is exposed here; nothing
/// else touches `git2` directly.
pub struct StoreGateway {
	repo: git2::Repository,
	store_root: PathBuf,
	pending: Mutex<PendingBatch>,
	flush_lock: Mutex<()>,
}

impl StoreGateway {
	/// Ensure the store directory exists, is a repository, ignores the
	/// private data subdirectory, and holds the multi-machine manifest.
	pub fn initialize(store_root: &Path) -> Result<Self> {
		std::fs::create_dir_all(store_root).map_err(|e| crate::error::io_at(store_root, e))?;
		let repo = match git2::Repository::open(store_root) {
			Ok(repo) => repo,
			Err(_) => git2::Repository::init(store_root)?,
		};

		let gitignore_path = store_root.join(".gitignore");
		let ignore_entry = format!("{}/", PRIVATE_DATA_DIR);
		let existing = std::fs::read_to_string(&gitignore_path).unwrap_or_default();
		if !existing.lines().any(|l| l.trim() == ignore_entry) {
			let mut updated = existing;
			if !updated.is_empty() && !updated.ends_with('\n') {
				updated.push('\n');
			}
			updated.push_str(&ignore_entry);
			updated.push('\n');
			std::fs::write(&gitignore_path, updated).map_err(|e| crate::error::io_at(&gitignore_path, e))?;
		}

		let manifest_path = store_root.join(MANIFEST_FILE);
		if !manifest_path.exists() {
			let manifest = serde_json::json!({ "machines": {}, "repos": {}, "services": {} });
			std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)
				.map_err(|e| crate::error::io_at(&manifest_path, e))?;
		}

		std::fs::create_dir_all(store_root.join(PRIVATE_DATA_DIR)).map_err(|e| crate::error::io_at(store_root, e))?;

		Ok(StoreGateway {
			repo,
			store_root: store_root.to_path_buf(),
			pending: Mutex::new(PendingBatch::default()),
			flush_lock: Mutex::new(()),
		})
	}

	pub fn store_root(&self) -> &Path {
		&self.store_root
	}

	fn signature(&self) -> git2::Signature<'static> {
		self.repo
			.signature()
			.unwrap_or_else(|_| git2::Signature::now("sync-engine", "sync-engine@local").unwrap())
	}

	/// Get content at HEAD; `None` if the path has never been committed.
	pub fn get_content_at_head(&self, relative_path: &str) -> Result<Option<Vec<u8>>> {
		self.get_content_at_revision(relative_path, "HEAD")
	}

	/// Walk HEAD's history looking for the most recent commit where
	/// `relative_path`'s content hashes to `digest` (our truncated digest,
	/// §4.A). Used to recover the three-way-merge base when a tracked file's
	/// last-synced revision wasn't recorded explicitly.
	pub fn find_content_by_digest(&self, relative_path: &str, digest: &str) -> Result<Option<Vec<u8>>> {
		let mut revwalk = match self.repo.revwalk() {
			Ok(r) => r,
			Err(_) => return Ok(None),
		};
		if revwalk.push_head().is_err() {
			return Ok(None);
		}
		for oid in revwalk {
			let oid = oid?;
			let commit = self.repo.find_commit(oid)?;
			let tree = commit.tree()?;
			if let Ok(entry) = tree.get_path(Path::new(relative_path)) {
				let blob = self.repo.find_blob(entry.id())?;
				if crate::util::digest_bytes(blob.content()) == digest {
					return Ok(Some(blob.content().to_vec()));
				}
			}
		}
		Ok(None)
	}

	pub fn get_content_at_revision(&self, relative_path: &str, revision: &str) -> Result<Option<Vec<u8>>> {
		let commit = match self.repo.revparse_single(revision).and_then(|o| o.peel_to_commit()) {
			Ok(c) => c,
			Err(_) => return Ok(None),
		};
		let tree = commit.tree()?;
		match tree.get_path(Path::new(relative_path)) {
			Ok(entry) => {
				let blob = self.repo.find_blob(entry.id())?;
				Ok(Some(blob.content().to_vec()))
			}
			Err(_) => Ok(None),
		}
	}

	fn stage_all(&self) -> Result<()> {
		let mut index = self.repo.index()?;
		index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
		index.write()?;
		Ok(())
	}

	fn working_tree_differs_from_head(&self) -> Result<bool> {
		let mut opts = git2::StatusOptions::new();
		opts.include_untracked(true).recurse_untracked_dirs(true);
		let statuses = self.repo.statuses(Some(&mut opts))?;
		Ok(!statuses.is_empty())
	}

	fn commit_staged(&self, message: &str) -> Result<git2::Oid> {
		let mut index = self.repo.index()?;
		let tree_oid = index.write_tree()?;
		let tree = self.repo.find_tree(tree_oid)?;
		let sig = self.signature();
		let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
		let parents: Vec<&git2::Commit> = parent.iter().collect();
		let oid = self.repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
		Ok(oid)
	}

	/// Stage and commit everything that differs, with the given message;
	/// a no-op if the working tree matches HEAD.
	pub fn commit_current_changes(&self, message: &str) -> Result<()> {
		self.stage_all()?;
		if !self.working_tree_differs_from_head()? {
			return Ok(());
		}
		self.commit_staged(message)?;
		Ok(())
	}

	fn coalesce(messages: Vec<String>) -> String {
		let mut counts: HashMap<&str, u32> = HashMap::new();
		let mut order: Vec<String> = Vec::new();
		for m in &messages {
			if !counts.contains_key(m.as_str()) {
				order.push(m.clone());
			}
			*counts.entry(m.as_str()).or_insert(0) += 1;
		}
		order
			.into_iter()
			.map(|m| {
				let n = counts[m.as_str()];
				if n > 1 { format!("{} (x{})", m, n) } else { m }
			})
			.collect::<Vec<_>>()
			.join("; ")
	}

	async fn flush_messages(&self, messages: Vec<String>) -> Result<()> {
		if messages.is_empty() {
			return Ok(());
		}
		let _guard = self.flush_lock.lock().await;
		let message = Self::coalesce(messages);
		self.commit_current_changes(&message)
	}

	/// Append a message to the pending batch and (re)arm the 2-second debounce
	/// timer; on fire, coalesce messages into one commit.
	pub async fn queue_commit(self: &Arc<Self>, message: impl Into<String>) {
		let message = message.into();
		let generation = {
			let mut pending = self.pending.lock().await;
			pending.messages.push(message);
			pending.generation += 1;
			pending.generation
		};
		let gateway = Arc::clone(self);
		tokio::spawn(async move {
			tokio::time::sleep(DEBOUNCE_COMMIT_WINDOW).await;
			let messages = {
				let mut pending = gateway.pending.lock().await;
				if pending.generation != generation {
					return;
				}
				pending.generation = 0;
				std::mem::take(&mut pending.messages)
			};
			if let Err(e) = gateway.flush_messages(messages).await {
				error!("debounced commit failed: {}", e);
			}
		});
	}

	/// Immediately collapse any pending batch into a commit.
	pub async fn flush_queued_commits(&self) -> Result<()> {
		let messages = {
			let mut pending = self.pending.lock().await;
			pending.generation += 1;
			std::mem::take(&mut pending.messages)
		};
		self.flush_messages(messages).await
	}

	fn collect_index_conflicts(&self) -> Result<Vec<FileConflict>> {
		let index = self.repo.index()?;
		let mut out = Vec::new();
		for conflict in index.conflicts()? {
			let conflict = conflict?;
			let path_bytes = conflict
				.our
				.as_ref()
				.or(conflict.their.as_ref())
				.map(|e| e.path.clone());
			let Some(path_bytes) = path_bytes else { continue };
			let path = String::from_utf8_lossy(&path_bytes).into_owned();
			let ours = match &conflict.our {
				Some(entry) => self.repo.find_blob(entry.id)?.content().to_vec(),
				None => Vec::new(),
			};
			let theirs = match &conflict.their {
				Some(entry) => self.repo.find_blob(entry.id)?.content().to_vec(),
				None => Vec::new(),
			};
			out.push(FileConflict { path, ours, theirs });
		}
		Ok(out)
	}

	/// Flush the queue, then if the working tree still differs from HEAD,
	/// commit it with a synthetic message. If the underlying VCS is mid-merge
	/// with unresolved conflicts, abort the merge and return them.
	pub async fn ensure_committed_before_comparison(&self) -> Result<Vec<FileConflict>> {
		self.flush_queued_commits().await?;
		if self.repo.state() != git2::RepositoryState::Clean {
			let conflicts = self.collect_index_conflicts()?;
			self.repo.cleanup_state()?;
			return Ok(conflicts);
		}
		if self.working_tree_differs_from_head()? {
			self.commit_current_changes("Auto-checkpoint before comparison")?;
		}
		Ok(Vec::new())
	}

	/// A stable identifier for HEAD; empty string on an unborn HEAD (no commits yet).
	pub fn head_identity(&self) -> Result<String> {
		match self.repo.head() {
			Ok(head) => match head.peel_to_commit() {
				Ok(commit) => Ok(commit.id().to_string()),
				Err(_) => Ok(String::new()),
			},
			Err(_) => Ok(String::new()),
		}
	}

	fn resolve_remote_name(&self) -> std::result::Result<String, GatewayError> {
		if let Ok(head) = self.repo.head() {
			if let Some(branch_name) = head.shorthand() {
				if let Ok(buf) = self.repo.branch_upstream_remote(&format!("refs/heads/{}", branch_name)) {
					if let Some(name) = buf.as_str() {
						return Ok(name.to_string());
					}
				}
			}
		}
		let remotes = self.repo.remotes().map_err(GatewayError::from)?;
		if remotes.iter().flatten().any(|r| r == "origin") {
			return Ok("origin".to_string());
		}
		if let Some(first) = remotes.iter().flatten().next() {
			return Ok(first.to_string());
		}
		Err(GatewayError::NoRemote)
	}

	/// Pull from the resolved remote. Returns conflicted machine-wide manifest
	/// files (by basename) so the caller can resolve them before proceeding.
	pub fn pull(&self) -> Result<Vec<PulledManifestConflict>> {
		let remote_name = self.resolve_remote_name()?;
		let mut remote = self.repo.find_remote(&remote_name)?;
		remote.fetch(&[] as &[&str], None, None)?;

		let fetch_head = self.repo.find_reference("FETCH_HEAD")?;
		let fetch_commit = self.repo.reference_to_annotated_commit(&fetch_head)?;
		let analysis = self.repo.merge_analysis(&[&fetch_commit])?;

		if analysis.0.is_up_to_date() {
			return Ok(Vec::new());
		}

		if analysis.0.is_fast_forward() {
			let refname = self.repo.head()?.name().map(|s| s.to_string());
			if let Some(refname) = refname {
				let mut reference = self.repo.find_reference(&refname)?;
				reference.set_target(fetch_commit.id(), "fast-forward")?;
				self.repo.set_head(&refname)?;
				self.repo.checkout_head(Some(git2::build::CheckoutBuilder::default().force()))?;
			}
			return Ok(Vec::new());
		}

		let head_commit = self.repo.head()?.peel_to_commit()?;
		self.repo.merge(&[&fetch_commit], None, None)?;

		if self.repo.index()?.has_conflicts() {
			let conflicts = self.collect_index_conflicts()?;
			let manifest_conflicts = conflicts
				.into_iter()
				.filter(|c| KNOWN_MANIFEST_BASENAMES.iter().any(|k| c.path.ends_with(k)))
				.map(|c| PulledManifestConflict { file: c.path.clone(), content: c.ours.clone(), ours: c.ours, theirs: c.theirs })
				.collect();
			return Ok(manifest_conflicts);
		}

		let mut index = self.repo.index()?;
		let tree_oid = index.write_tree()?;
		let tree = self.repo.find_tree(tree_oid)?;
		let fetch_commit_obj = self.repo.find_commit(fetch_commit.id())?;
		let sig = self.signature();
		self.repo.commit(Some("HEAD"), &sig, &sig, "Merge remote changes", &tree, &[&head_commit, &fetch_commit_obj])?;
		self.repo.cleanup_state()?;
		Ok(Vec::new())
	}

	/// Push HEAD to the resolved remote.
	pub fn push(&self) -> Result<()> {
		let remote_name = self.resolve_remote_name()?;
		let mut remote = self.repo.find_remote(&remote_name)?;
		let head = self.repo.head()?;
		let refname = head.name().ok_or_else(|| GatewayError::NotFound("HEAD has no name".into()))?;
		remote.push(&[refname], None)?;
		Ok(())
	}
}


// vim: ts=4
