//! Filesystem watcher (§4.E): adapts OS-level change notifications into the
//! four semantic change events the reconciler dispatches on, with debouncing
//! and a self-change suppression window so writes the reconciler itself made
//! don't bounce back as new events.
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{RecursiveMode, Watcher as NotifyWatcherTrait};
use tokio::sync::mpsc;

use crate::error::{Result, SyncError};
use crate::logging::*;

const SELF_CHANGE_TTL: Duration = Duration::from_secs(10);
const SELF_CHANGE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeScope {
	StoreChange,
	TargetChange,
	ServiceStoreChange,
	ServiceTargetChange,
}

impl ChangeScope {
	fn debounce_prefix(&self) -> &'static str {
		match self {
			ChangeScope::StoreChange => "store",
			ChangeScope::TargetChange => "target",
			ChangeScope::ServiceStoreChange => "serviceStore",
			ChangeScope::ServiceTargetChange => "serviceTarget",
		}
	}
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
	pub scope: ChangeScope,
	pub key: String,
	pub path: PathBuf,
}

struct WatchRoute {
	root: PathBuf,
	scope: ChangeScope,
	key: String,
}

/// Adapts raw filesystem events into debounced semantic `ChangeEvent`s.
pub struct Watcher {
	inner: Mutex<notify::RecommendedWatcher>,
	routes: Arc<Mutex<Vec<WatchRoute>>>,
	generations: Arc<Mutex<HashMap<String, u64>>>,
	self_changes: Arc<Mutex<HashMap<PathBuf, Instant>>>,
	debounce_ms: u64,
	rt_handle: tokio::runtime::Handle,
}

impl Watcher {
	pub fn new(debounce_ms: u64) -> Result<(Arc<Self>, mpsc::Receiver<ChangeEvent>)> {
		let (tx, rx) = mpsc::channel(256);
		let routes: Arc<Mutex<Vec<WatchRoute>>> = Arc::new(Mutex::new(Vec::new()));
		let generations: Arc<Mutex<HashMap<String, u64>>> = Arc::new(Mutex::new(HashMap::new()));
		let self_changes: Arc<Mutex<HashMap<PathBuf, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
		let rt_handle = tokio::runtime::Handle::current();

		let routes_cb = Arc::clone(&routes);
		let generations_cb = Arc::clone(&generations);
		let self_changes_cb = Arc::clone(&self_changes);
		let rt_handle_cb = rt_handle.clone();
		let tx_cb = tx.clone();

		let notify_watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
			let event = match res {
				Ok(e) => e,
				Err(e) => {
					warn!("watcher error: {}", e);
					return;
				}
			};
			for path in event.paths {
				if let Some(route_key) = Self::route_for(&routes_cb, &path) {
					Self::handle_raw_event(
						route_key,
						path,
						Arc::clone(&generations_cb),
						Arc::clone(&self_changes_cb),
						tx_cb.clone(),
						debounce_ms,
						rt_handle_cb.clone(),
					);
				}
			}
		})
		.map_err(|e| SyncError::Watcher(e.to_string()))?;

		let watcher = Arc::new(Watcher {
			inner: Mutex::new(notify_watcher),
			routes,
			generations,
			self_changes,
			debounce_ms,
			rt_handle,
		});

		let sweep_target = Arc::clone(&watcher);
		watcher.rt_handle.spawn(async move {
			sweep_loop(sweep_target).await;
		});

		Ok((watcher, rx))
	}

	fn route_for(routes: &Arc<Mutex<Vec<WatchRoute>>>, path: &Path) -> Option<(ChangeScope, String, PathBuf)> {
		let routes = routes.lock().unwrap();
		routes
			.iter()
			.filter(|r| path.starts_with(&r.root))
			.max_by_key(|r| r.root.as_os_str().len())
			.map(|r| (r.scope, r.key.clone(), path.to_path_buf()))
	}

	#[allow(clippy::too_many_arguments)]
	fn handle_raw_event(
		(scope, key, path): (ChangeScope, String, PathBuf),
		_orig_path: PathBuf,
		generations: Arc<Mutex<HashMap<String, u64>>>,
		self_changes: Arc<Mutex<HashMap<PathBuf, Instant>>>,
		tx: mpsc::Sender<ChangeEvent>,
		debounce_ms: u64,
		rt_handle: tokio::runtime::Handle,
	) {
		{
			let mut changes = self_changes.lock().unwrap();
			if let Some(marked_at) = changes.get(&path) {
				if marked_at.elapsed() < SELF_CHANGE_TTL {
					changes.remove(&path);
					return;
				}
			}
		}

		let debounce_key = format!("{}:{}", scope.debounce_prefix(), key);
		let generation = {
			let mut gens = generations.lock().unwrap();
			let entry = gens.entry(debounce_key.clone()).or_insert(0);
			*entry += 1;
			*entry
		};

		rt_handle.spawn(async move {
			tokio::time::sleep(Duration::from_millis(debounce_ms)).await;
			let still_current = {
				let gens = generations.lock().unwrap();
				gens.get(&debounce_key) == Some(&generation)
			};
			if !still_current {
				return;
			}
			let _ = tx.send(ChangeEvent { scope, key, path }).await;
		});
	}

	/// Start watching `root` recursively, reporting changes under the given
	/// scope and key (e.g. a target id, or a repo/service slug).
	pub fn watch(&self, root: &Path, scope: ChangeScope, key: impl Into<String>) -> Result<()> {
		let key = key.into();
		self.inner
			.lock()
			.unwrap()
			.watch(root, RecursiveMode::Recursive)
			.map_err(|e| SyncError::Watcher(e.to_string()))?;
		self.routes.lock().unwrap().push(WatchRoute { root: root.to_path_buf(), scope, key });
		Ok(())
	}

	pub fn unwatch(&self, root: &Path) -> Result<()> {
		self.inner
			.lock()
			.unwrap()
			.unwatch(root)
			.map_err(|e| SyncError::Watcher(e.to_string()))?;
		self.routes.lock().unwrap().retain(|r| r.root != root);
		Ok(())
	}

	/// Mark a path as having just been written by the reconciler itself, so
	/// the notification that follows is suppressed instead of re-dispatched.
	pub fn mark_self_change(&self, path: &Path) {
		self.self_changes.lock().unwrap().insert(path.to_path_buf(), Instant::now());
	}

	/// Discard all pending store-side debounce timers (store + service-store),
	/// used before a pull so in-flight local-change timers don't race the
	/// post-pull reconcile (§4.H.9).
	pub fn clear_store_debounce_timers(&self) {
		let mut gens = self.generations.lock().unwrap();
		gens.retain(|key, _| !(key.starts_with("store:") || key.starts_with("serviceStore:")));
	}

	pub fn debounce_ms(&self) -> u64 {
		self.debounce_ms
	}
}

async fn sweep_loop(watcher: Arc<Watcher>) {
	loop {
		tokio::time::sleep(SELF_CHANGE_SWEEP_INTERVAL).await;
		let mut changes = watcher.self_changes.lock().unwrap();
		changes.retain(|_, marked_at| marked_at.elapsed() < SELF_CHANGE_TTL);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn mark_self_change_suppresses_matching_event() {
		let (watcher, _rx) = Watcher::new(50).unwrap();
		let path = PathBuf::from("/tmp/example/file.txt");
		watcher.mark_self_change(&path);
		assert!(watcher.self_changes.lock().unwrap().contains_key(&path));
	}

	#[tokio::test]
	async fn clear_store_debounce_timers_only_clears_store_scoped_keys() {
		let (watcher, _rx) = Watcher::new(50).unwrap();
		watcher.generations.lock().unwrap().insert("store:repo1".to_string(), 1);
		watcher.generations.lock().unwrap().insert("serviceStore:svc1".to_string(), 1);
		watcher.generations.lock().unwrap().insert("target:repo1".to_string(), 1);
		watcher.clear_store_debounce_timers();
		let gens = watcher.generations.lock().unwrap();
		assert!(!gens.contains_key("store:repo1"));
		assert!(!gens.contains_key("serviceStore:svc1"));
		assert!(gens.contains_key("target:repo1"));
	}

	#[tokio::test]
	async fn watch_and_receive_change_event_for_real_directory() {
		let dir = tempfile::TempDir::new().unwrap();
		let (watcher, mut rx) = Watcher::new(30).unwrap();
		watcher.watch(dir.path(), ChangeScope::TargetChange, "t1").unwrap();

		tokio::time::sleep(Duration::from_millis(100)).await;
		std::fs::write(dir.path().join("new.txt"), "hi").unwrap();

		let event = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await;
		assert!(event.is_ok(), "expected a change event within timeout");
		let event = event.unwrap().expect("channel should not be closed");
		assert_eq!(event.scope, ChangeScope::TargetChange);
		assert_eq!(event.key, "t1");
	}
}

// vim: ts=4
