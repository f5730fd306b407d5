//! Runtime configuration for one reconciler instance (§10.C, §6 settings keys).
#![allow(dead_code)]

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The already-resolved runtime configuration for one engine instance.
///
/// Building a `Config` from on-disk settings, environment variables, or CLI
/// flags is the out-of-scope configuration-bootstrap layer; this struct and
/// `Config::merge_settings` are the pure surface this crate owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	/// Root of the versioned store.
	pub store_root: PathBuf,
	/// Poll period for the reconciler's self-chaining timer (`sync_interval_ms`).
	pub sync_interval_ms: u64,
	/// Watcher debounce window (`watch_debounce_ms`).
	pub watch_debounce_ms: u64,
	/// When false, event-driven reconciles are inhibited; polling still runs.
	pub auto_sync: bool,
	/// When true, the reconciler queues a commit for every write.
	pub auto_commit_store: bool,
	pub size_warning_mb: u64,
	pub size_danger_mb: u64,
	pub size_blocked_mb: u64,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			store_root: PathBuf::from("."),
			sync_interval_ms: 5_000,
			watch_debounce_ms: 300,
			auto_sync: true,
			auto_commit_store: true,
			size_warning_mb: 20,
			size_danger_mb: 50,
			size_blocked_mb: 100,
		}
	}
}

impl Config {
	pub fn size_blocked_bytes(&self) -> u64 {
		self.size_blocked_mb * 1024 * 1024
	}

	/// Merge a subset of recognized settings-projection keys (§6) into this
	/// config, in place. Unrecognized keys are ignored; `schema_version` is
	/// never consulted here (callers skip it before calling, per §4.F).
	pub fn merge_settings(&mut self, settings: &std::collections::BTreeMap<String, String>) {
		for (key, value) in settings {
			match key.as_str() {
				"sync_interval_ms" => {
					if let Ok(v) = value.parse() {
						self.sync_interval_ms = v;
					}
				}
				"watch_debounce_ms" => {
					if let Ok(v) = value.parse() {
						self.watch_debounce_ms = v;
					}
				}
				"auto_sync" => self.auto_sync = value == "true",
				"auto_commit_store" => self.auto_commit_store = value == "true",
				"size_warning_mb" => {
					if let Ok(v) = value.parse() {
						self.size_warning_mb = v;
					}
				}
				"size_danger_mb" => {
					if let Ok(v) = value.parse() {
						self.size_danger_mb = v;
					}
				}
				"size_blocked_mb" => {
					if let Ok(v) = value.parse() {
						self.size_blocked_mb = v;
					}
				}
				_ => {}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::BTreeMap;

	#[test]
	fn default_matches_documented_defaults() {
		let c = Config::default();
		assert_eq!(c.sync_interval_ms, 5_000);
		assert_eq!(c.watch_debounce_ms, 300);
		assert!(c.auto_sync);
		assert!(c.auto_commit_store);
		assert_eq!((c.size_warning_mb, c.size_danger_mb, c.size_blocked_mb), (20, 50, 100));
	}

	#[test]
	fn size_blocked_bytes_converts_mb_to_bytes() {
		let c = Config::default();
		assert_eq!(c.size_blocked_bytes(), 100 * 1024 * 1024);
	}

	#[test]
	fn merge_settings_overrides_recognized_keys() {
		let mut c = Config::default();
		let mut settings = BTreeMap::new();
		settings.insert("auto_sync".to_string(), "false".to_string());
		settings.insert("size_warning_mb".to_string(), "7".to_string());
		c.merge_settings(&settings);
		assert!(!c.auto_sync);
		assert_eq!(c.size_warning_mb, 7);
	}

	#[test]
	fn merge_settings_ignores_unrecognized_keys() {
		let mut c = Config::default();
		let mut settings = BTreeMap::new();
		settings.insert("schema_version".to_string(), "3".to_string());
		c.merge_settings(&settings);
		assert_eq!(c, Config::default());
	}

	#[test]
	fn serde_round_trip_preserves_values() {
		let c = Config { sync_interval_ms: 1234, ..Config::default() };
		let json = serde_json::to_string(&c).unwrap();
		let back: Config = serde_json::from_str(&json).unwrap();
		assert_eq!(c, back);
	}
}

// vim: ts=4
