//! Settings projection (§4.F): the canonical, human-editable `sync-settings.json`.
use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toggle {
	Enabled,
	Disabled,
}

impl Toggle {
	pub fn from_bool(b: bool) -> Self {
		if b { Toggle::Enabled } else { Toggle::Disabled }
	}

	pub fn is_enabled(self) -> bool {
		matches!(self, Toggle::Enabled)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEntry {
	pub pattern: String,
	pub enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoOverride {
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub settings: BTreeMap<String, String>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub file_pattern_overrides: BTreeMap<String, Toggle>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub file_pattern_local: BTreeMap<String, Toggle>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub ignore_pattern_overrides: BTreeMap<String, Toggle>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub ignore_pattern_local: BTreeMap<String, Toggle>,
}

impl RepoOverride {
	pub fn is_empty(&self) -> bool {
		self.settings.is_empty()
			&& self.file_pattern_overrides.is_empty()
			&& self.file_pattern_local.is_empty()
			&& self.ignore_pattern_overrides.is_empty()
			&& self.ignore_pattern_local.is_empty()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceOverride {
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub pattern_defaults: BTreeMap<String, Toggle>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub pattern_custom: BTreeMap<String, Toggle>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub ignore_overrides: BTreeMap<String, Toggle>,
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub ignore_custom: BTreeMap<String, Toggle>,
}

impl ServiceOverride {
	pub fn is_empty(&self) -> bool {
		self.pattern_defaults.is_empty()
			&& self.pattern_custom.is_empty()
			&& self.ignore_overrides.is_empty()
			&& self.ignore_custom.is_empty()
	}
}

/// The `sync-settings.json` shape, always written in deterministic order (§3 invariant 7).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsProjection {
	pub settings: BTreeMap<String, String>,
	pub file_patterns: Vec<PatternEntry>,
	pub ignore_patterns: Vec<PatternEntry>,
	pub repo_overrides: BTreeMap<String, RepoOverride>,
	pub service_overrides: BTreeMap<String, ServiceOverride>,
}

const SCHEMA_VERSION_KEY: &str = "schema_version";

impl SettingsProjection {
	/// Sort pattern lists and drop empty-bodied overrides, matching invariant 7.
	pub fn canonicalize(&mut self) {
		self.file_patterns.sort_by(|a, b| a.pattern.cmp(&b.pattern));
		self.ignore_patterns.sort_by(|a, b| a.pattern.cmp(&b.pattern));
		self.settings.remove(SCHEMA_VERSION_KEY);
		self.repo_overrides.retain(|_, v| !v.is_empty());
		self.service_overrides.retain(|_, v| !v.is_empty());
	}

	/// Write the projection to `sync-settings.json` at `store_root`. Returns the
	/// relative path that should be committed by the caller (§4.F queues a commit
	/// "Update sync-settings.json"; committing is the store gateway's job, not
	/// this module's).
	pub fn write_to(&mut self, store_root: &Path) -> Result<std::path::PathBuf> {
		self.canonicalize();
		let path = store_root.join("sync-settings.json");
		let json = serde_json::to_string_pretty(self)?;
		std::fs::write(&path, json).map_err(|e| crate::error::io_at(&path, e))?;
		Ok(path)
	}

	/// Read the projection from `sync-settings.json`, tolerating a missing or
	/// malformed file by returning an empty projection (§4.F).
	pub fn read_from(store_root: &Path) -> Self {
		let path = store_root.join("sync-settings.json");
		let Ok(bytes) = std::fs::read(&path) else {
			return Self::default();
		};
		serde_json::from_slice(&bytes).unwrap_or_default()
	}
}

/// The live, in-memory settings state that the projection is exported from
/// and restored into. Owned by the reconciler; persisted separately via the
/// typed tables in `db.rs`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedSettings {
	pub global: BTreeMap<String, String>,
	pub file_patterns: BTreeMap<String, bool>,
	pub ignore_patterns: BTreeMap<String, bool>,
	pub repo_overrides: BTreeMap<String, RepoOverride>,
	pub service_overrides: BTreeMap<String, ServiceOverride>,
}

impl PersistedSettings {
	pub fn export(&self) -> SettingsProjection {
		let mut projection = SettingsProjection {
			settings: self.global.clone(),
			file_patterns: self
				.file_patterns
				.iter()
				.map(|(pattern, enabled)| PatternEntry { pattern: pattern.clone(), enabled: *enabled })
				.collect(),
			ignore_patterns: self
				.ignore_patterns
				.iter()
				.map(|(pattern, enabled)| PatternEntry { pattern: pattern.clone(), enabled: *enabled })
				.collect(),
			repo_overrides: self.repo_overrides.clone(),
			service_overrides: self.service_overrides.clone(),
		};
		projection.canonicalize();
		projection
	}

	/// Restore from a projection. Global settings skip `schema_version`.
	/// Pattern lists replace existing lists only if non-empty in the
	/// projection (migration-friendly per §4.F).
	pub fn restore(&mut self, projection: &SettingsProjection) {
		for (key, value) in &projection.settings {
			if key == SCHEMA_VERSION_KEY {
				continue;
			}
			self.global.insert(key.clone(), value.clone());
		}
		if !projection.file_patterns.is_empty() {
			self.file_patterns =
				projection.file_patterns.iter().map(|e| (e.pattern.clone(), e.enabled)).collect();
		}
		if !projection.ignore_patterns.is_empty() {
			self.ignore_patterns =
				projection.ignore_patterns.iter().map(|e| (e.pattern.clone(), e.enabled)).collect();
		}
		self.repo_overrides = projection.repo_overrides.clone();
		self.service_overrides = projection.service_overrides.clone();
	}

	/// Restore-or-migrate: restore from `store_root`'s projection file if it
	/// exists, otherwise export the current state to it.
	pub fn restore_or_migrate(&mut self, store_root: &Path) -> Result<()> {
		let path = store_root.join("sync-settings.json");
		if path.exists() {
			let projection = SettingsProjection::read_from(store_root);
			self.restore(&projection);
		} else {
			self.export().write_to(store_root)?;
		}
		Ok(())
	}

	pub fn update_global(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.global.insert(key.into(), value.into());
	}

	pub fn update_repo(&mut self, store_path: impl Into<String>, repo_override: RepoOverride) {
		self.repo_overrides.insert(store_path.into(), repo_override);
	}

	pub fn update_service(&mut self, store_path: impl Into<String>, service_override: ServiceOverride) {
		self.service_overrides.insert(store_path.into(), service_override);
	}

	pub fn remove_repo(&mut self, store_path: &str) {
		self.repo_overrides.remove(store_path);
	}

	pub fn remove_service(&mut self, store_path: &str) {
		self.service_overrides.remove(store_path);
	}
}


// vim: ts=4
