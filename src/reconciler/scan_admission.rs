//! Scan-time size admission (§4.H.10): a target whose total tracked size
//! exceeds the blocked threshold is refused outright rather than partially
//! synced.
use std::path::Path;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::pattern::PatternSet;
use crate::scanner::{self, ScannedEntry};

pub struct AdmittedScan {
	pub entries: Vec<ScannedEntry>,
	pub total_bytes: u64,
}

/// Scan `root`, summing file sizes as it goes. If the running total crosses
/// `config.size_blocked_bytes()`, the whole target is refused (§4.H.10) —
/// partially-admitted scans are not a thing this reconciler produces.
pub fn scan_with_admission(
	root: &Path,
	target_label: &str,
	includes: &PatternSet,
	ignores: &PatternSet,
	config: &Config,
) -> Result<AdmittedScan> {
	let entries = scanner::scan(root, includes, ignores)?;
	let limit = config.size_blocked_bytes();
	let mut total_bytes: u64 = 0;

	for entry in &entries {
		let path = root.join(&entry.relative_path);
		let size = std::fs::symlink_metadata(&path).map(|m| m.len()).unwrap_or(0);
		total_bytes = total_bytes.saturating_add(size);
		if total_bytes > limit {
			return Err(SyncError::Admission {
				target: target_label.to_string(),
				size_bytes: total_bytes,
				limit_bytes: limit,
			});
		}
	}

	Ok(AdmittedScan { entries, total_bytes })
}


// vim: ts=4
