//! Pattern-matcher facade (§4.B).
//!
//! Ignore patterns are expanded once, before use, so a bare pattern like
//! `.DS_Store` also matches at any depth without the user having to write
//! `**/.DS_Store` themselves. File-include patterns are matched verbatim.
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Result, SyncError};

/// Expand a single ignore pattern into its "also match at any depth" form.
///
/// Idempotent: expanding an already-expanded pattern returns the same set.
pub fn expand_ignore_pattern(pattern: &str) -> Vec<String> {
	if pattern.starts_with("**/") {
		vec![pattern.to_string()]
	} else {
		vec![pattern.to_string(), format!("**/{}", pattern)]
	}
}

fn build_glob(pattern: &str) -> Result<Glob> {
	Glob::new(pattern).map_err(|e| SyncError::Config(format!("invalid pattern '{}': {}", pattern, e)))
}

/// A compiled set of patterns to match relative paths against.
pub struct PatternSet {
	set: GlobSet,
}

impl PatternSet {
	fn from_patterns<I: IntoIterator<Item = String>>(patterns: I) -> Result<Self> {
		let mut builder = GlobSetBuilder::new();
		for pattern in patterns {
			builder.add(build_glob(&pattern)?);
		}
		let set = builder
			.build()
			.map_err(|e| SyncError::Config(format!("failed to compile pattern set: {}", e)))?;
		Ok(PatternSet { set })
	}

	/// Compile a set of file-include patterns, matched verbatim (no `**/` expansion).
	pub fn includes(patterns: &[String]) -> Result<Self> {
		Self::from_patterns(patterns.iter().cloned())
	}

	/// Compile a set of ignore patterns, each expanded to also match at any depth.
	pub fn ignores(patterns: &[String]) -> Result<Self> {
		let expanded = patterns.iter().flat_map(|p| expand_ignore_pattern(p));
		Self::from_patterns(expanded)
	}

	pub fn is_match(&self, relative_path: &str) -> bool {
		self.set.is_match(relative_path)
	}

	pub fn is_empty(&self) -> bool {
		self.set.len() == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn expand_leaves_already_prefixed_pattern_alone() {
		assert_eq!(expand_ignore_pattern("**/.DS_Store"), vec!["**/.DS_Store".to_string()]);
	}

	#[test]
	fn expand_adds_any_depth_variant() {
		let expanded = expand_ignore_pattern(".DS_Store");
		assert_eq!(expanded, vec![".DS_Store".to_string(), "**/.DS_Store".to_string()]);
	}

	#[test]
	fn expand_is_idempotent() {
		let once = expand_ignore_pattern(".DS_Store");
		let twice: Vec<String> = once.iter().flat_map(|p| expand_ignore_pattern(p)).collect();
		let mut once_sorted = once.clone();
		let mut twice_sorted: Vec<String> = twice.into_iter().collect::<std::collections::HashSet<_>>().into_iter().collect();
		once_sorted.sort();
		twice_sorted.sort();
		assert_eq!(once_sorted, twice_sorted);
	}

	#[test]
	fn ignore_pattern_matches_at_any_depth() {
		let set = PatternSet::ignores(&[".DS_Store".to_string()]).unwrap();
		assert!(set.is_match(".DS_Store"));
		assert!(set.is_match("a/.DS_Store"));
		assert!(set.is_match("a/b/.DS_Store"));
		assert!(!set.is_match("a/NotDSStore"));
	}

	#[test]
	fn include_pattern_is_matched_verbatim() {
		let set = PatternSet::includes(&["CLAUDE.md".to_string()]).unwrap();
		assert!(set.is_match("CLAUDE.md"));
		assert!(!set.is_match("a/CLAUDE.md"));
	}

	#[test]
	fn include_pattern_supports_recursive_glob_when_written_explicitly() {
		let set = PatternSet::includes(&[".cursor/**".to_string()]).unwrap();
		assert!(set.is_match(".cursor/rules/foo.md"));
	}

	#[test]
	fn leading_dot_is_matched_inclusively() {
		let set = PatternSet::ignores(&["*.log".to_string()]).unwrap();
		assert!(set.is_match(".hidden.log"));
	}

	#[test]
	fn empty_pattern_set_matches_nothing() {
		let set = PatternSet::ignores(&[]).unwrap();
		assert!(set.is_empty());
		assert!(!set.is_match("anything"));
	}
}

// vim: ts=4
