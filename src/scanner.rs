//! Filesystem scanner (§4.D): walks a root directory and reports the files
//! that should be tracked, honoring include/ignore patterns and never
//! descending into symlinked directories.
use std::path::{Path, PathBuf};

use crate::error::{io_at, Result};
use crate::pattern::PatternSet;

/// A single file (or symlink) discovered under a scan root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedEntry {
	pub relative_path: String,
	pub is_symlink: bool,
}

/// Walk `root`, reporting every entry that matches `includes` and none of
/// `ignores`. Ignored directories are pruned without descent; symlinked
/// directories are never descended into (they're reported as plain entries
/// instead, same as any other symlink).
pub fn scan(root: &Path, includes: &PatternSet, ignores: &PatternSet) -> Result<Vec<ScannedEntry>> {
	let mut out = Vec::new();
	walk(root, root, includes, ignores, &mut out)?;
	Ok(out)
}

fn walk(root: &Path, dir: &Path, includes: &PatternSet, ignores: &PatternSet, out: &mut Vec<ScannedEntry>) -> Result<()> {
	let read_dir = std::fs::read_dir(dir).map_err(|e| io_at(dir, e))?;
	for entry in read_dir {
		let entry = entry.map_err(|e| io_at(dir, e))?;
		let path = entry.path();
		let relative = relative_path_of(root, &path);

		if ignores.is_match(&relative) {
			continue;
		}

		let file_type = entry.file_type().map_err(|e| io_at(&path, e))?;
		let is_symlink = file_type.is_symlink();

		if file_type.is_dir() {
			walk(root, &path, includes, ignores, out)?;
			continue;
		}

		if is_symlink {
			// A symlink to a directory is never traversed; report it as a leaf.
			if includes.is_empty() || includes.is_match(&relative) {
				out.push(ScannedEntry { relative_path: relative, is_symlink: true });
			}
			continue;
		}

		if includes.is_empty() || includes.is_match(&relative) {
			out.push(ScannedEntry { relative_path: relative, is_symlink: false });
		}
	}
	Ok(())
}

fn relative_path_of(root: &Path, path: &Path) -> String {
	path.strip_prefix(root)
		.unwrap_or(path)
		.to_string_lossy()
		.replace(std::path::MAIN_SEPARATOR, "/")
}

#[allow(dead_code)]
fn join_relative(root: &Path, relative: &str) -> PathBuf {
	root.join(relative)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn make_tree() -> TempDir {
		let dir = TempDir::new().unwrap();
		std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
		std::fs::write(dir.path().join("a/b/keep.md"), "x").unwrap();
		std::fs::write(dir.path().join("a/.DS_Store"), "x").unwrap();
		std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
		std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
		dir
	}

	#[test]
	fn scans_matching_files_and_skips_ignored() {
		let dir = make_tree();
		let includes = PatternSet::includes(&[]).unwrap();
		let ignores = PatternSet::ignores(&[".DS_Store".to_string(), "node_modules".to_string()]).unwrap();
		let entries = scan(dir.path(), &includes, &ignores).unwrap();
		let paths: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
		assert!(paths.contains(&"a/b/keep.md"));
		assert!(!paths.contains(&"a/.DS_Store"));
		assert!(!paths.iter().any(|p| p.starts_with("node_modules")));
	}

	#[test]
	fn ignored_directory_is_pruned_without_descent() {
		let dir = make_tree();
		let includes = PatternSet::includes(&[]).unwrap();
		let ignores = PatternSet::ignores(&["node_modules".to_string()]).unwrap();
		let entries = scan(dir.path(), &includes, &ignores).unwrap();
		assert!(!entries.iter().any(|e| e.relative_path.contains("node_modules")));
	}

	#[cfg(unix)]
	#[test]
	fn symlinked_directory_is_reported_but_not_descended() {
		let dir = TempDir::new().unwrap();
		std::fs::create_dir_all(dir.path().join("real")).unwrap();
		std::fs::write(dir.path().join("real/inner.txt"), "x").unwrap();
		std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();

		let includes = PatternSet::includes(&[]).unwrap();
		let ignores = PatternSet::ignores(&[]).unwrap();
		let entries = scan(dir.path(), &includes, &ignores).unwrap();

		let link_entry = entries.iter().find(|e| e.relative_path == "link");
		assert!(link_entry.is_some());
		assert!(link_entry.unwrap().is_symlink);
		assert!(!entries.iter().any(|e| e.relative_path == "link/inner.txt"));
	}

	#[test]
	fn include_patterns_restrict_reported_files() {
		let dir = make_tree();
		let includes = PatternSet::includes(&["a/b/keep.md".to_string()]).unwrap();
		let ignores = PatternSet::ignores(&[]).unwrap();
		let entries = scan(dir.path(), &includes, &ignores).unwrap();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].relative_path, "a/b/keep.md");
	}
}

// vim: ts=4
