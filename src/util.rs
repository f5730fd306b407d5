//! Content and timestamp utilities (§4.A).
//!
//! Short digests are used purely for equality checks between a pair of
//! local files; they are never used as security primitives, which is why
//! they are deliberately truncated.
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{io_at, Result};

const DIGEST_LEN: usize = 16;

/// Digest a buffer or string and return the first 16 hex characters of its SHA-256.
pub fn digest_bytes(buf: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.update(buf);
	let full = hasher.finalize();
	hex::encode(full)[..DIGEST_LEN].to_string()
}

/// Digest the contents of a file on disk.
pub fn digest_file(path: &Path) -> Result<String> {
	let bytes = fs::read(path).map_err(|e| io_at(path, e))?;
	Ok(digest_bytes(&bytes))
}

/// Digest a symlink by hashing its target string.
pub fn digest_symlink(path: &Path) -> Result<String> {
	let target = fs::read_link(path).map_err(|e| io_at(path, e))?;
	Ok(digest_bytes(target.to_string_lossy().as_bytes()))
}

/// Return a file's modification timestamp in ISO-8601 UTC.
pub fn mtime_of(path: &Path) -> Result<DateTime<Utc>> {
	let meta = fs::symlink_metadata(path).map_err(|e| io_at(path, e))?;
	let modified = meta.modified().map_err(|e| io_at(path, e))?;
	Ok(DateTime::<Utc>::from(modified))
}


// vim: ts=4
