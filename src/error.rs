//! Crate-wide error types.
use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, SyncError>;

/// Top-level error produced by the reconciliation core.
#[derive(Debug)]
pub enum SyncError {
	Io {
		path: Option<PathBuf>,
		source: std::io::Error,
	},
	Gateway(GatewayError),
	Invariant(String),
	Admission {
		target: String,
		size_bytes: u64,
		limit_bytes: u64,
	},
	CorruptProjection(String),
	Config(String),
	Watcher(String),
	Other(String),
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncError::Io { path: Some(p), source } => {
				write!(f, "I/O error at {}: {}", p.display(), source)
			}
			SyncError::Io { path: None, source } => write!(f, "I/O error: {}", source),
			SyncError::Gateway(e) => write!(f, "gateway error: {}", e),
			SyncError::Invariant(msg) => write!(f, "invariant violated: {}", msg),
			SyncError::Admission { target, size_bytes, limit_bytes } => write!(
				f,
				"target '{}' blocked: {} bytes exceeds limit of {} bytes",
				target, size_bytes, limit_bytes
			),
			SyncError::CorruptProjection(msg) => write!(f, "corrupt settings projection: {}", msg),
			SyncError::Config(msg) => write!(f, "invalid configuration: {}", msg),
			SyncError::Watcher(msg) => write!(f, "watcher error: {}", msg),
			SyncError::Other(msg) => write!(f, "{}", msg),
		}
	}
}

impl std::error::Error for SyncError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			SyncError::Io { source, .. } => Some(source),
			SyncError::Gateway(e) => Some(e),
			_ => None,
		}
	}
}

impl From<std::io::Error> for SyncError {
	fn from(source: std::io::Error) -> Self {
		SyncError::Io { path: None, source }
	}
}

impl From<GatewayError> for SyncError {
	fn from(e: GatewayError) -> Self {
		SyncError::Gateway(e)
	}
}

impl From<serde_json::Error> for SyncError {
	fn from(e: serde_json::Error) -> Self {
		SyncError::CorruptProjection(e.to_string())
	}
}

impl From<redb::DatabaseError> for SyncError {
	fn from(e: redb::DatabaseError) -> Self {
		SyncError::Other(format!("persistence error: {}", e))
	}
}

impl From<redb::TransactionError> for SyncError {
	fn from(e: redb::TransactionError) -> Self {
		SyncError::Other(format!("persistence error: {}", e))
	}
}

impl From<redb::TableError> for SyncError {
	fn from(e: redb::TableError) -> Self {
		SyncError::Other(format!("persistence error: {}", e))
	}
}

impl From<redb::StorageError> for SyncError {
	fn from(e: redb::StorageError) -> Self {
		SyncError::Other(format!("persistence error: {}", e))
	}
}

impl From<redb::CommitError> for SyncError {
	fn from(e: redb::CommitError) -> Self {
		SyncError::Other(format!("persistence error: {}", e))
	}
}

/// Helper so call sites can attach a path to an I/O failure.
pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
	SyncError::Io { path: Some(path.into()), source }
}

/// Errors raised by the store repository gateway (§4.C).
#[derive(Debug)]
pub enum GatewayError {
	/// No usable remote could be determined (no tracking branch, no `origin`, no remote at all).
	NoRemote,
	/// A merge or rebase is already in progress in the underlying repository.
	AlreadyMerging,
	/// The VCS backend itself failed.
	Vcs(git2::Error),
	/// A requested revision or path does not exist.
	NotFound(String),
}

impl fmt::Display for GatewayError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			GatewayError::NoRemote => write!(f, "no remote configured for the store repository"),
			GatewayError::AlreadyMerging => write!(f, "a merge is already in progress"),
			GatewayError::Vcs(e) => write!(f, "version-control error: {}", e),
			GatewayError::NotFound(what) => write!(f, "not found: {}", what),
		}
	}
}

impl std::error::Error for GatewayError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			GatewayError::Vcs(e) => Some(e),
			_ => None,
		}
	}
}

impl From<git2::Error> for GatewayError {
	fn from(e: git2::Error) -> Self {
		GatewayError::Vcs(e)
	}
}

impl From<git2::Error> for SyncError {
	fn from(e: git2::Error) -> Self {
		SyncError::Gateway(GatewayError::Vcs(e))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn io_error_displays_path_when_present() {
		let e = io_at("/tmp/foo", std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
		assert!(e.to_string().contains("/tmp/foo"));
	}

	#[test]
	fn gateway_error_converts_into_sync_error() {
		let e: SyncError = GatewayError::NoRemote.into();
		assert!(matches!(e, SyncError::Gateway(GatewayError::NoRemote)));
	}

	#[test]
	fn admission_error_message_contains_target() {
		let e = SyncError::Admission { target: "repos/foo".into(), size_bytes: 200, limit_bytes: 100 };
		assert!(e.to_string().contains("repos/foo"));
	}
}

// vim: ts=4
