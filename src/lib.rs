//! # aisync-core - bidirectional store/target file reconciliation
//!
//! A content-aware synchronization engine that keeps a set of local working
//! directories ("targets") in agreement with their mirrors under a single
//! version-controlled "store", using a three-way merge baseline when both
//! sides have changed.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use aisync_core::config::Config;
//! use aisync_core::db::Db;
//! use aisync_core::reconciler::Reconciler;
//! use aisync_core::store::StoreGateway;
//! use aisync_core::watcher::Watcher;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> aisync_core::error::Result<()> {
//!     aisync_core::logging::init_tracing();
//!     let config = Config::default();
//!     let db = Arc::new(Db::open(&config.store_root.join(".db/state.redb"))?);
//!     let store = Arc::new(StoreGateway::initialize(&config.store_root)?);
//!     let (watcher, change_rx) = Watcher::new(config.watch_debounce_ms)?;
//!     let reconciler = Reconciler::new(db, store, watcher, config).await?;
//!     reconciler.run(change_rx).await;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(dead_code)]

pub mod config;
pub mod conflict;
pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod pattern;
pub mod reconciler;
pub mod scanner;
pub mod settings;
pub mod store;
pub mod types;
pub mod util;
pub mod watcher;

pub use config::Config;
pub use conflict::ConflictStore;
pub use db::Db;
pub use error::{GatewayError, Result, SyncError};
pub use events::{Event, EventBus, EventSink};
pub use reconciler::Reconciler;
pub use settings::{PersistedSettings, SettingsProjection};
pub use store::StoreGateway;
pub use types::{Conflict, ConflictKind, ConflictResolution, ConflictStatus, SyncStatus, Target, TargetKind, TrackedFile};
pub use watcher::{ChangeEvent, ChangeScope, Watcher};

// vim: ts=4
