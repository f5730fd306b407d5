//! Conflict lifecycle (§4.G): creating, updating, resolving, and
//! auto-clearing the conflict records tracked files accumulate.
pub mod store;

pub use store::ConflictStore;

// vim: ts=4
