//! MeshSwarm shared state.
//!
//! A versioned key-value store replicated across every node in the mesh.
//! Local writes bump a per-key version and are broadcast eagerly by the
//! node runtime; remote records are merged through a last-writer-wins rule
//! on `(version, origin)` with ties going to the numerically lower origin.
//!
//! # Conflict resolution
//!
//! For an inbound record against a local entry, accept iff
//!
//! ```text
//! version > local.version
//!     || (version == local.version && origin < local.origin)
//! ```
//!
//! Convergence comes from the originator's eager broadcast plus the
//! periodic full-store anti-entropy sync; acceptance never re-broadcasts.

mod entry;
mod store;

pub use entry::StateEntry;
pub use store::{LocalWrite, StateStore, WatchFn, WILDCARD};
