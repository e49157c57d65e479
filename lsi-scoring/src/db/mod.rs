//! Database access for sessions, artifacts and stored pipelines
//!
//! Functions that run inside a finalize take `&mut SqliteConnection` so they
//! can be given the open transaction; setup helpers take the pool.

pub mod artifacts;
pub mod pipelines;
pub mod sessions;
