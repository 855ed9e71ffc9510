//! Associative memory used for few-shot recall and post-run reflection.
//!
//! Each memory-owning role gets its own [`MemoryStore`]; stores only grow and
//! are the sole channel through which information crosses run boundaries.

pub mod bank;
mod persist;
pub mod store;

pub use bank::MemoryBank;
pub use store::{cosine_similarity, MemoryEntry, MemoryMatch, MemoryStore};
