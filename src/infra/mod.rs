//! Infrastructure adapters for session back-ends.

pub mod memory;

pub use memory::{InMemoryBackend, InMemorySession, DEFAULT_EVAL_OUTPUT};
