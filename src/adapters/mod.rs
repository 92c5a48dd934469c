//! Storage adapters implementing the domain ports.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryRunStore;
pub use sqlite::{SqliteBlackboard, SqliteRunStore};
