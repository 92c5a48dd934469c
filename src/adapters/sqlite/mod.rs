//! SQLite-backed run store and blackboard.

pub mod blackboard_repository;
pub mod connection;
pub mod run_repository;

pub use blackboard_repository::SqliteBlackboard;
pub use connection::{create_pool, create_test_pool, ConnectionError, PoolConfig};
pub use run_repository::SqliteRunStore;
