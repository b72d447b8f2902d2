//! Durable state storage: sqlite pool, migrations, and store impls.

pub mod connection;
pub mod memory_store;
pub mod migrations;
pub mod sqlite_store;

pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use memory_store::MemoryStateStore;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use sqlite_store::SqliteStateStore;
