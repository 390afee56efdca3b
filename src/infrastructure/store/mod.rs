//! Concrete [`StoreAdapter`](crate::application::store::StoreAdapter)
//! implementations.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryStoreAdapter;
pub use sqlite::SqliteStoreAdapter;
