//! Adapters for the outside world: the provider stream client, durable
//! storage, and the health/metrics/subscriber HTTP surface.

pub mod health;
pub mod observability;
pub mod store;
pub mod stream_client;

pub use health::{router, AppState};
pub use observability::{Metrics, MetricsReporter};
pub use store::{InMemoryStoreAdapter, SqliteStoreAdapter};
pub use stream_client::{ReconnectPolicy, StreamClient};
