//! Orchestration layer: the Symbol Worker, Worker Pool, Enrichment Engine,
//! Distributor, and Store Adapter that together make up the pipeline.

pub mod distributor;
pub mod enrichment;
pub mod pipeline;
pub mod store;
pub mod worker;
pub mod worker_pool;

pub use distributor::Distributor;
pub use enrichment::EnrichmentEngine;
pub use pipeline::Pipeline;
pub use store::StoreAdapter;
pub use worker::SymbolWorker;
pub use worker_pool::WorkerPool;
