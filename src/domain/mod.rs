pub mod analysis;
pub mod enriched;
pub mod errors;
pub mod indicators;
pub mod signal;
pub mod timeframe;
pub mod types;

pub use enriched::EnrichedCandle;
pub use errors::PipelineError;
pub use timeframe::Timeframe;
pub use types::{Candle, EventKind, MarketEvent, Subscription, Symbol};
