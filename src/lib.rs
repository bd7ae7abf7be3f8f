pub mod aggregator;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod fanout;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod normalize;
pub mod providers;
pub mod rank;
pub mod registry;
pub mod server;
pub mod types;

pub use aggregator::{Aggregator, SearchRequest, SearchResponse};
pub use config::Settings;
pub use error::AggregatorError;
pub use types::EventRecord;
