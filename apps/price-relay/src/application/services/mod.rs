//! Application Services
//!
//! - `LastQuoteCache`: latest quote in memory, written through to a `QuoteStore`
//! - `RelayPipeline`: single writer that turns upstream events into published quotes
//! - `FeedState`: upstream connection status shared with the health endpoint

mod cache;
mod feed;
mod pipeline;

pub use cache::LastQuoteCache;
pub use feed::{FeedSnapshot, FeedState};
pub use pipeline::RelayPipeline;
