//! Service layer module
//!
//! Routing, upstream forwarding, response teeing, usage parsing, pricing and
//! record persistence

pub mod client;
pub mod pricing;
pub mod router;
pub mod sink;
pub mod tee;
pub mod usage;

pub use client::{UpstreamClient, UpstreamResponse};
pub use pricing::{ModelPrice, PricingEntry, PricingTable};
pub use router::{DialectRouter, Route};
pub use sink::{JsonlStore, MemoryStore, RecordSink, RecordStore, SinkWorker};
pub use tee::{StreamEnd, TeeOutcome};
pub use usage::{parse_body, ParsedUsage, SseUsageTracker, StreamEvent, UsageCollector};
