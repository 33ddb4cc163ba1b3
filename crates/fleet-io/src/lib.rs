pub mod cache;
pub mod events;
pub mod feed;
pub mod http;
pub mod metrics;
pub mod protocol;
pub mod rate_limit;

pub use events::{EventSink, FleetEvent, NoopSink};
pub use feed::{FeedConfig, FeedError, FeedServer};
pub use http::{serve_api, ApiConfig, ApiServer, ApiState, RateLimits, ServerError};
pub use metrics::init_metrics;
pub use protocol::{CommandReply, HealthReply, IncomingMessage, ReplyStatus};
