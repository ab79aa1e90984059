//! Transparent metrics for HTTP and Redis-protocol transactions.
//!
//! Interceptors wrap a capability (a tower service, an [`HttpRoundTrip`] or a
//! [`KvRoundTrip`]) without changing what it returns. Each transaction is
//! reported exactly once to an [`Engine`] and, through a bounded
//! [`StatsFeed`], folded into an [`Aggregator`].
//!
//! ```rust,ignore
//! let aggregator = Arc::new(Aggregator::new());
//! let (feed, worker) = aggregator::spawn(aggregator.clone(), 1024);
//! let reporter = Reporter::new(Arc::new(HistogramEngine::new())).with_feed(feed);
//!
//! let redis = StatsKvTransport::new(RedisTransport::new(), reporter.clone());
//! let app = Router::new().layer(StatsLayer::new(reporter));
//! ```

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod instrument;
pub mod kv;
pub mod measure;
mod roundtrip;
pub mod transaction;

pub use aggregator::{Aggregator, Snapshot, StatsFeed, StatsWorker};
pub use config::{Config, ConfigError};
pub use engine::{Engine, HistogramEngine, MemoryEngine, NullEngine};
pub use error::{ErrorKind, Operation, StatsError, TransportError};
pub use http::{HttpRoundTrip, StatsLayer, StatsTransport};
pub use kv::{KvRequest, KvResponse, KvRoundTrip, StatsKvTransport};
pub use measure::{Measure, MeasureKind, Tag};
pub use transaction::{Protocol, Reporter, TransactionRecord};
