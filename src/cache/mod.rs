//! Response caching for loop queries.
//!
//! - **Keys**: canonical, order-independent serialization of compiled params
//! - **Store**: bounded TTL cache with FIFO eviction and a background sweep
//! - **Registry**: logical query → cached page keys, for scoped invalidation
//! - **Events**: broadcast channel announcing content changes
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! ttl_ms = 300000
//! max_size = 50
//! sweep_interval_ms = 60000
//! ```

mod config;
mod events;
mod keys;
mod lock;
mod registry;
mod store;

pub use config::CacheConfig;
pub use events::{ContentEvent, EventBus, EventKind};
pub use keys::{
    PAGE_PARAM, ParamMap, ParamValue, cache_key, canonicalize, canonicalize_without,
    logical_query_key,
};
pub use registry::QueryRegistry;
pub use store::{CacheStats, EntryStat, ResponseCache};

pub(crate) use lock::mutex_lock;
pub(crate) use store::{METRIC_CACHE_EVICT, METRIC_CACHE_EXPIRED, METRIC_CACHE_HIT, METRIC_CACHE_MISS};
