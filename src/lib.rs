//! Knife listing aggregation: one query fanned out to several marketplaces,
//! merged, deduplicated and cached, plus a Postgres store of the callers.

pub mod cache;
pub mod config;
pub mod merge;
pub mod models;
pub mod observer;
pub mod scrapers;
pub mod search;
pub mod store;

pub use cache::{CacheError, CacheStore, MemoryStore, RedisStore, ResultCache};
pub use models::{AggregateResult, Listing, SourceStatus, User, UserProfile};
pub use observer::{NoopObserver, SearchEvent, SearchObserver, TracingObserver};
pub use search::{SearchError, SearchService};
pub use store::{StoreError, UserStore};
