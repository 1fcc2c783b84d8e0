//! Per-request status events.
//!
//! The scraper manager and the search service report what happened to an explicit
//! [`SearchObserver`] handed to them at construction time instead of a process-wide
//! logger. [`TracingObserver`] forwards everything to `tracing`.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::models::SourceStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    CacheHit {
        query: String,
    },
    CacheMiss {
        query: String,
    },
    /// The cache could not be read or written; the request carried on without it
    CacheFailed {
        query: String,
        error: String,
    },
    SourceFinished {
        query: String,
        source: String,
        status: SourceStatus,
        elapsed: Duration,
    },
    SearchCompleted {
        query: String,
        listings: usize,
        from_cache: bool,
        elapsed: Duration,
    },
}

pub trait SearchObserver: Send + Sync {
    fn on_event(&self, event: &SearchEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SearchObserver for NoopObserver {
    fn on_event(&self, _event: &SearchEvent) {}
}

/// Writes events as structured `tracing` records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SearchObserver for TracingObserver {
    fn on_event(&self, event: &SearchEvent) {
        match event {
            SearchEvent::CacheHit { query } => debug!(query = %query, "cache hit"),
            SearchEvent::CacheMiss { query } => debug!(query = %query, "cache miss"),
            SearchEvent::CacheFailed { query, error } => {
                warn!(query = %query, error = %error, "cache unavailable, continuing without it")
            }
            SearchEvent::SourceFinished {
                query,
                source,
                status,
                elapsed,
            } => {
                if status.is_success() {
                    debug!(query = %query, source = %source, ?status, ?elapsed, "source finished");
                } else {
                    warn!(query = %query, source = %source, ?status, ?elapsed, "source failed");
                }
            }
            SearchEvent::SearchCompleted {
                query,
                listings,
                from_cache,
                elapsed,
            } => info!(query = %query, listings, from_cache, ?elapsed, "search completed"),
        }
    }
}
