use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::{CacheError, ResultCache};
use crate::merge::merge;
use crate::models::AggregateResult;
use crate::observer::{SearchEvent, SearchObserver};
use crate::scrapers::manager::ScraperManager;
use crate::scrapers::types::SearchParams;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SearchError {
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },
}

/// Lower-case, trim and collapse runs of whitespace to a single space
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Entry point for callers: cache first, then fan out to every marketplace
pub struct SearchService {
    cache: ResultCache,
    manager: Arc<ScraperManager>,
    cache_ttl: Duration,
    max_query_len: usize,
    observer: Arc<dyn SearchObserver>,
}

impl SearchService {
    pub fn new(
        cache: ResultCache,
        manager: Arc<ScraperManager>,
        cache_ttl: Duration,
        max_query_len: usize,
        observer: Arc<dyn SearchObserver>,
    ) -> Self {
        Self {
            cache,
            manager,
            cache_ttl,
            max_query_len,
            observer,
        }
    }

    fn validate(&self, query: &str) -> Result<String, SearchError> {
        let normalized = normalize_query(query);

        if normalized.is_empty() {
            return Err(SearchError::InvalidQuery {
                reason: "query is empty".to_string(),
            });
        }

        let length = normalized.chars().count();
        if length > self.max_query_len {
            return Err(SearchError::InvalidQuery {
                reason: format!(
                    "query is {} characters long, the limit is {}",
                    length, self.max_query_len
                ),
            });
        }

        Ok(normalized)
    }

    /// Search every marketplace for `query`.
    ///
    /// Only an invalid query is an error. Failing sources end up in the status map of
    /// the result. An unreachable cache is treated as a miss with no write-back, an
    /// undecodable entry as a miss that the new result replaces.
    pub async fn search(&self, query: &str) -> Result<AggregateResult, SearchError> {
        let query = self.validate(query)?;
        let started = Instant::now();

        let cache_usable = match self.cache.get(&query).await {
            Ok(Some(hit)) => {
                self.observer.on_event(&SearchEvent::CacheHit {
                    query: query.clone(),
                });
                self.completed(&query, &hit, true, started);
                return Ok(hit);
            }
            Ok(None) => {
                self.observer.on_event(&SearchEvent::CacheMiss {
                    query: query.clone(),
                });
                true
            }
            Err(err) => {
                self.observer.on_event(&SearchEvent::CacheFailed {
                    query: query.clone(),
                    error: err.to_string(),
                });
                // An unreadable entry is overwritten by the fresh result; only an
                // unreachable store skips the write-back.
                !matches!(err, CacheError::Unavailable(_))
            }
        };

        let partial = self.manager.search(&query).await;
        let result = merge(partial);

        if cache_usable {
            if let Err(err) = self.cache.put(&query, &result, self.cache_ttl).await {
                self.observer.on_event(&SearchEvent::CacheFailed {
                    query: query.clone(),
                    error: err.to_string(),
                });
            }
        }

        self.completed(&query, &result, false, started);
        Ok(result)
    }

    /// Search for `params.query` and keep only listings inside the price range
    pub async fn search_with(&self, params: &SearchParams) -> Result<AggregateResult, SearchError> {
        let result = self.search(&params.query).await?;
        Ok(result.filtered(params))
    }

    fn completed(&self, query: &str, result: &AggregateResult, from_cache: bool, started: Instant) {
        self.observer.on_event(&SearchEvent::SearchCompleted {
            query: query.to_string(),
            listings: result.listings.len(),
            from_cache,
            elapsed: started.elapsed(),
        });
    }
}
