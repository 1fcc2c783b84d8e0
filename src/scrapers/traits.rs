use crate::models::Listing;
use async_trait::async_trait;

/// Failure of a single adapter call
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("marketplace answered with HTTP {0}")]
    Status(u16),
    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

/// Common trait for all marketplace scrapers
/// Implementations must not share mutable state between calls; an empty list is a valid answer
#[async_trait]
pub trait ScraperTrait: Send + Sync {
    /// Search the marketplace for `query`
    async fn scrape(&self, query: &str) -> Result<Vec<Listing>, ScrapeError>;

    /// Get the name of the scraper source
    fn source_name(&self) -> &'static str;
}
