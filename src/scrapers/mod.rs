pub mod manager;
pub mod shops;
pub mod traits;
pub mod types;

#[cfg(test)]
pub(crate) mod fakes;

pub use manager::{FailureKind, PartialAggregate, ScraperManager, SourceOutcome};
pub use shops::{default_scrapers, ShopLayout, ShopScraper};
pub use traits::{ScrapeError, ScraperTrait};
pub use types::SearchParams;
