use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::models::{Listing, SourceStatus};
use crate::observer::{SearchEvent, SearchObserver};
use crate::scrapers::traits::{ScrapeError, ScraperTrait};

/// Why a source contributed nothing to a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    SourceError(String),
    InvalidResponse(String),
}

/// Result of one adapter for one query
#[derive(Debug, Clone)]
pub struct SourceOutcome {
    pub source: String,
    /// Position of the adapter in the registry
    pub rank: usize,
    pub elapsed: Duration,
    pub result: Result<Vec<Listing>, FailureKind>,
}

impl SourceOutcome {
    pub fn status(&self) -> SourceStatus {
        match &self.result {
            Ok(listings) => SourceStatus::Success {
                listings: listings.len(),
            },
            Err(FailureKind::Timeout) => SourceStatus::Timeout,
            Err(FailureKind::SourceError(message)) => SourceStatus::SourceError {
                message: message.clone(),
            },
            Err(FailureKind::InvalidResponse(message)) => SourceStatus::InvalidResponse {
                message: message.clone(),
            },
        }
    }
}

/// Per-source results of one fan-out, in registration order
#[derive(Debug, Clone)]
pub struct PartialAggregate {
    pub query: String,
    pub outcomes: Vec<SourceOutcome>,
}

/// Runs a query against every registered scraper at once.
///
/// The registry is fixed at construction; share the manager behind an `Arc`.
/// Each adapter gets its own deadline, so a call to [`ScraperManager::search`]
/// takes at most `adapter_timeout` no matter how many sources are registered.
///
/// Adapters run as tasks in a [`JoinSet`] owned by the `search` future. Dropping that
/// future (for example because the caller went away) aborts every adapter still running.
pub struct ScraperManager {
    scrapers: Vec<Arc<dyn ScraperTrait>>,
    adapter_timeout: Duration,
    observer: Arc<dyn SearchObserver>,
}

impl ScraperManager {
    pub fn new(
        scrapers: Vec<Arc<dyn ScraperTrait>>,
        adapter_timeout: Duration,
        observer: Arc<dyn SearchObserver>,
    ) -> Self {
        Self {
            scrapers,
            adapter_timeout,
            observer,
        }
    }

    pub fn sources(&self) -> Vec<&'static str> {
        self.scrapers.iter().map(|s| s.source_name()).collect()
    }

    pub async fn search(&self, query: &str) -> PartialAggregate {
        let started = Instant::now();
        let mut tasks = JoinSet::new();

        for (rank, scraper) in self.scrapers.iter().enumerate() {
            let scraper = Arc::clone(scraper);
            let query = query.to_string();
            let limit = self.adapter_timeout;

            tasks.spawn(async move {
                let started = Instant::now();
                let result = run_adapter(scraper.as_ref(), &query, limit).await;
                (rank, started.elapsed(), result)
            });
        }

        let mut slots: Vec<Option<SourceOutcome>> = vec![None; self.scrapers.len()];

        while let Some(joined) = tasks.join_next().await {
            let (rank, elapsed, result) = match joined {
                Ok(done) => done,
                Err(err) => {
                    warn!("Scraper task did not complete: {}", err);
                    continue;
                }
            };
            let outcome = SourceOutcome {
                source: self.scrapers[rank].source_name().to_string(),
                rank,
                elapsed,
                result,
            };

            self.observer.on_event(&SearchEvent::SourceFinished {
                query: query.to_string(),
                source: outcome.source.clone(),
                status: outcome.status(),
                elapsed,
            });
            slots[rank] = Some(outcome);
        }

        let outcomes = slots
            .into_iter()
            .enumerate()
            .map(|(rank, slot)| {
                slot.unwrap_or_else(|| SourceOutcome {
                    source: self.scrapers[rank].source_name().to_string(),
                    rank,
                    elapsed: started.elapsed(),
                    result: Err(FailureKind::SourceError("scraper task was cancelled".to_string())),
                })
            })
            .collect();

        debug!("Fan-out for {:?} finished in {:?}", query, started.elapsed());

        PartialAggregate {
            query: query.to_string(),
            outcomes,
        }
    }
}

async fn run_adapter(
    scraper: &dyn ScraperTrait,
    query: &str,
    limit: Duration,
) -> Result<Vec<Listing>, FailureKind> {
    let call = AssertUnwindSafe(scraper.scrape(query)).catch_unwind();

    match timeout(limit, call).await {
        Err(_) => Err(FailureKind::Timeout),
        Ok(Err(panic)) => Err(FailureKind::SourceError(format!(
            "scraper panicked: {}",
            panic_message(panic.as_ref())
        ))),
        Ok(Ok(Err(ScrapeError::Transport(err)))) if err.is_timeout() => Err(FailureKind::Timeout),
        Ok(Ok(Err(ScrapeError::InvalidResponse(message)))) => {
            Err(FailureKind::InvalidResponse(message))
        }
        Ok(Ok(Err(err))) => Err(FailureKind::SourceError(err.to_string())),
        Ok(Ok(Ok(listings))) => accept_listings(scraper.source_name(), listings),
    }
}

/// Drop listings that break the listing invariants or claim another source
fn accept_listings(source: &str, listings: Vec<Listing>) -> Result<Vec<Listing>, FailureKind> {
    let total = listings.len();
    let mut accepted = Vec::with_capacity(total);

    for listing in listings {
        if listing.source != source {
            warn!(
                "{}: dropping listing {} attributed to {}",
                source, listing.id, listing.source
            );
            continue;
        }
        match listing.validate() {
            Ok(()) => accepted.push(listing),
            Err(reason) => warn!("{}: dropping listing: {}", source, reason),
        }
    }

    if total > 0 && accepted.is_empty() {
        return Err(FailureKind::InvalidResponse(format!(
            "none of {} listings passed validation",
            total
        )));
    }

    Ok(accepted)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
