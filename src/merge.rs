//! Combines per-source listings into one ordered, duplicate-free result.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use url::Url;

use crate::models::{AggregateResult, Listing};
use crate::scrapers::manager::PartialAggregate;

/// Identity of a physical offer: the same item at the same price in the same shop
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ListingKey {
    source: String,
    host: String,
    model: String,
    price_units: i64,
}

impl ListingKey {
    fn of(listing: &Listing) -> Self {
        let host = Url::parse(&listing.url)
            .ok()
            .and_then(|url| url.host_str().map(|host| host.to_lowercase()))
            .unwrap_or_default();

        Self {
            source: listing.source.clone(),
            host,
            model: normalize_model(&listing.model),
            price_units: listing.price.round() as i64,
        }
    }
}

fn normalize_model(model: &str) -> String {
    model
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn merge(partial: PartialAggregate) -> AggregateResult {
    merge_at(partial, Utc::now())
}

/// Same as [`merge`] with an explicit assembly time.
///
/// Listings are ordered by price, then by the registration rank of their source,
/// then by listing id and URL. Within that order the first listing of each
/// [`ListingKey`] wins, so the output does not depend on the order in which the
/// sources or their listings arrived.
pub fn merge_at(partial: PartialAggregate, assembled_at: DateTime<Utc>) -> AggregateResult {
    let mut sources = BTreeMap::new();
    let mut ranked: Vec<(usize, Listing)> = Vec::new();

    for outcome in partial.outcomes {
        sources.insert(outcome.source.clone(), outcome.status());
        if let Ok(listings) = outcome.result {
            ranked.extend(listings.into_iter().map(|listing| (outcome.rank, listing)));
        }
    }

    ranked.sort_by(|(rank_a, a), (rank_b, b)| {
        a.price
            .total_cmp(&b.price)
            .then(rank_a.cmp(rank_b))
            .then_with(|| a.id.cmp(&b.id))
            .then_with(|| a.url.cmp(&b.url))
            .then_with(|| compare_rest(a, b))
    });

    let mut seen = HashSet::new();
    let listings = ranked
        .into_iter()
        .map(|(_, listing)| listing)
        .filter(|listing| seen.insert(ListingKey::of(listing)))
        .collect();

    AggregateResult {
        query: partial.query,
        listings,
        assembled_at,
        sources,
    }
}

/// Total order over the remaining fields so fully tied duplicates resolve the same way every time
fn compare_rest(a: &Listing, b: &Listing) -> Ordering {
    a.model
        .cmp(&b.model)
        .then_with(|| a.currency.cmp(&b.currency))
        .then_with(|| a.image_url.cmp(&b.image_url))
}
