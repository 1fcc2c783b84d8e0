use serde::{Deserialize, Serialize};

use crate::models::Listing;

/// Last search a caller issued, stored alongside the user
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchParams {
    /// Free text sent to every marketplace
    pub query: String,
    /// Minimum price, in the listing's own currency
    pub min_price: Option<f64>,
    /// Maximum price, in the listing's own currency
    pub max_price: Option<f64>,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn matches(&self, listing: &Listing) -> bool {
        if let Some(min) = self.min_price {
            if listing.price < min {
                return false;
            }
        }
        if let Some(max) = self.max_price {
            if listing.price > max {
                return false;
            }
        }
        true
    }
}
