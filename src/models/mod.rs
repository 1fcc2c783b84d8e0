use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scrapers::types::SearchParams;

/// A single knife offered by one marketplace
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    /// Identifier scoped to the source that produced it
    pub id: String,
    pub model: String,
    pub price: f64,
    pub currency: String,
    pub url: String,
    /// `source_name()` of the adapter that produced the listing
    pub source: String,
    pub image_url: Option<String>,
}

impl Listing {
    /// Check the invariants every listing leaving an adapter must hold.
    pub fn validate(&self) -> Result<(), String> {
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(format!("listing {} has invalid price {}", self.id, self.price));
        }
        if self.url.trim().is_empty() {
            return Err(format!("listing {} has an empty url", self.id));
        }
        Ok(())
    }
}

/// How a single source fared for one query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Success { listings: usize },
    Timeout,
    SourceError { message: String },
    InvalidResponse { message: String },
}

impl SourceStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, SourceStatus::Success { .. })
    }
}

/// Merged, deduplicated outcome of one search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateResult {
    /// Normalized query the result was assembled for
    pub query: String,
    pub listings: Vec<Listing>,
    pub assembled_at: DateTime<Utc>,
    pub sources: BTreeMap<String, SourceStatus>,
}

impl AggregateResult {
    /// Build a new result holding only the listings accepted by `params`.
    pub fn filtered(&self, params: &SearchParams) -> AggregateResult {
        AggregateResult {
            query: self.query.clone(),
            listings: self
                .listings
                .iter()
                .filter(|listing| params.matches(listing))
                .cloned()
                .collect(),
            assembled_at: self.assembled_at,
            sources: self.sources.clone(),
        }
    }
}

/// Mutable profile fields refreshed every time a caller is seen
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
    pub is_premium: bool,
}

/// Stored caller identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    /// Chat platform identifier, unique across rows
    pub external_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language_code: Option<String>,
    pub is_premium: bool,
    pub search_params: Option<SearchParams>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> String {
        let full_name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !full_name.is_empty() {
            return full_name;
        }

        match self.username.as_deref() {
            Some(username) if !username.is_empty() => format!("@{}", username),
            _ => self.external_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(price: f64, url: &str) -> Listing {
        Listing {
            id: "1".to_string(),
            model: "Puukko".to_string(),
            price,
            currency: "EUR".to_string(),
            url: url.to_string(),
            source: "lamnia".to_string(),
            image_url: None,
        }
    }

    fn user() -> User {
        User {
            id: 1,
            external_id: 42,
            username: None,
            first_name: None,
            last_name: None,
            language_code: Some("ru".to_string()),
            is_premium: false,
            search_params: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn validate_rejects_negative_and_nan_prices() {
        assert!(listing(0.0, "https://x").validate().is_ok());
        assert!(listing(-1.0, "https://x").validate().is_err());
        assert!(listing(f64::NAN, "https://x").validate().is_err());
    }

    #[test]
    fn validate_rejects_blank_url() {
        assert!(listing(10.0, "  ").validate().is_err());
    }

    #[test]
    fn display_name_prefers_full_name_then_username() {
        let mut user = user();
        assert_eq!(user.display_name(), "42");

        user.username = Some("blade_fan".to_string());
        assert_eq!(user.display_name(), "@blade_fan");

        user.first_name = Some("Ivan".to_string());
        user.last_name = Some("Petrov".to_string());
        assert_eq!(user.display_name(), "Ivan Petrov");
    }

    #[test]
    fn source_status_serializes_with_tag() {
        let json = serde_json::to_value(SourceStatus::SourceError {
            message: "boom".to_string(),
        })
        .unwrap();

        assert_eq!(json["status"], "source_error");
        assert_eq!(json["message"], "boom");
    }
}
