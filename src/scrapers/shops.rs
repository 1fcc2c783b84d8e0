use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::HttpConfig;
use crate::models::Listing;
use crate::scrapers::traits::{ScrapeError, ScraperTrait};

/// Where a storefront keeps its search page and how its product cards are marked up
#[derive(Debug, Clone, Copy)]
pub struct ShopLayout {
    pub name: &'static str,
    pub base_url: &'static str,
    pub search_path: &'static str,
    pub query_param: &'static str,
    pub card: &'static str,
    pub title: &'static str,
    pub price: &'static str,
    pub link: &'static str,
    pub image: &'static str,
    pub currency: &'static str,
}

pub const FOREST_HOME: ShopLayout = ShopLayout {
    name: "forest-home",
    base_url: "https://forest-home.ru",
    search_path: "/search/",
    query_param: "q",
    card: ".product-item",
    title: ".product-item__title",
    price: ".product-item__price",
    link: "a.product-item__link",
    image: "img",
    currency: "RUB",
};

pub const LAMNIA: ShopLayout = ShopLayout {
    name: "lamnia",
    base_url: "https://www.lamnia.com",
    search_path: "/ru/search",
    query_param: "q",
    card: ".product-card",
    title: ".product-card__name",
    price: ".product-card__price",
    link: "a",
    image: "img",
    currency: "EUR",
};

pub const NOZHIKOV: ShopLayout = ShopLayout {
    name: "nozhikov",
    base_url: "https://www.nozhikov.ru",
    search_path: "/search/",
    query_param: "q",
    card: ".catalog-item",
    title: ".catalog-item__name",
    price: ".catalog-item__price",
    link: "a",
    image: "img",
    currency: "RUB",
};

pub const EURO_KNIFE: ShopLayout = ShopLayout {
    name: "euro-knife",
    base_url: "https://www.euro-knife.com",
    search_path: "/search",
    query_param: "q",
    card: ".product",
    title: ".product-name",
    price: ".price",
    link: "a",
    image: "img",
    currency: "EUR",
};

/// Registration order of the built-in marketplaces
pub const DEFAULT_LAYOUTS: [ShopLayout; 4] = [FOREST_HOME, LAMNIA, NOZHIKOV, EURO_KNIFE];

/// Build one scraper per built-in marketplace, in registration order
pub fn default_scrapers(http: &HttpConfig) -> Result<Vec<Arc<dyn ScraperTrait>>> {
    let mut scrapers: Vec<Arc<dyn ScraperTrait>> = Vec::with_capacity(DEFAULT_LAYOUTS.len());
    for layout in DEFAULT_LAYOUTS {
        scrapers.push(Arc::new(ShopScraper::new(layout, http)?));
    }
    Ok(scrapers)
}

struct Selectors {
    card: Selector,
    title: Selector,
    price: Selector,
    link: Selector,
    image: Selector,
}

fn compile(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow!("Invalid selector {:?}: {:?}", css, err))
}

/// HTML storefront scraper
pub struct ShopScraper {
    client: Client,
    layout: ShopLayout,
    base: Url,
    search_url: Url,
    selectors: Selectors,
}

impl ShopScraper {
    pub fn new(layout: ShopLayout, http: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(http.timeout_secs))
            .user_agent(http.user_agent.as_str())
            .build()
            .context("Failed to create HTTP client")?;

        Self::with_client(layout, client)
    }

    pub fn with_client(layout: ShopLayout, client: Client) -> Result<Self> {
        let base = Url::parse(layout.base_url)
            .with_context(|| format!("Invalid base url for {}", layout.name))?;
        let search_url = base
            .join(layout.search_path)
            .with_context(|| format!("Invalid search path for {}", layout.name))?;
        let selectors = Selectors {
            card: compile(layout.card)?,
            title: compile(layout.title)?,
            price: compile(layout.price)?,
            link: compile(layout.link)?,
            image: compile(layout.image)?,
        };

        Ok(Self {
            client,
            layout,
            base,
            search_url,
            selectors,
        })
    }

    fn search_url(&self, query: &str) -> Url {
        let mut url = self.search_url.clone();
        url.query_pairs_mut().append_pair(self.layout.query_param, query);
        url
    }

    /// Extract listings from a search results page
    fn parse_listings(&self, html: &str) -> Result<Vec<Listing>, ScrapeError> {
        let document = Html::parse_document(html);
        let cards: Vec<_> = document.select(&self.selectors.card).collect();

        debug!("{}: found {} product cards", self.layout.name, cards.len());

        let listings: Vec<Listing> = cards
            .iter()
            .enumerate()
            .filter_map(|(idx, card)| {
                let listing = self.parse_card(card);
                if listing.is_none() {
                    debug!("{}: skipped card {}", self.layout.name, idx);
                }
                listing
            })
            .collect();

        if !cards.is_empty() && listings.is_empty() {
            return Err(ScrapeError::InvalidResponse(format!(
                "{} product cards but none could be parsed",
                cards.len()
            )));
        }

        Ok(listings)
    }

    fn parse_card(&self, card: &ElementRef<'_>) -> Option<Listing> {
        let model = card
            .select(&self.selectors.title)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|title| !title.is_empty())?;

        // Cards are sometimes the anchor themselves.
        let href = card
            .select(&self.selectors.link)
            .next()
            .and_then(|el| el.value().attr("href"))
            .or_else(|| card.value().attr("href"))?;
        let url = self.base.join(href).ok()?;

        let price = card
            .select(&self.selectors.price)
            .next()
            .and_then(|el| parse_price(&el.text().collect::<String>()))?;

        let image_url = card
            .select(&self.selectors.image)
            .next()
            .and_then(|el| el.value().attr("src").or_else(|| el.value().attr("data-src")))
            .and_then(|src| self.base.join(src).ok())
            .map(|src| src.to_string());

        let id = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or(href)
            .to_string();

        Some(Listing {
            id,
            model,
            price,
            currency: self.layout.currency.to_string(),
            url: url.to_string(),
            source: self.layout.name.to_string(),
            image_url,
        })
    }
}

#[async_trait]
impl ScraperTrait for ShopScraper {
    async fn scrape(&self, query: &str) -> Result<Vec<Listing>, ScrapeError> {
        let url = self.search_url(query);

        debug!("Fetching URL: {}", url);

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            warn!("{} returned status: {}", self.layout.name, response.status());
            return Err(ScrapeError::Status(response.status().as_u16()));
        }

        let html = response.text().await?;

        debug!("Downloaded {} bytes of HTML", html.len());

        let listings = self.parse_listings(&html)?;

        info!("{}: {} listings for {:?}", self.layout.name, listings.len(), query);

        Ok(listings)
    }

    fn source_name(&self) -> &'static str {
        self.layout.name
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First run of digits and separators in `text`; whitespace only continues a run
/// when a digit follows it, so `2 990 ₽ 3 500 ₽` yields `2990`
fn first_number(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let Some(start) = chars.iter().position(|c| c.is_ascii_digit()) else {
        return String::new();
    };
    let mut run = String::new();

    for (idx, &c) in chars.iter().enumerate().skip(start) {
        if c.is_ascii_digit() || c == ',' || c == '.' {
            run.push(c);
        } else if c.is_whitespace() && chars.get(idx + 1).is_some_and(|n| n.is_ascii_digit()) {
            continue;
        } else {
            break;
        }
    }

    run
}

/// Parse a storefront price such as `1 234,50 ₽`, `49.99` or `1,299.00`
pub fn parse_price(text: &str) -> Option<f64> {
    let raw = first_number(text);
    let raw = raw.trim_matches(|c: char| c == ',' || c == '.');

    if !raw.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let decimal = match (raw.rfind(','), raw.rfind('.')) {
        (Some(comma), Some(dot)) => Some(comma.max(dot)),
        (Some(sep), None) | (None, Some(sep)) => {
            let sep_char = raw.as_bytes()[sep] as char;
            let single = raw.matches(sep_char).count() == 1;
            let fraction_len = raw.len() - sep - 1;
            (single && fraction_len <= 2).then_some(sep)
        }
        (None, None) => None,
    };

    let normalized: String = raw
        .char_indices()
        .filter_map(|(idx, c)| match c {
            '0'..='9' => Some(c),
            _ if Some(idx) == decimal => Some('.'),
            _ => None,
        })
        .collect();

    normalized.parse().ok()
}
