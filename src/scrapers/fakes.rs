//! In-memory adapters and local HTTP endpoints for exercising the scrapers, the
//! manager and the search service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::models::Listing;
use crate::scrapers::shops::{ShopLayout, ShopScraper, LAMNIA};
use crate::scrapers::traits::{ScrapeError, ScraperTrait};

pub fn listing(source: &str, id: &str, model: &str, price: f64) -> Listing {
    Listing {
        id: id.to_string(),
        model: model.to_string(),
        price,
        currency: "RUB".to_string(),
        url: format!("https://{}.example/items/{}", source, id),
        source: source.to_string(),
        image_url: None,
    }
}

/// Answers every query with the same listings after an optional delay, counting calls
pub struct StaticScraper {
    name: &'static str,
    listings: Vec<Listing>,
    delay: Duration,
    calls: AtomicUsize,
}

impl StaticScraper {
    pub fn new(name: &'static str, listings: Vec<Listing>) -> Self {
        Self {
            name,
            listings,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScraperTrait for StaticScraper {
    async fn scrape(&self, _query: &str) -> Result<Vec<Listing>, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.listings.clone())
    }

    fn source_name(&self) -> &'static str {
        self.name
    }
}

/// Always fails with an HTTP status
pub struct FailingScraper {
    pub name: &'static str,
    pub status: u16,
}

#[async_trait]
impl ScraperTrait for FailingScraper {
    async fn scrape(&self, _query: &str) -> Result<Vec<Listing>, ScrapeError> {
        Err(ScrapeError::Status(self.status))
    }

    fn source_name(&self) -> &'static str {
        self.name
    }
}

/// Panics on every call
pub struct PanickingScraper;

#[async_trait]
impl ScraperTrait for PanickingScraper {
    async fn scrape(&self, _query: &str) -> Result<Vec<Listing>, ScrapeError> {
        panic!("parser exploded")
    }

    fn source_name(&self) -> &'static str {
        "panicky"
    }
}

/// Never finishes; the held sender is dropped when the call is cancelled
pub struct HangingScraper {
    dropped: Mutex<Option<oneshot::Sender<()>>>,
}

impl HangingScraper {
    pub fn new() -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let scraper = Arc::new(Self {
            dropped: Mutex::new(Some(tx)),
        });
        (scraper, rx)
    }
}

#[async_trait]
impl ScraperTrait for HangingScraper {
    async fn scrape(&self, _query: &str) -> Result<Vec<Listing>, ScrapeError> {
        let _guard = self.dropped.lock().unwrap().take();
        std::future::pending::<()>().await;
        Ok(Vec::new())
    }

    fn source_name(&self) -> &'static str {
        "hanging"
    }
}

/// Accepts connections on a local port and never writes a byte back.
/// Returns the base URL of the endpoint.
pub async fn stalling_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    format!("http://{}", addr)
}

/// Answers every request on a local port with `status` and `body`.
/// Returns the base URL of the endpoint.
pub async fn canned_server(status: &str, body: &str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let response = response.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{}", addr)
}

/// Lamnia's layout pointed at `base_url`, with a client that gives up after `timeout`
pub fn local_shop(base_url: String, timeout: Duration) -> ShopScraper {
    let layout = ShopLayout {
        base_url: Box::leak(base_url.into_boxed_str()),
        ..LAMNIA
    };
    let client = Client::builder().timeout(timeout).no_proxy().build().unwrap();
    ShopScraper::with_client(layout, client).unwrap()
}
