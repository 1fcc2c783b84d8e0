use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use knife_scout::config::{self, Config};
use knife_scout::scrapers::{default_scrapers, ScraperManager, SearchParams};
use knife_scout::{
    ResultCache, SearchService, SourceStatus, TracingObserver, UserProfile, UserStore,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "knife-scout", about = "Search knife marketplaces at once")]
struct Args {
    /// TOML config file; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Chat platform id to record this search for (requires [postgres])
    #[arg(long)]
    user: Option<i64>,
    #[arg(long)]
    min_price: Option<f64>,
    #[arg(long)]
    max_price: Option<f64>,
    /// Write the full result as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
    #[arg(required = true)]
    query: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log.level)),
        )
        .init();

    let observer = Arc::new(TracingObserver);
    let scrapers = default_scrapers(&cfg.http)?;
    let manager = ScraperManager::new(scrapers, cfg.search.adapter_timeout(), observer.clone());
    info!("Registered sources: {}", manager.sources().join(", "));

    let service = SearchService::new(
        ResultCache::connect(&cfg.cache).await,
        Arc::new(manager),
        cfg.search.cache_ttl(),
        cfg.search.max_query_len,
        observer,
    );

    let params = SearchParams {
        query: args.query.join(" "),
        min_price: args.min_price,
        max_price: args.max_price,
    };

    let result = service.search_with(&params).await?;

    if let Some(external_id) = args.user {
        record_user(&cfg, external_id, &params).await;
    }

    println!("Results for {:?} ({} listings)\n", result.query, result.listings.len());
    for (i, listing) in result.listings.iter().enumerate() {
        println!("{}. {} ({:.2} {})", i + 1, listing.model, listing.price, listing.currency);
        println!("   Source: {}", listing.source);
        println!("   URL: {}", listing.url);
        println!();
    }
    for (source, status) in &result.sources {
        match status {
            SourceStatus::Success { listings } => println!("{}: {} listings", source, listings),
            SourceStatus::Timeout => println!("{}: timed out", source),
            SourceStatus::SourceError { message } | SourceStatus::InvalidResponse { message } => {
                println!("{}: failed ({})", source, message)
            }
        }
    }

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&result)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved results to {}", path.display());
    }

    Ok(())
}

/// Remember a search that succeeded; store failures are reported, never fatal
async fn record_user(cfg: &Config, external_id: i64, params: &SearchParams) {
    let Some(postgres) = &cfg.postgres else {
        warn!("--user given but no [postgres] section configured");
        return;
    };

    let outcome = async {
        let store = UserStore::connect(postgres).await?;
        store.ensure_schema().await?;
        // The CLI knows no profile fields; only create the row, never blank an existing one.
        if store.get_by_external_id(external_id).await?.is_none() {
            store.upsert(external_id, &UserProfile::default()).await?;
        }
        store.save_search_params(external_id, params).await
    }
    .await;

    match outcome {
        Ok(Some(user)) => info!("Recorded search for {}", user.display_name()),
        Ok(None) => warn!("User {} disappeared before the search was recorded", external_id),
        Err(err) => warn!("Could not record search for user {}: {}", external_id, err),
    }
}
