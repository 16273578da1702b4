//! tiered-cache demo driver.
//!
//! Builds the cache from configuration, preloads synthetic entries, reads a
//! hot subset, runs a few maintenance ticks and prints
//! per-tier statistics followed by the Prometheus exposition.

use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tracing::info;

use tiered_cache::cache::facade::{GetOptions, WarmEntry};
use tiered_cache::config::{Cli, Config};
use tiered_cache::metrics::CacheMetrics;
use tiered_cache::service::CacheService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "tiered_cache=debug"
    } else {
        "tiered_cache=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("tiered-cache v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(secs) = cli.interval_secs {
        config.maintenance.interval_secs = secs;
    }
    // The driver runs maintenance itself.
    config.maintenance.auto_start = false;

    for tier in &config.tiers {
        info!(
            tier = %tier.name,
            priority = tier.priority,
            capacity = tier.capacity_bytes,
            policy = %tier.eviction_policy,
            ttl = tier.default_ttl_seconds,
            "Tier configured"
        );
    }

    let service = CacheService::init(config)?;
    let cache = service.cache().clone();

    // Preload.
    let warmed = cache.warm_cache((0..cli.warm).map(|i| {
        WarmEntry::new(
            format!("item:{i}"),
            json!({ "id": i, "name": format!("item {i}"), "payload": "x".repeat(64) }),
        )
    }));
    info!(requested = cli.warm, warmed, "Preload finished");

    // Read a hot subset repeatedly, plus some misses.
    let hot = cli.warm.min(10);
    for _ in 0..8 {
        for i in 0..hot {
            cache.get_value(&format!("item:{i}"), &GetOptions::default());
        }
        cache.get_value("missing", &GetOptions::default());
    }

    // Maintenance.
    let interval = service.maintenance_interval();
    if service.start_maintenance(interval) {
        info!(
            ticks = cli.ticks,
            interval_secs = interval.as_secs(),
            "Running maintenance"
        );
        tokio::time::sleep(interval * cli.ticks + Duration::from_millis(100)).await;
        service.stop_maintenance().await;
    }

    // Report.
    println!("{}", serde_json::to_string_pretty(&cache.all_stats())?);
    println!(
        "{}",
        serde_json::to_string_pretty(&cache.aggregate_stats())?
    );

    let metrics = CacheMetrics::new()?;
    metrics.update(&cache);
    print!("{}", metrics.render()?);

    service.shutdown().await;
    Ok(())
}
