//! Gateway entrypoint: config, wiring, HTTP listener, metrics exporter.

mod cli;
mod server;

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use clap::Parser;
use eyre::WrapErr;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gateway_cache::RpcCache;
use gateway_chain_state::ChainMetadataStore;
use gateway_config::{ChainConfig, GatewayConfig};
use gateway_health::HealthCheckManager;
use gateway_router::{default_routing_strategy, RequestExecutor, Router};

use crate::cli::Cli;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = GatewayConfig::load(&cli.config)
        .wrap_err_with(|| format!("loading config from {}", cli.config.display()))?;
    let port = cli.port.unwrap_or(config.port);

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .wrap_err("installing prometheus exporter")?;
    info!(target: "gateway", %metrics_addr, "metrics exporter listening");

    let mut routers = HashMap::new();
    for chain in &config.chains {
        let router = build_chain(chain).await?;
        router.start();
        info!(
            target: "gateway",
            chain = %chain.chain_name,
            upstreams = chain.upstreams.len(),
            "chain wired"
        );
        routers.insert(chain.chain_name.clone(), router);
    }
    let shutdown_routers: Vec<_> = routers.values().cloned().collect();

    let app = server::app(routers);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    info!(target: "gateway", %addr, "gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!(target: "gateway", "shutting down");
        })
        .await
        .wrap_err("serving")?;

    for router in shutdown_routers {
        router.shutdown();
    }
    Ok(())
}

/// Wires the store, health checks, cache and routing pipeline of one chain.
async fn build_chain(chain: &ChainConfig) -> eyre::Result<Arc<Router>> {
    let store = ChainMetadataStore::spawn(chain.upstreams.len());
    let health = Arc::new(
        HealthCheckManager::from_config(chain, store.clone())
            .wrap_err_with(|| format!("building probes for chain {}", chain.chain_name))?,
    );

    let cache = match &chain.cache {
        Some(cache_config) => match RpcCache::from_config(&chain.chain_name, cache_config).await {
            Ok(cache) => cache.map(Arc::new),
            // A cache that cannot connect must not keep the chain down.
            Err(err) => {
                warn!(
                    target: "gateway",
                    chain = %chain.chain_name,
                    %err,
                    "cache unavailable, serving uncached"
                );
                None
            }
        },
        None => None,
    };

    let strategy = default_routing_strategy(chain, &health, &store);
    Ok(Arc::new(Router::new(chain, health, strategy, RequestExecutor::new(cache))))
}
