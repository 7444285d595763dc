// src/main.rs
use env_logger::Builder;
use log::{error, info, warn, LevelFilter};
use std::process;
use std::sync::Arc;
use stock_trader::api;
use stock_trader::clock::SystemClock;
use stock_trader::config::Config;
use stock_trader::credentials::Argon2Hasher;
use stock_trader::db::{ScyllaStore, Store};
use stock_trader::memory::MemoryStore;
use stock_trader::quote::AlphaVantage;
use stock_trader::state::{AppState, Capabilities};
use warp::Filter;

#[tokio::main]
async fn main() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let store: Arc<dyn Store> = match &config.scylla_node {
        Some(node) => match ScyllaStore::connect(node).await {
            Ok(store) => {
                info!("Connected to database at {}...", node);
                Arc::new(store)
            }
            Err(e) => {
                error!("Failed to initialize database: {}", e);
                process::exit(1);
            }
        },
        None => {
            warn!("SCYLLA_NODE not set, accounts are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let state = Arc::new(AppState::new(
        Capabilities {
            store,
            quotes: Arc::new(AlphaVantage::new(config.api_key.clone())),
            hasher: Arc::new(Argon2Hasher::default()),
            clock: Arc::new(SystemClock),
        },
        config.starting_cash,
        config.jwt_secret.as_bytes(),
        chrono::Duration::seconds(config.token_ttl_secs),
    ));

    let routes = api::app(state).with(warp::log("stock_trader"));

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(routes).run(config.bind_addr).await;
}
