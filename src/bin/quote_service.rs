// src/bin/quote_service.rs

use std::convert::Infallible;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Deserialize;
use solana_sdk::pubkey::Pubkey;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::Filter;

use solquote::cache::{HealthResponse, QuoteCache, QuoteCacheConfig, QuoteKey};
use solquote::config::Config;
use solquote::monitoring::{logging, metrics};
use solquote::router::QuoteFilters;
use solquote::rpc::RpcPool;
use solquote::subscription::{PubsubTransport, SubscriptionManager};

#[derive(Debug, Deserialize)]
struct QuoteParams {
    input: Option<String>,
    output: Option<String>,
    amount: Option<String>,
    #[serde(rename = "slippageBps")]
    slippage_bps: Option<String>,
    dexes: Option<String>,
    #[serde(rename = "excludeDexes")]
    exclude_dexes: Option<String>,
    #[serde(rename = "minLiquidity")]
    min_liquidity: Option<String>,
}

fn split_csv(value: &Option<String>) -> Vec<String> {
    value
        .as_deref()
        .unwrap_or("")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn json_error(message: impl Into<String>, status: StatusCode) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({ "error": message.into() })),
        status,
    )
}

async fn handle_quote(
    params: QuoteParams,
    cache: Arc<QuoteCache>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Infallible> {
    // Validation des entrées : rien d'invalide ne traverse vers le cache.
    let (Some(input), Some(output), Some(amount)) = (&params.input, &params.output, &params.amount)
    else {
        return Ok(json_error(
            "Missing required parameters: input, output, amount",
            StatusCode::BAD_REQUEST,
        ));
    };

    let Ok(input_mint) = Pubkey::from_str(input) else {
        return Ok(json_error("Invalid input mint", StatusCode::BAD_REQUEST));
    };
    let Ok(output_mint) = Pubkey::from_str(output) else {
        return Ok(json_error("Invalid output mint", StatusCode::BAD_REQUEST));
    };
    let amount = match amount.parse::<u64>() {
        Ok(value) if value > 0 => value,
        _ => return Ok(json_error("Invalid amount (must be a positive integer)", StatusCode::BAD_REQUEST)),
    };

    let custom_slippage = match &params.slippage_bps {
        None => None,
        Some(raw) => match raw.parse::<u16>() {
            Ok(bps) if bps <= 10_000 => Some(bps),
            _ => {
                return Ok(json_error(
                    "Invalid slippageBps parameter (must be 0-10000)",
                    StatusCode::BAD_REQUEST,
                ))
            }
        },
    };

    let min_liquidity = match &params.min_liquidity {
        None => 0.0,
        Some(raw) => match raw.parse::<f64>() {
            Ok(value) if value >= 0.0 => value,
            _ => {
                return Ok(json_error(
                    "Invalid minLiquidity parameter (must be positive number)",
                    StatusCode::BAD_REQUEST,
                ))
            }
        },
    };

    let filters = QuoteFilters {
        include_dexes: split_csv(&params.dexes),
        exclude_dexes: split_csv(&params.exclude_dexes),
        min_liquidity,
    };

    let key = QuoteKey { input_mint, output_mint, amount };
    match cache.get_or_compute(key, &filters).await {
        Ok(quote) => {
            // Le slippage par requête ne recalcule que le seuil rapporté.
            let quote = match custom_slippage {
                Some(bps) if bps != quote.slippage_bps => quote.with_slippage(bps),
                _ => quote,
            };
            Ok(warp::reply::with_status(warp::reply::json(&quote), StatusCode::OK))
        }
        Err(e) => {
            let message = format!("Failed to calculate quote: {}", e);
            warn!(%e, "quote refusé");
            Ok(json_error(message, StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

async fn handle_health(
    cache: Arc<QuoteCache>,
    started: Instant,
) -> Result<warp::reply::Json, Infallible> {
    let health = HealthResponse {
        status: "healthy".to_string(),
        last_update: cache.last_update(),
        cached_routes: cache.cached_count(),
        uptime: format!("{:?}", started.elapsed()),
    };
    Ok(warp::reply::json(&health))
}

async fn handle_root(cache: Arc<QuoteCache>) -> Result<warp::reply::Json, Infallible> {
    let quotes = cache.all_cached();
    let response = serde_json::json!({
        "service": "solquote",
        "status": "running",
        "cachedQuotes": quotes.len(),
        "quotes": quotes,
        "endpoints": {
            "quote": "/quote?input=<mint>&output=<mint>&amount=<amount>",
            "health": "/health",
        },
    });
    Ok(warp::reply::json(&response))
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::setup_logging();

    let config = Config::load()?;
    info!(?config, "démarrage du service de cotation");

    let gateway = Arc::new(RpcPool::new(
        &config.endpoints(),
        config.rate_limit_per_second,
        config.max_retries,
    )?);
    info!(endpoints = gateway.size(), "pool RPC initialisé");

    // Canal push : best-effort. Sans websocket, le service retombe en mode
    // pull pur.
    let subscriptions = match config.ws_endpoint() {
        Some(ws_url) => {
            info!(%ws_url, "connexion du canal push");
            let transport = Arc::new(PubsubTransport::new(ws_url));
            match SubscriptionManager::start(
                transport,
                Duration::from_secs(config.ws_reconnect_delay_secs),
            )
            .await
            {
                Ok((manager, dirty_rx)) => Some((manager, dirty_rx)),
                Err(e) => {
                    warn!(%e, "websocket indisponible, repli en mode pull");
                    None
                }
            }
        }
        None => None,
    };

    let cache_config = QuoteCacheConfig {
        slippage_bps: config.slippage_bps,
        refresh_interval: Duration::from_secs(config.refresh_interval_secs),
    };
    let cache = match subscriptions {
        Some((manager, dirty_rx)) => {
            let cache = QuoteCache::new(gateway.clone(), Some(manager), cache_config);
            cache.spawn_update_worker(dirty_rx);
            cache
        }
        None => QuoteCache::new(gateway.clone(), None, cache_config),
    };
    cache.start_periodic_refresh();

    let metrics_port = config.metrics_port;
    tokio::spawn(async move { metrics::serve_metrics(metrics_port).await });

    let started = Instant::now();
    let with_cache = {
        let cache = cache.clone();
        warp::any().map(move || cache.clone())
    };

    let quote = warp::path!("quote")
        .and(warp::get())
        .and(warp::query::<QuoteParams>())
        .and(with_cache.clone())
        .and_then(handle_quote);

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_cache.clone())
        .and_then(move |cache| handle_health(cache, started));

    let root = warp::path::end().and(warp::get()).and(with_cache).and_then(handle_root);

    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["Content-Type"]);

    let routes = quote.or(health).or(root).with(cors);

    info!(port = config.http_port, "HTTP à l'écoute");
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(
        ([0, 0, 0, 0], config.http_port),
        async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(%e, "signal handler en échec");
            }
            info!("arrêt demandé");
        },
    );
    server.await;

    info!("service arrêté");
    Ok(())
}
