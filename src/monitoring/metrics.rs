// src/monitoring/metrics.rs

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use warp::Filter;

lazy_static! {
    // --- Cotation ---
    pub static ref QUOTE_LATENCY_SECONDS: HistogramVec = register_histogram_vec!(
        "quote_latency_seconds",
        "Latence des cotations par pool",
        &["protocol"]
    ).unwrap();

    // --- Gateway RPC ---
    pub static ref RPC_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "rpc_requests_total",
        "Requêtes RPC par méthode et statut",
        &["method", "status"]
    ).unwrap();

    // --- Chemin push ---
    pub static ref PUSH_MESSAGES_RECEIVED: IntCounter = register_int_counter!(
        "push_messages_received_total",
        "Notifications de comptes reçues sur le canal push"
    ).unwrap();
    pub static ref COALESCED_UPDATES: IntCounter = register_int_counter!(
        "push_updates_coalesced_total",
        "Notifications absorbées par un recalcul déjà en attente"
    ).unwrap();

    // --- Cache de quotes ---
    pub static ref CACHED_ROUTES: IntGauge = register_int_gauge!(
        "cached_routes",
        "Entrées actuellement en cache"
    ).unwrap();
}

fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Sert /metrics sur le port dédié.
pub async fn serve_metrics(port: u16) {
    let route = warp::path!("metrics").map(render);
    warp::serve(route).run(([0, 0, 0, 0], port)).await;
}
