// src/cache/types.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// L'étape unique du plan de route (pas de multi-hop ici).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlan {
    pub protocol: String,
    pub pool_id: String,
    pub pool_address: String,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    pub program_id: String,
}

/// Le quote servi aux collaborateurs externes. Les montants sont des
/// chaînes décimales d'unités brutes on-chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedQuote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    pub route_plan: Vec<RoutePlan>,
    pub slippage_bps: u16,
    pub other_amount_threshold: String,
    pub last_update: DateTime<Utc>,
    pub time_taken: String,
}

/// threshold = floor(outAmount * (10_000 - bps) / 10_000)
pub fn slippage_threshold(out_amount: u64, slippage_bps: u16) -> u64 {
    let bps = slippage_bps.min(10_000) as u128;
    (out_amount as u128 * (10_000 - bps) / 10_000) as u64
}

impl CachedQuote {
    /// Variante avec un slippage par requête : seul le seuil rapporté est
    /// recalculé, l'entrée en cache n'est pas touchée.
    pub fn with_slippage(&self, slippage_bps: u16) -> CachedQuote {
        let out_amount: u64 = self.out_amount.parse().unwrap_or(0);
        let mut quote = self.clone();
        quote.slippage_bps = slippage_bps;
        quote.other_amount_threshold = slippage_threshold(out_amount, slippage_bps).to_string();
        quote
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub last_update: Option<DateTime<Utc>>,
    pub cached_routes: usize,
    pub uptime: String,
}
