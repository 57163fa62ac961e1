// src/config.rs

use anyhow::{bail, Result};
use serde::Deserialize;

/// Configuration du service, lue dans l'environnement (et .env s'il
/// existe). Pas de singleton : la struct est passée explicitement aux
/// constructeurs qui en ont besoin.
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Endpoints RPC, séparés par des virgules. Obligatoire.
    pub rpc_endpoints: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_rate_limit_per_second")]
    pub rate_limit_per_second: u32,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
    #[serde(default = "default_max_retries")]
    pub max_retries: u8,
    /// URL websocket explicite ; à défaut, dérivée du premier endpoint.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_ws_reconnect_delay_secs")]
    pub ws_reconnect_delay_secs: u64,
}

fn default_http_port() -> u16 { 8080 }
fn default_metrics_port() -> u16 { 9100 }
fn default_refresh_interval_secs() -> u64 { 30 }
fn default_rate_limit_per_second() -> u32 { 20 }
fn default_slippage_bps() -> u16 { 50 }
fn default_max_retries() -> u8 { 3 }
fn default_ws_reconnect_delay_secs() -> u64 { 5 }

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoints().is_empty() {
            bail!("no RPC endpoints configured, set RPC_ENDPOINTS");
        }
        if self.slippage_bps > 10_000 {
            bail!("slippage_bps {} out of range [0, 10000]", self.slippage_bps);
        }
        Ok(())
    }

    pub fn endpoints(&self) -> Vec<String> {
        self.rpc_endpoints
            .split(',')
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect()
    }

    /// L'URL du canal push : explicite, ou dérivée du premier endpoint
    /// (http -> ws, https -> wss).
    pub fn ws_endpoint(&self) -> Option<String> {
        if let Some(url) = &self.ws_url {
            return Some(url.clone());
        }
        self.endpoints().first().map(|http| http_to_ws_url(http))
    }
}

pub fn http_to_ws_url(http_url: &str) -> String {
    if let Some(rest) = http_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = http_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        http_url.to_string()
    }
}
