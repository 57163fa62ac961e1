// src/router.rs

use std::sync::Arc;

use anyhow::{bail, Result};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::warn;

use crate::decoders::{Pool, PoolOperations};
use crate::monitoring::metrics;
use crate::rpc::SolanaGateway;

/// Filtres de routage optionnels, passés tels quels par l'appelant.
#[derive(Debug, Clone, Default)]
pub struct QuoteFilters {
    /// Si non vide, seuls ces protocoles participent (égalité stricte).
    pub include_dexes: Vec<String>,
    pub exclude_dexes: Vec<String>,
    /// Plancher de liquidité, exprimé côté sortie en unités "stables"
    /// (6 décimales). 0 = désactivé.
    pub min_liquidity: f64,
}

/// Le pool gagnant et sa sortie.
#[derive(Debug)]
pub struct BestQuote {
    pub pool: Arc<RwLock<Pool>>,
    pub pool_id: Pubkey,
    pub protocol: &'static str,
    pub program_id: Pubkey,
    pub out_amount: u64,
}

fn passes_filters(pool: &Pool, token_in: &Pubkey, filters: &QuoteFilters) -> bool {
    let name = pool.protocol_name();

    if !filters.include_dexes.is_empty() && !filters.include_dexes.iter().any(|d| d == name) {
        return false;
    }
    if filters.exclude_dexes.iter().any(|d| d == name) {
        return false;
    }
    if filters.min_liquidity > 0.0 {
        // Les kinds sans proxy de réserve passent toujours le plancher.
        if let Some(reserve) = pool.opposite_reserve(token_in) {
            let liquidity = reserve as f64 / 1e6;
            if liquidity < filters.min_liquidity {
                return false;
            }
        }
    }
    true
}

/// Fan-out concurrent : une tâche par pool candidat, réduction au maximum
/// de sortie. L'échec d'un pool est journalisé et exclu, jamais propagé.
/// L'égalité se départage sur le plus petit id de pool (déterministe).
///
/// L'annulation est par abandon : si l'appelant abandonne ce futur (deadline,
/// timeout), le JoinSet interrompt toutes les tâches en vol et aucun
/// résultat ne fuit.
pub async fn get_best_pool(
    pools: &[Arc<RwLock<Pool>>],
    token_in: &Pubkey,
    amount_in: u64,
    filters: &QuoteFilters,
    current_timestamp: i64,
    gateway: Arc<dyn SolanaGateway>,
) -> Result<BestQuote> {
    let mut candidates = Vec::new();
    for pool in pools {
        let guard = pool.read().await;
        if passes_filters(&guard, token_in, filters) {
            candidates.push(pool.clone());
        }
    }

    if candidates.is_empty() {
        bail!("no pools found after filtering");
    }

    let mut tasks: JoinSet<(usize, Result<u64>)> = JoinSet::new();
    for (index, pool) in candidates.iter().enumerate() {
        let protocol = {
            let guard = pool.read().await;
            guard.protocol_name()
        };
        let pool = pool.clone();
        let gateway = gateway.clone();
        let token_in = *token_in;
        tasks.spawn(async move {
            let timer = metrics::QUOTE_LATENCY_SECONDS
                .with_label_values(&[protocol])
                .start_timer();
            // Chemin rapide en lecture seule quand l'état est frais ; sinon
            // verrou en écriture le temps du rafraîchissement.
            let outcome = {
                let fresh = {
                    let guard = pool.read().await;
                    guard.is_fresh(current_timestamp)
                };
                if fresh {
                    let guard = pool.read().await;
                    guard.get_quote(&token_in, amount_in, current_timestamp)
                } else {
                    let mut guard = pool.write().await;
                    guard
                        .get_quote_async(&token_in, amount_in, current_timestamp, gateway.as_ref())
                        .await
                }
            };
            timer.observe_duration();
            (index, outcome)
        });
    }

    let mut best: Option<(usize, u64, String)> = None;
    while let Some(joined) = tasks.join_next().await {
        let Ok((index, outcome)) = joined else {
            continue; // tâche interrompue
        };
        match outcome {
            Ok(out_amount) => {
                let pool_id = {
                    let guard = candidates[index].read().await;
                    guard.address().to_string()
                };
                let replace = match &best {
                    None => out_amount > 0,
                    Some((_, best_out, best_id)) => {
                        out_amount > *best_out || (out_amount == *best_out && pool_id < *best_id)
                    }
                };
                if replace {
                    best = Some((index, out_amount, pool_id));
                }
            }
            Err(error) => {
                let guard = candidates[index].read().await;
                warn!(pool = %guard.address(), %error, "échec de cotation, pool exclu");
            }
        }
    }

    let Some((index, out_amount, _)) = best else {
        bail!("no route found");
    };

    let winner = candidates[index].clone();
    let (pool_id, protocol, program_id) = {
        let guard = winner.read().await;
        (guard.address(), guard.protocol_name(), guard.program_id())
    };
    Ok(BestQuote { pool: winner, pool_id, protocol, program_id, out_amount })
}
