// src/discovery.rs

use anyhow::{anyhow, bail, Result};
use futures_util::future::join_all;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::decoders::registry::{self, ProtocolDescriptor};
use crate::decoders::Pool;
use crate::rpc::SolanaGateway;

/// Énumère les pools d'un protocole pour une paire, dans les deux ordres
/// canoniques. Les échecs de décodage sont silencieusement écartés (dérive
/// de schéma ou filtre mal ciblé) ; les échecs de gateway remontent.
pub async fn fetch_protocol_pools(
    descriptor: &'static ProtocolDescriptor,
    gateway: &dyn SolanaGateway,
    base_mint: &Pubkey,
    quote_mint: &Pubkey,
) -> Result<Vec<Pool>> {
    let forward = descriptor.pair_filters(base_mint, quote_mint);
    let reverse = descriptor.pair_filters(quote_mint, base_mint);

    let (forward_accounts, reverse_accounts) = tokio::join!(
        gateway.get_program_accounts(&descriptor.program_id, &forward),
        gateway.get_program_accounts(&descriptor.program_id, &reverse),
    );

    let mut accounts = forward_accounts?;
    accounts.extend(reverse_accounts?);

    let mut pools = Vec::with_capacity(accounts.len());
    for (address, data) in accounts {
        match (descriptor.decode)(&address, &data) {
            Ok(pool) => pools.push(pool),
            Err(error) => {
                debug!(protocol = descriptor.name, %address, %error, "pool écarté au décodage");
            }
        }
    }
    Ok(pools)
}

/// Parcourt tout le registre pour une paire. Un protocole dont le scan
/// échoue est journalisé et ignoré ; si tous échouent, l'erreur remonte.
pub async fn fetch_pools_by_pair(
    gateway: &dyn SolanaGateway,
    base_mint: &Pubkey,
    quote_mint: &Pubkey,
) -> Result<Vec<Pool>> {
    let descriptors = registry::all();
    let scans = join_all(
        descriptors
            .iter()
            .map(|d| fetch_protocol_pools(d, gateway, base_mint, quote_mint)),
    )
    .await;

    let mut pools = Vec::new();
    let mut failures = 0usize;
    for (descriptor, outcome) in descriptors.iter().zip(scans) {
        match outcome {
            Ok(found) => {
                debug!(protocol = descriptor.name, count = found.len(), "pools découverts");
                pools.extend(found);
            }
            Err(error) => {
                warn!(protocol = descriptor.name, %error, "échec du scan de découverte");
                failures += 1;
            }
        }
    }

    if pools.is_empty() && failures == descriptors.len() {
        bail!("discovery failed for every protocol");
    }
    Ok(pools)
}

/// Relit un pool connu par son adresse et le redécode via le registre.
pub async fn fetch_pool_by_id(gateway: &dyn SolanaGateway, pool_id: &Pubkey) -> Result<Pool> {
    let account = gateway.get_account(pool_id).await?;
    registry::decode_account(pool_id, &account.owner, &account.data)
        .map_err(|e| anyhow!("failed to decode pool {}: {}", pool_id, e))
}
