// src/subscription/pool_cache.rs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::RwLock;
use tracing::{debug, error};

use crate::decoders::{Pool, PoolOperations};

/// Un pool suivi, avec ses métadonnées de fraîcheur. Un écrivain (le push),
/// plusieurs lecteurs (le routeur) : RwLock par pool, jamais d'état déchiré.
pub struct PoolEntry {
    pub pool: Arc<RwLock<Pool>>,
    last_slot: AtomicU64,
    last_update: AtomicI64,
    stale: AtomicBool,
}

impl PoolEntry {
    pub fn last_slot(&self) -> u64 {
        self.last_slot.load(Ordering::SeqCst)
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::SeqCst)
    }

    pub fn last_update(&self) -> i64 {
        self.last_update.load(Ordering::SeqCst)
    }
}

/// L'état partagé du sous-système de fraîcheur : pools suivis et index
/// inverse compte surveillé -> pool.
#[derive(Default)]
pub struct PoolStateCache {
    pools: std::sync::RwLock<HashMap<Pubkey, Arc<PoolEntry>>>,
    watch_map: std::sync::RwLock<HashMap<Pubkey, Pubkey>>,
}

impl PoolStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insère un pool découvert et enregistre ses comptes surveillés.
    /// Retourne le handle partagé (existant si le pool était déjà suivi).
    pub fn insert(&self, pool: Pool) -> Arc<RwLock<Pool>> {
        let pool_id = pool.address();
        let watched = pool.accounts_to_watch();

        let mut pools = self.pools.write().unwrap();
        if let Some(existing) = pools.get(&pool_id) {
            return existing.pool.clone();
        }

        let entry = Arc::new(PoolEntry {
            pool: Arc::new(RwLock::new(pool)),
            last_slot: AtomicU64::new(0),
            last_update: AtomicI64::new(0),
            stale: AtomicBool::new(false),
        });
        let handle = entry.pool.clone();
        pools.insert(pool_id, entry);
        drop(pools);

        let mut watch_map = self.watch_map.write().unwrap();
        for account in watched {
            watch_map.insert(account, pool_id);
        }
        handle
    }

    pub fn get(&self, pool_id: &Pubkey) -> Option<Arc<RwLock<Pool>>> {
        self.pools.read().unwrap().get(pool_id).map(|e| e.pool.clone())
    }

    pub fn entry(&self, pool_id: &Pubkey) -> Option<Arc<PoolEntry>> {
        self.pools.read().unwrap().get(pool_id).cloned()
    }

    pub fn pool_for_account(&self, account: &Pubkey) -> Option<Pubkey> {
        self.watch_map.read().unwrap().get(account).copied()
    }

    pub fn contains(&self, pool_id: &Pubkey) -> bool {
        self.pools.read().unwrap().contains_key(pool_id)
    }

    pub fn len(&self) -> usize {
        self.pools.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Retire un pool et ses comptes surveillés (plus aucun dépendant).
    pub fn remove(&self, pool_id: &Pubkey) {
        self.pools.write().unwrap().remove(pool_id);
        self.watch_map.write().unwrap().retain(|_, p| p != pool_id);
    }

    /// Applique une notification push. Les slots sont monotones par pool :
    /// une notification plus ancienne que l'état courant est ignorée. Sur
    /// échec de décodage, le pool est marqué périmé mais pas retiré — le
    /// rafraîchissement pull le récupérera.
    ///
    /// Retourne l'id du pool touché quand l'état a réellement changé.
    pub async fn apply_update(
        &self,
        account: &Pubkey,
        data: &[u8],
        slot: u64,
        timestamp: i64,
    ) -> Result<Option<Pubkey>> {
        let Some(pool_id) = self.pool_for_account(account) else {
            return Ok(None); // compte inconnu, notification tardive
        };
        let Some(entry) = self.entry(&pool_id) else {
            return Ok(None);
        };

        let last = entry.last_slot.load(Ordering::SeqCst);
        if slot < last {
            debug!(%pool_id, slot, last, "notification en retard ignorée");
            return Ok(None);
        }

        let mut pool = entry.pool.write().await;
        match pool.apply_account_update(account, data, timestamp) {
            Ok(()) => {
                entry.last_slot.store(slot, Ordering::SeqCst);
                entry.last_update.store(timestamp, Ordering::SeqCst);
                entry.stale.store(false, Ordering::SeqCst);
                Ok(Some(pool_id))
            }
            Err(e) => {
                error!(%pool_id, %account, error = %e, "décodage push en échec, pool marqué périmé");
                entry.stale.store(true, Ordering::SeqCst);
                Err(anyhow!("push decode failed for pool {}: {}", pool_id, e))
            }
        }
    }
}
