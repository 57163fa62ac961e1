// src/subscription/manager.rs

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::decoders::{Pool, PoolOperations};
use crate::monitoring::metrics;
use crate::subscription::pool_cache::PoolStateCache;
use crate::subscription::transport::{AccountSubscriber, AccountUpdate, PushTransport};

/// Orchestration du chemin push : abonne les comptes des pools suivis,
/// décode chaque notification dans l'état du pool, et signale les pools
/// touchés sur un canal *coalescé* — au plus un événement en attente par
/// pool, les rafales supplémentaires ne font que reposer le drapeau.
pub struct SubscriptionManager {
    subscriber: Arc<AccountSubscriber>,
    pool_cache: Arc<PoolStateCache>,
    pending: Arc<Mutex<HashSet<Pubkey>>>,
    dirty_tx: mpsc::UnboundedSender<Pubkey>,
}

impl SubscriptionManager {
    /// Démarre le sous-système : connexion push, pompe de notifications et
    /// boucle de reconnexion. Retourne aussi le flux des pools invalidés,
    /// que le consommateur (le cache de quotes) draine à son rythme.
    pub async fn start(
        transport: Arc<dyn PushTransport>,
        reconnect_delay: Duration,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<Pubkey>)> {
        let (update_tx, update_rx) = mpsc::channel::<AccountUpdate>(1_024);
        let (dirty_tx, dirty_rx) = mpsc::unbounded_channel();

        let subscriber = AccountSubscriber::new(transport, update_tx);
        subscriber.connect().await?;
        subscriber.spawn_reconnect_loop(reconnect_delay);

        let manager = Arc::new(Self {
            subscriber,
            pool_cache: Arc::new(PoolStateCache::new()),
            pending: Arc::new(Mutex::new(HashSet::new())),
            dirty_tx,
        });
        manager.spawn_dispatcher(update_rx);

        info!("sous-système push démarré");
        Ok((manager, dirty_rx))
    }

    /// La pompe : applique chaque notification hors du chemin critique du
    /// lecteur websocket et pousse l'id du pool touché, coalescé.
    fn spawn_dispatcher(self: &Arc<Self>, mut update_rx: mpsc::Receiver<AccountUpdate>) {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(update) = update_rx.recv().await {
                let timestamp = Utc::now().timestamp();
                match manager
                    .pool_cache
                    .apply_update(&update.account, &update.data, update.slot, timestamp)
                    .await
                {
                    Ok(Some(pool_id)) => {
                        debug!(%pool_id, slot = update.slot, "état de pool rafraîchi par push");
                        manager.mark_dirty(pool_id);
                    }
                    Ok(None) => {}
                    Err(_) => {
                        // déjà journalisé et marqué périmé par le cache d'état
                    }
                }
            }
        });
    }

    fn mark_dirty(&self, pool_id: Pubkey) {
        let mut pending = self.pending.lock().unwrap();
        if pending.insert(pool_id) {
            let _ = self.dirty_tx.send(pool_id);
        } else {
            metrics::COALESCED_UPDATES.inc();
        }
    }

    /// À appeler par le consommateur juste avant de recalculer : libère le
    /// drapeau pour que l'événement suivant soit re-signalé.
    pub fn acknowledge(&self, pool_id: &Pubkey) {
        self.pending.lock().unwrap().remove(pool_id);
    }

    /// Suit un pool : insertion dans le cache d'état et abonnement de tous
    /// ses comptes observables. Idempotent.
    pub async fn subscribe_pool(&self, pool: Pool) -> Result<Arc<RwLock<Pool>>> {
        let pool_id = pool.address();
        let accounts = pool.accounts_to_watch();
        let handle = self.pool_cache.insert(pool);

        for account in accounts {
            if let Err(error) = self.subscriber.subscribe_account(account).await {
                warn!(%pool_id, %account, %error, "échec d'abonnement du compte");
            }
        }
        Ok(handle)
    }

    pub fn unsubscribe_pool(&self, pool_id: &Pubkey) {
        self.pool_cache.remove(pool_id);
    }

    pub fn pool_cache(&self) -> &Arc<PoolStateCache> {
        &self.pool_cache
    }

    pub fn get_pool(&self, pool_id: &Pubkey) -> Option<Arc<RwLock<Pool>>> {
        self.pool_cache.get(pool_id)
    }

    pub fn is_connected(&self) -> bool {
        self.subscriber.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pump_pool_with_reserves, MockTransport};

    fn token_account_bytes(amount: u64) -> Vec<u8> {
        let mut data = vec![0u8; 165];
        data[64..72].copy_from_slice(&amount.to_le_bytes());
        data
    }

    #[tokio::test(start_paused = true)]
    async fn pool_subscription_watches_all_accounts() {
        let transport = Arc::new(MockTransport::new());
        let (manager, _dirty) =
            SubscriptionManager::start(transport.clone(), Duration::from_secs(5)).await.unwrap();

        let pool = pump_pool_with_reserves(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            1,
            1,
        );
        let pool_id = pool.address();
        let (vault_a, vault_b) = pool.get_vaults().unwrap();
        manager.subscribe_pool(pool).await.unwrap();

        let order = transport.connection(0).subscription_order();
        assert_eq!(order, vec![pool_id, vault_a, vault_b]);
    }

    #[tokio::test(start_paused = true)]
    async fn vault_update_dirties_the_owning_pool() {
        let transport = Arc::new(MockTransport::new());
        let (manager, mut dirty) =
            SubscriptionManager::start(transport.clone(), Duration::from_secs(5)).await.unwrap();

        let pool = pump_pool_with_reserves(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            1_000_000,
            2_000_000,
        );
        let pool_id = pool.address();
        let (vault_a, _) = pool.get_vaults().unwrap();
        manager.subscribe_pool(pool).await.unwrap();

        transport.connection(0).push(vault_a, token_account_bytes(7_777), 12).await;

        let dirtied = dirty.recv().await.unwrap();
        assert_eq!(dirtied, pool_id);

        let handle = manager.get_pool(&pool_id).unwrap();
        let guard = handle.read().await;
        if let Pool::PumpAmm(p) = &*guard {
            assert_eq!(p.reserve_a, 7_777);
        } else {
            panic!("wrong variant");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_coalesce_to_one_pending_event_per_pool() {
        let transport = Arc::new(MockTransport::new());
        let (manager, mut dirty) =
            SubscriptionManager::start(transport.clone(), Duration::from_secs(5)).await.unwrap();

        let pool = pump_pool_with_reserves(
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            1,
            1,
        );
        let pool_id = pool.address();
        let (vault_a, _) = pool.get_vaults().unwrap();
        manager.subscribe_pool(pool).await.unwrap();

        // rafale : cinq notifications avant que le consommateur ne draine
        for slot in 1..=5u64 {
            transport.connection(0).push(vault_a, token_account_bytes(slot), slot).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        // un seul événement en attente
        let first = dirty.recv().await.unwrap();
        assert_eq!(first, pool_id);
        assert!(dirty.try_recv().is_err());

        // après acquittement, une nouvelle notification re-signale
        manager.acknowledge(&pool_id);
        transport.connection(0).push(vault_a, token_account_bytes(99), 10).await;
        let second = dirty.recv().await.unwrap();
        assert_eq!(second, pool_id);
    }

    #[tokio::test(start_paused = true)]
    async fn connection_state_is_reported() {
        let transport = Arc::new(MockTransport::new());
        let (manager, _dirty) =
            SubscriptionManager::start(transport.clone(), Duration::from_secs(5)).await.unwrap();
        assert!(manager.is_connected());

        transport.connection(0).sever();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!manager.is_connected());
    }
}
