// src/cache/mod.rs

pub mod types;

pub use types::{slippage_threshold, CachedQuote, HealthResponse, RoutePlan};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::decoders::{Pool, PoolOperations};
use crate::discovery;
use crate::monitoring::metrics;
use crate::router::{self, QuoteFilters};
use crate::rpc::SolanaGateway;
use crate::subscription::SubscriptionManager;

#[derive(Debug, Clone)]
pub struct QuoteCacheConfig {
    pub slippage_bps: u16,
    pub refresh_interval: Duration,
}

impl Default for QuoteCacheConfig {
    fn default() -> Self {
        Self { slippage_bps: 50, refresh_interval: Duration::from_secs(30) }
    }
}

/// Clé typée d'un quote suivi ; la clé de map est sa forme texte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuoteKey {
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub amount: u64,
}

impl QuoteKey {
    pub fn cache_key(&self) -> String {
        format!("{}-{}-{}", self.input_mint, self.output_mint, self.amount)
    }
}

/// Paire non ordonnée, normalisée par ordre d'octets.
fn pair_of(a: &Pubkey, b: &Pubkey) -> (Pubkey, Pubkey) {
    if a.to_bytes() <= b.to_bytes() { (*a, *b) } else { (*b, *a) }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CachedQuote>,
    /// Index inverse : pool gagnant -> clés dépendantes. Partage le verrou
    /// de la map, comme convenu.
    pool_to_keys: HashMap<Pubkey, Vec<QuoteKey>>,
}

/// Mémoïsation des quotes avec recalcul au plus un en vol par clé,
/// invalidation par push et rafraîchissement pull de repli.
pub struct QuoteCache {
    state: std::sync::RwLock<CacheState>,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    pairs: std::sync::RwLock<HashMap<(Pubkey, Pubkey), Vec<Arc<RwLock<Pool>>>>>,
    gateway: Arc<dyn SolanaGateway>,
    subscriptions: Option<Arc<SubscriptionManager>>,
    config: QuoteCacheConfig,
    /// Nombre d'invocations du routeur, pour l'observabilité (et les tests
    /// de coalescence).
    pub router_invocations: AtomicU64,
}

impl QuoteCache {
    pub fn new(
        gateway: Arc<dyn SolanaGateway>,
        subscriptions: Option<Arc<SubscriptionManager>>,
        config: QuoteCacheConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: std::sync::RwLock::new(CacheState::default()),
            inflight: Mutex::new(HashMap::new()),
            pairs: std::sync::RwLock::new(HashMap::new()),
            gateway,
            subscriptions,
            config,
            router_invocations: AtomicU64::new(0),
        })
    }

    pub fn slippage_bps(&self) -> u16 {
        self.config.slippage_bps
    }

    pub fn get(&self, key: &QuoteKey) -> Option<CachedQuote> {
        self.state.read().unwrap().entries.get(&key.cache_key()).cloned()
    }

    pub fn all_cached(&self) -> HashMap<String, CachedQuote> {
        self.state.read().unwrap().entries.clone()
    }

    pub fn cached_count(&self) -> usize {
        self.state.read().unwrap().entries.len()
    }

    pub fn last_update(&self) -> Option<chrono::DateTime<Utc>> {
        self.state.read().unwrap().entries.values().map(|q| q.last_update).max()
    }

    pub fn push_connected(&self) -> bool {
        self.subscriptions.as_ref().map(|s| s.is_connected()).unwrap_or(false)
    }

    /// Lecture avec calcul à la demande. Les ratés concurrents sur la même
    /// clé partagent un seul calcul ; les clés distinctes avancent
    /// indépendamment.
    pub async fn get_or_compute(
        self: &Arc<Self>,
        key: QuoteKey,
        filters: &QuoteFilters,
    ) -> Result<CachedQuote> {
        let passthrough = is_passthrough(filters);
        if passthrough {
            if let Some(hit) = self.get(&key) {
                return Ok(hit);
            }
        }

        // Un seul calcul en vol par clé : les suiveurs attendent le verrou
        // puis relisent le cache.
        let gate = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.cache_key())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;

        if passthrough {
            if let Some(hit) = self.get(&key) {
                return Ok(hit);
            }
        }

        let outcome = self.compute_and_store(key, filters).await;

        {
            let mut inflight = self.inflight.lock().await;
            inflight.remove(&key.cache_key());
        }
        outcome
    }

    async fn pools_for_pair(self: &Arc<Self>, key: &QuoteKey) -> Result<Vec<Arc<RwLock<Pool>>>> {
        let pair = pair_of(&key.input_mint, &key.output_mint);
        if let Some(known) = self.pairs.read().unwrap().get(&pair) {
            return Ok(known.clone());
        }

        info!(input = %key.input_mint, output = %key.output_mint, "découverte des pools de la paire");
        let found =
            discovery::fetch_pools_by_pair(self.gateway.as_ref(), &key.input_mint, &key.output_mint)
                .await?;
        if found.is_empty() {
            bail!("no pools found for this pair");
        }

        let mut handles = Vec::with_capacity(found.len());
        for pool in found {
            let handle = match &self.subscriptions {
                Some(manager) => manager.subscribe_pool(pool).await?,
                None => Arc::new(RwLock::new(pool)),
            };
            handles.push(handle);
        }
        info!(count = handles.len(), "pools suivis pour la paire");

        let mut pairs = self.pairs.write().unwrap();
        // un raté concurrent sur une autre clé de la même paire a pu gagner
        let roster = pairs.entry(pair).or_insert_with(|| handles.clone());
        Ok(roster.clone())
    }

    async fn compute_and_store(self: &Arc<Self>, key: QuoteKey, filters: &QuoteFilters) -> Result<CachedQuote> {
        let started = std::time::Instant::now();
        let pools = self.pools_for_pair(&key).await?;

        self.router_invocations.fetch_add(1, Ordering::SeqCst);
        let best = router::get_best_pool(
            &pools,
            &key.input_mint,
            key.amount,
            filters,
            Utc::now().timestamp(),
            self.gateway.clone(),
        )
        .await?;

        let quote = self.build_quote(&key, best.protocol, best.pool_id, best.program_id, best.out_amount, started.elapsed());
        self.store(&key, best.pool_id, quote.clone());
        metrics::CACHED_ROUTES.set(self.cached_count() as i64);
        Ok(quote)
    }

    fn build_quote(
        &self,
        key: &QuoteKey,
        protocol: &str,
        pool_id: Pubkey,
        program_id: Pubkey,
        out_amount: u64,
        elapsed: Duration,
    ) -> CachedQuote {
        CachedQuote {
            input_mint: key.input_mint.to_string(),
            output_mint: key.output_mint.to_string(),
            in_amount: key.amount.to_string(),
            out_amount: out_amount.to_string(),
            route_plan: vec![RoutePlan {
                protocol: protocol.to_string(),
                pool_id: pool_id.to_string(),
                pool_address: pool_id.to_string(),
                input_mint: key.input_mint.to_string(),
                output_mint: key.output_mint.to_string(),
                in_amount: key.amount.to_string(),
                out_amount: out_amount.to_string(),
                program_id: program_id.to_string(),
            }],
            slippage_bps: self.config.slippage_bps,
            other_amount_threshold: slippage_threshold(out_amount, self.config.slippage_bps)
                .to_string(),
            last_update: Utc::now(),
            time_taken: format!("{:?}", elapsed),
        }
    }

    fn store(&self, key: &QuoteKey, winning_pool: Pubkey, quote: CachedQuote) {
        let mut state = self.state.write().unwrap();
        state.entries.insert(key.cache_key(), quote);
        let dependents = state.pool_to_keys.entry(winning_pool).or_default();
        if !dependents.contains(key) {
            dependents.push(*key);
        }
    }

    /// Recalcule toutes les clés dont le pool gagnant vient d'être rafraîchi
    /// par push. Aucune lecture gateway : l'état en mémoire fait foi.
    pub async fn recompute_pool_dependents(&self, pool_id: &Pubkey) {
        let keys: Vec<QuoteKey> = {
            let state = self.state.read().unwrap();
            match state.pool_to_keys.get(pool_id) {
                Some(keys) => keys.clone(),
                None => return,
            }
        };
        let Some(manager) = &self.subscriptions else { return };
        let Some(pool) = manager.get_pool(pool_id) else { return };

        for key in keys {
            let started = std::time::Instant::now();
            let now = Utc::now().timestamp();
            let (outcome, protocol, program_id) = {
                let guard = pool.read().await;
                (
                    guard.get_quote(&key.input_mint, key.amount, now),
                    guard.protocol_name(),
                    guard.program_id(),
                )
            };
            match outcome {
                Ok(out_amount) => {
                    let quote = self.build_quote(
                        &key,
                        protocol,
                        *pool_id,
                        program_id,
                        out_amount,
                        started.elapsed(),
                    );
                    self.store(&key, *pool_id, quote);
                    debug!(%pool_id, key = %key.cache_key(), out_amount, "quote recalculé sur push");
                }
                Err(error) => {
                    warn!(%pool_id, key = %key.cache_key(), %error, "recalcul en échec, entrée conservée");
                }
            }
        }
    }

    /// Consommateur du canal de pools invalidés (déjà coalescé par le
    /// gestionnaire d'abonnements) : le recalcul se fait ici, hors du chemin
    /// critique du lecteur push.
    pub fn spawn_update_worker(self: &Arc<Self>, mut dirty_rx: mpsc::UnboundedReceiver<Pubkey>) {
        let cache = self.clone();
        tokio::spawn(async move {
            while let Some(pool_id) = dirty_rx.recv().await {
                if let Some(manager) = &cache.subscriptions {
                    manager.acknowledge(&pool_id);
                }
                cache.recompute_pool_dependents(&pool_id).await;
            }
        });
    }

    /// Intervalle effectif du pull : rallongé d'un facteur 10 tant que le
    /// push est en bonne santé.
    pub fn effective_refresh_interval(&self) -> Duration {
        if self.push_connected() {
            self.config.refresh_interval * 10
        } else {
            self.config.refresh_interval
        }
    }

    /// Repli pull : recalcul complet de toutes les clés suivies via le
    /// routeur (les états périmés se rechargent par la gateway au passage).
    pub async fn refresh_all(self: &Arc<Self>) {
        let keys: Vec<QuoteKey> = {
            let state = self.state.read().unwrap();
            let unique: std::collections::HashSet<QuoteKey> =
                state.pool_to_keys.values().flatten().copied().collect();
            unique.into_iter().collect()
        };
        for key in keys {
            if let Err(error) = self.get_or_refresh(key).await {
                warn!(key = %key.cache_key(), %error, "échec du rafraîchissement pull");
            }
        }
    }

    async fn get_or_refresh(self: &Arc<Self>, key: QuoteKey) -> Result<CachedQuote> {
        self.compute_and_store(key, &QuoteFilters::default()).await
    }

    pub fn start_periodic_refresh(self: &Arc<Self>) {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                let interval = cache.effective_refresh_interval();
                tokio::time::sleep(interval).await;
                debug!(?interval, "rafraîchissement pull");
                cache.refresh_all().await;
            }
        });
    }
}

fn is_passthrough(filters: &QuoteFilters) -> bool {
    filters.include_dexes.is_empty()
        && filters.exclude_dexes.is_empty()
        && filters.min_liquidity == 0.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockGateway, MockTransport};
    use std::sync::atomic::Ordering as AtomicOrdering;

    fn pump_pool_bytes(mint_a: &Pubkey, mint_b: &Pubkey, vault_a: &Pubkey, vault_b: &Pubkey) -> Vec<u8> {
        let mut data = vec![0u8; 211];
        data[..8].copy_from_slice(&[241, 154, 109, 4, 17, 177, 109, 188]);
        data[43..75].copy_from_slice(mint_a.as_ref());
        data[75..107].copy_from_slice(mint_b.as_ref());
        data[139..171].copy_from_slice(vault_a.as_ref());
        data[171..203].copy_from_slice(vault_b.as_ref());
        data
    }

    fn token_account_bytes(amount: u64) -> Vec<u8> {
        let mut data = vec![0u8; 165];
        data[64..72].copy_from_slice(&amount.to_le_bytes());
        data
    }

    struct Scenario {
        gateway: Arc<MockGateway>,
        key: QuoteKey,
        vault_b: Pubkey,
    }

    /// Un pool pump découvrable avec des vaults garnis : le premier calcul
    /// passe par découverte + lecture de vaults.
    fn seeded_scenario() -> Scenario {
        let gateway = Arc::new(MockGateway::new());
        let mint_a = Pubkey::new_unique();
        let mint_b = Pubkey::new_unique();
        let vault_a = Pubkey::new_unique();
        let vault_b = Pubkey::new_unique();

        let program = crate::decoders::pump::amm::PUMP_AMM_PROGRAM_ID;
        gateway.add_program_account(
            program,
            Pubkey::new_unique(),
            pump_pool_bytes(&mint_a, &mint_b, &vault_a, &vault_b),
        );
        gateway.set_account(vault_a, spl_token::id(), token_account_bytes(1_000_000));
        gateway.set_account(vault_b, spl_token::id(), token_account_bytes(2_000_000));

        Scenario {
            gateway,
            key: QuoteKey { input_mint: mint_a, output_mint: mint_b, amount: 10_000 },
            vault_b,
        }
    }

    #[tokio::test]
    async fn miss_discovers_routes_and_caches() {
        let scenario = seeded_scenario();
        let cache = QuoteCache::new(scenario.gateway.clone(), None, QuoteCacheConfig::default());

        let quote = cache.get_or_compute(scenario.key, &QuoteFilters::default()).await.unwrap();
        assert_eq!(quote.out_amount, "19752");
        assert_eq!(quote.route_plan.len(), 1);
        assert_eq!(quote.route_plan[0].protocol, "pump-amm");
        assert_eq!(
            quote.other_amount_threshold,
            slippage_threshold(19_752, 50).to_string()
        );

        // le hit suivant ne refait aucun travail
        let calls_before = scenario.gateway.total_read_calls();
        let again = cache.get_or_compute(scenario.key, &QuoteFilters::default()).await.unwrap();
        assert_eq!(again.out_amount, quote.out_amount);
        assert_eq!(scenario.gateway.total_read_calls(), calls_before);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_computation() {
        let scenario = seeded_scenario();
        let cache = QuoteCache::new(scenario.gateway.clone(), None, QuoteCacheConfig::default());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let key = scenario.key;
            tasks.push(tokio::spawn(async move {
                cache.get_or_compute(key, &QuoteFilters::default()).await.unwrap()
            }));
        }
        let mut outs = Vec::new();
        for task in tasks {
            outs.push(task.await.unwrap().out_amount);
        }
        assert!(outs.iter().all(|o| o == "19752"));

        // un seul passage routeur, une seule découverte
        assert_eq!(cache.router_invocations.load(AtomicOrdering::SeqCst), 1);
        let gpa = scenario.gateway.program_account_calls.load(AtomicOrdering::SeqCst);
        assert_eq!(gpa, crate::decoders::registry::all().len() * 2);
    }

    #[tokio::test]
    async fn distinct_keys_compute_independently() {
        let scenario = seeded_scenario();
        let cache = QuoteCache::new(scenario.gateway.clone(), None, QuoteCacheConfig::default());

        let other = QuoteKey { amount: 20_000, ..scenario.key };
        let first = cache.get_or_compute(scenario.key, &QuoteFilters::default()).await.unwrap();
        let second = cache.get_or_compute(other, &QuoteFilters::default()).await.unwrap();
        assert_ne!(first.out_amount, second.out_amount);
        assert_eq!(cache.router_invocations.load(AtomicOrdering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_discovery_is_no_route() {
        let gateway = Arc::new(MockGateway::new());
        let cache = QuoteCache::new(gateway, None, QuoteCacheConfig::default());
        let key = QuoteKey {
            input_mint: Pubkey::new_unique(),
            output_mint: Pubkey::new_unique(),
            amount: 1,
        };
        let err = cache.get_or_compute(key, &QuoteFilters::default()).await.unwrap_err();
        assert!(err.to_string().contains("no pools found for this pair"));
        assert_eq!(cache.cached_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_computation_writes_nothing() {
        let scenario = seeded_scenario();
        scenario.gateway.hang.store(true, AtomicOrdering::SeqCst);
        let cache = QuoteCache::new(scenario.gateway.clone(), None, QuoteCacheConfig::default());

        let outcome = tokio::time::timeout(
            Duration::from_millis(200),
            cache.get_or_compute(scenario.key, &QuoteFilters::default()),
        )
        .await;
        assert!(outcome.is_err());
        assert_eq!(cache.cached_count(), 0);
    }

    #[tokio::test]
    async fn push_invalidation_recomputes_without_gateway_reads() {
        let scenario = seeded_scenario();
        let transport = Arc::new(MockTransport::new());
        let (manager, dirty_rx) =
            SubscriptionManager::start(transport.clone(), Duration::from_secs(5)).await.unwrap();
        let cache = QuoteCache::new(
            scenario.gateway.clone(),
            Some(manager.clone()),
            QuoteCacheConfig::default(),
        );
        cache.spawn_update_worker(dirty_rx);

        let before = cache.get_or_compute(scenario.key, &QuoteFilters::default()).await.unwrap();
        assert_eq!(before.out_amount, "19752");

        let reads_before = scenario.gateway.total_read_calls();

        // le vault de sortie double : un quote frais doit grossir
        transport
            .connection(0)
            .push(scenario.vault_b, token_account_bytes(4_000_000), 99)
            .await;

        // le recalcul doit atterrir en moins de 200 ms
        let deadline = std::time::Instant::now() + Duration::from_millis(200);
        let updated = loop {
            let current = cache.get(&scenario.key).unwrap();
            if current.out_amount != before.out_amount {
                break current;
            }
            if std::time::Instant::now() > deadline {
                panic!("push invalidation did not land in time");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };

        let expected: u64 = updated.out_amount.parse().unwrap();
        assert!(expected > 19_752);
        // aucun getAccount / getProgramAccounts supplémentaire
        assert_eq!(scenario.gateway.total_read_calls(), reads_before);
    }

    #[tokio::test]
    async fn pull_interval_stretches_when_push_is_healthy() {
        let scenario = seeded_scenario();
        let transport = Arc::new(MockTransport::new());
        let (manager, _dirty) =
            SubscriptionManager::start(transport.clone(), Duration::from_secs(5)).await.unwrap();
        let cache = QuoteCache::new(
            scenario.gateway.clone(),
            Some(manager),
            QuoteCacheConfig { slippage_bps: 50, refresh_interval: Duration::from_secs(30) },
        );
        assert_eq!(cache.effective_refresh_interval(), Duration::from_secs(300));

        transport.connection(0).sever();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.effective_refresh_interval(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn recompute_is_idempotent_without_state_change() {
        let scenario = seeded_scenario();
        let transport = Arc::new(MockTransport::new());
        let (manager, _dirty) =
            SubscriptionManager::start(transport.clone(), Duration::from_secs(5)).await.unwrap();
        let cache = QuoteCache::new(
            scenario.gateway.clone(),
            Some(manager.clone()),
            QuoteCacheConfig::default(),
        );

        let before = cache.get_or_compute(scenario.key, &QuoteFilters::default()).await.unwrap();
        let pool_id: Pubkey = before.route_plan[0].pool_id.parse().unwrap();

        cache.recompute_pool_dependents(&pool_id).await;
        let after = cache.get(&scenario.key).unwrap();
        assert_eq!(after.out_amount, before.out_amount);
        assert_eq!(after.other_amount_threshold, before.other_amount_threshold);
    }
}
