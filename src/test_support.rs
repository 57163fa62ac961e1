// src/test_support.rs
//
// Outillage de test : gateway scriptée et transport push piloté, pour
// rejouer chaque scénario sans réseau. Compilé uniquement avec les tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::mpsc;

use crate::rpc::{GatewayAccount, MemcmpFilter, SolanaGateway};
use crate::subscription::transport::{AccountUpdate, PushConnection, PushTransport};

/// Gateway en mémoire : comptes scriptés, filtres memcmp réellement
/// appliqués, compteurs d'appels observables par les tests.
#[derive(Default)]
pub struct MockGateway {
    accounts: Mutex<HashMap<Pubkey, GatewayAccount>>,
    program_accounts: Mutex<HashMap<Pubkey, Vec<(Pubkey, Vec<u8>)>>>,
    pub account_calls: AtomicUsize,
    pub batch_calls: AtomicUsize,
    pub program_account_calls: AtomicUsize,
    /// Quand il est armé, tout appel reste en attente indéfiniment.
    pub hang: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_account(&self, address: Pubkey, owner: Pubkey, data: Vec<u8>) {
        self.accounts
            .lock()
            .unwrap()
            .insert(address, GatewayAccount { owner, data });
    }

    pub fn add_program_account(&self, program: Pubkey, address: Pubkey, data: Vec<u8>) {
        self.program_accounts
            .lock()
            .unwrap()
            .entry(program)
            .or_default()
            .push((address, data.clone()));
        self.set_account(address, program, data);
    }

    pub fn total_read_calls(&self) -> usize {
        self.account_calls.load(Ordering::SeqCst)
            + self.batch_calls.load(Ordering::SeqCst)
            + self.program_account_calls.load(Ordering::SeqCst)
    }

    async fn maybe_hang(&self) {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl SolanaGateway for MockGateway {
    async fn get_account(&self, address: &Pubkey) -> Result<GatewayAccount> {
        self.maybe_hang().await;
        self.account_calls.fetch_add(1, Ordering::SeqCst);
        self.accounts
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .ok_or_else(|| anyhow!("AccountNotFound: {}", address))
    }

    async fn get_account_data(&self, address: &Pubkey) -> Result<Vec<u8>> {
        Ok(self.get_account(address).await?.data)
    }

    async fn get_multiple_account_data(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        self.maybe_hang().await;
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let accounts = self.accounts.lock().unwrap();
        Ok(addresses
            .iter()
            .map(|a| accounts.get(a).map(|acc| acc.data.clone()))
            .collect())
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[MemcmpFilter],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>> {
        self.maybe_hang().await;
        self.program_account_calls.fetch_add(1, Ordering::SeqCst);
        let programs = self.program_accounts.lock().unwrap();
        let Some(accounts) = programs.get(program_id) else {
            return Ok(Vec::new());
        };
        Ok(accounts
            .iter()
            .filter(|(_, data)| filters.iter().all(|f| f.matches(data)))
            .cloned()
            .collect())
    }
}

/// Transport push scripté : chaque connexion journalise ses abonnements
/// dans l'ordre et expose un canal d'injection de notifications.
pub struct MockTransport {
    connections: Mutex<Vec<std::sync::Arc<MockConnection>>>,
    pub connect_attempts: AtomicUsize,
    pub fail_connect: AtomicBool,
}

pub struct MockConnection {
    /// Ordre exact des account_subscribe émis sur cette connexion.
    pub subscribed: Mutex<Vec<Pubkey>>,
    senders: Mutex<Vec<(Pubkey, mpsc::Sender<AccountUpdate>)>>,
    is_closed: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
            connect_attempts: AtomicUsize::new(0),
            fail_connect: AtomicBool::new(false),
        }
    }

    pub fn connection(&self, index: usize) -> std::sync::Arc<MockConnection> {
        self.connections.lock().unwrap()[index].clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    /// Injecte une notification de compte comme le ferait le serveur.
    pub async fn push(&self, account: Pubkey, data: Vec<u8>, slot: u64) {
        let senders = {
            let guard = self.senders.lock().unwrap();
            guard
                .iter()
                .filter(|(a, _)| *a == account)
                .map(|(_, tx)| tx.clone())
                .collect::<Vec<_>>()
        };
        for tx in senders {
            let _ = tx.send(AccountUpdate { account, data: data.clone(), slot }).await;
        }
    }

    /// Coupe la connexion : tous les flux d'abonnement se terminent.
    pub fn sever(&self) {
        self.is_closed.store(true, Ordering::SeqCst);
        self.senders.lock().unwrap().clear();
    }

    pub fn subscription_order(&self) -> Vec<Pubkey> {
        self.subscribed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushTransport for MockTransport {
    async fn connect(&self) -> Result<std::sync::Arc<dyn PushConnection>> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        let connection = std::sync::Arc::new(MockConnection {
            subscribed: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            is_closed: AtomicBool::new(false),
        });
        self.connections.lock().unwrap().push(connection.clone());
        Ok(connection)
    }
}

#[async_trait]
impl PushConnection for MockConnection {
    async fn open(&self, account: Pubkey) -> Result<mpsc::Receiver<AccountUpdate>> {
        self.subscribed.lock().unwrap().push(account);
        let (tx, rx) = mpsc::channel(64);
        if !self.is_closed.load(Ordering::SeqCst) {
            self.senders.lock().unwrap().push((account, tx));
        }
        // connexion fermée : tx tombe immédiatement et le flux se termine
        Ok(rx)
    }
}

/// Pool pump prêt à coter : réserves en place, fraîcheur posée loin dans le
/// futur pour que le routeur reste sur le chemin pur.
pub fn pump_pool_with_reserves(
    address: Pubkey,
    mint_a: Pubkey,
    mint_b: Pubkey,
    reserve_a: u64,
    reserve_b: u64,
) -> crate::decoders::Pool {
    crate::decoders::Pool::PumpAmm(Box::new(crate::decoders::pump::amm::PumpAmmPool {
        address,
        mint_a,
        mint_b,
        vault_a: Pubkey::new_unique(),
        vault_b: Pubkey::new_unique(),
        coin_creator: Pubkey::default(),
        reserve_a,
        reserve_b,
        last_reserve_update: i64::MAX / 2,
        reserves_fresh: true,
    }))
}
