// src/rpc/pool.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use solana_sdk::pubkey::Pubkey;

use crate::rpc::{GatewayAccount, MemcmpFilter, ResilientRpcClient, SolanaGateway};

/// Répartit les appels sur plusieurs endpoints en round-robin (compteur
/// atomique modulo taille). La sélection est par appel : un batch logique
/// n'est jamais éclaté entre deux endpoints.
pub struct RpcPool {
    clients: Vec<Arc<ResilientRpcClient>>,
    cursor: AtomicUsize,
}

impl RpcPool {
    pub fn new(endpoints: &[String], rate_limit_per_second: u32, max_retries: u8) -> Result<Self> {
        if endpoints.is_empty() {
            // Erreur fatale d'initialisation : aucun endpoint configuré.
            bail!("no RPC endpoints configured");
        }
        let clients = endpoints
            .iter()
            .map(|url| {
                Arc::new(ResilientRpcClient::new(
                    url.clone(),
                    rate_limit_per_second,
                    max_retries,
                ))
            })
            .collect();
        Ok(Self {
            clients,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn size(&self) -> usize {
        self.clients.len()
    }

    pub fn next_client(&self) -> Arc<ResilientRpcClient> {
        if self.clients.len() == 1 {
            return self.clients[0].clone();
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        self.clients[idx].clone()
    }
}

#[async_trait::async_trait]
impl SolanaGateway for RpcPool {
    async fn get_account(&self, address: &Pubkey) -> Result<GatewayAccount> {
        self.next_client().get_account(address).await
    }

    async fn get_account_data(&self, address: &Pubkey) -> Result<Vec<u8>> {
        self.next_client().get_account_data(address).await
    }

    async fn get_multiple_account_data(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        self.next_client().get_multiple_account_data(addresses).await
    }

    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[MemcmpFilter],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>> {
        self.next_client().get_program_accounts(program_id, filters).await
    }
}
