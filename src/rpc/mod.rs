// src/rpc/mod.rs

pub mod pool;
pub mod rate_limit;
pub mod resilient_client;

pub use pool::RpcPool;
pub use rate_limit::RateLimiter;
pub use resilient_client::ResilientRpcClient;

use anyhow::Result;
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;

/// Prédicat memcmp côté serveur : les octets à `offset` doivent être égaux à
/// `bytes`. C'est la forme neutre, convertie vers le type du client RPC au
/// moment de l'appel.
#[derive(Debug, Clone)]
pub struct MemcmpFilter {
    pub offset: usize,
    pub bytes: Vec<u8>,
}

impl MemcmpFilter {
    pub fn new(offset: usize, bytes: Vec<u8>) -> Self {
        Self { offset, bytes }
    }

    /// Vrai si `data` satisfait le prédicat.
    pub fn matches(&self, data: &[u8]) -> bool {
        data.get(self.offset..self.offset + self.bytes.len()) == Some(self.bytes.as_slice())
    }
}

/// Compte tel que retourné par la gateway : le programme propriétaire sert à
/// router les octets vers le bon décodeur.
#[derive(Debug, Clone)]
pub struct GatewayAccount {
    pub owner: Pubkey,
    pub data: Vec<u8>,
}

/// Façade d'accès à la chaîne. Les pools n'en gardent jamais de référence :
/// un handle est passé à chaque appel qui en a besoin, ce qui coupe le cycle
/// pool <-> gateway et rend chaque scénario testable hors réseau.
#[async_trait]
pub trait SolanaGateway: Send + Sync {
    async fn get_account(&self, address: &Pubkey) -> Result<GatewayAccount>;

    async fn get_account_data(&self, address: &Pubkey) -> Result<Vec<u8>>;

    /// Alignement positionnel avec l'entrée ; `None` pour un compte absent.
    async fn get_multiple_account_data(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>>;

    /// Ne retourne que les comptes du programme satisfaisant tous les filtres.
    async fn get_program_accounts(
        &self,
        program_id: &Pubkey,
        filters: &[MemcmpFilter],
    ) -> Result<Vec<(Pubkey, Vec<u8>)>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memcmp_matches_at_offset() {
        let f = MemcmpFilter::new(4, vec![0xAA, 0xBB]);
        assert!(f.matches(&[0, 0, 0, 0, 0xAA, 0xBB, 1]));
        assert!(!f.matches(&[0, 0, 0, 0, 0xAA, 0xBC, 1]));
        // données trop courtes
        assert!(!f.matches(&[0, 0, 0, 0, 0xAA]));
    }
}
