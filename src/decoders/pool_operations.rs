// src/decoders/pool_operations.rs

use anyhow::Result;
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;

use crate::rpc::SolanaGateway;

/// Âge maximal (secondes) des soldes de vault mis en cache avant qu'une
/// cotation ne force une relecture via la gateway.
pub const VAULT_CACHE_MAX_AGE_SECS: i64 = 5;

/// Le contrat commun à tous les pools, quel que soit le protocole.
///
/// `get_quote` est pur : il ne lit que l'état en mémoire. `get_quote_async`
/// reçoit un handle de gateway au moment de l'appel (jamais stocké dans le
/// pool) et rafraîchit les comptes annexes si l'état est périmé.
#[async_trait]
pub trait PoolOperations: Send + Sync {
    fn protocol_name(&self) -> &'static str;

    fn program_id(&self) -> Pubkey;

    fn address(&self) -> Pubkey;

    fn get_mints(&self) -> (Pubkey, Pubkey);

    /// None pour les kinds qui gardent leurs réserves dans le compte du pool.
    fn get_vaults(&self) -> Option<(Pubkey, Pubkey)>;

    /// Comptes à suivre côté push : le pool lui-même, plus ses vaults.
    fn accounts_to_watch(&self) -> Vec<Pubkey> {
        let mut accounts = vec![self.address()];
        if let Some((base, quote)) = self.get_vaults() {
            accounts.push(base);
            accounts.push(quote);
        }
        accounts
    }

    /// Réserve du côté opposé à `token_in`, quand le kind en expose une à
    /// coût nul. Sert de proxy de liquidité au routeur ; None = pas de proxy.
    fn opposite_reserve(&self, token_in: &Pubkey) -> Option<u64>;

    /// Vrai si l'état en mémoire est assez frais pour coter sans relecture.
    fn is_fresh(&self, _now: i64) -> bool {
        true
    }

    /// Cotation pure sur l'état courant.
    fn get_quote(&self, token_in_mint: &Pubkey, amount_in: u64, current_timestamp: i64)
        -> Result<u64>;

    /// Cotation avec rafraîchissement préalable si nécessaire.
    async fn get_quote_async(
        &mut self,
        token_in_mint: &Pubkey,
        amount_in: u64,
        current_timestamp: i64,
        gateway: &dyn SolanaGateway,
    ) -> Result<u64>;

    /// Applique une notification de compte (pool ou vault) décodée par le
    /// codec du protocole. L'état est remplacé en place, jamais déchiré.
    fn apply_account_update(&mut self, account: &Pubkey, data: &[u8], timestamp: i64)
        -> Result<()>;
}
