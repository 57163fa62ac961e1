// src/decoders/mod.rs

pub mod meteora;
pub mod orca;
pub mod pool_operations;
pub mod pump;
pub mod raydium;
pub mod registry;
pub mod spl_token;

pub use pool_operations::PoolOperations;

use anyhow::Result;
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;

use crate::rpc::SolanaGateway;

/// L'union fermée de tous les pools supportés. Le dispatch se fait par le
/// kind, sans héritage : une variante par protocole, l'état dédié dedans.
#[derive(Debug, Clone)]
pub enum Pool {
    RaydiumAmmV4(Box<raydium::amm_v4::AmmV4Pool>),
    RaydiumCpmm(Box<raydium::cpmm::CpmmPool>),
    RaydiumStable(Box<raydium::stable::StablePool>),
    RaydiumClmm(Box<raydium::clmm::ClmmPool>),
    OrcaWhirlpool(Box<orca::whirlpool::WhirlpoolPool>),
    MeteoraDlmm(Box<meteora::dlmm::DlmmPool>),
    PumpAmm(Box<pump::amm::PumpAmmPool>),
}

impl Pool {
    fn ops(&self) -> &dyn PoolOperations {
        match self {
            Pool::RaydiumAmmV4(p) => p.as_ref(),
            Pool::RaydiumCpmm(p) => p.as_ref(),
            Pool::RaydiumStable(p) => p.as_ref(),
            Pool::RaydiumClmm(p) => p.as_ref(),
            Pool::OrcaWhirlpool(p) => p.as_ref(),
            Pool::MeteoraDlmm(p) => p.as_ref(),
            Pool::PumpAmm(p) => p.as_ref(),
        }
    }

    fn ops_mut(&mut self) -> &mut dyn PoolOperations {
        match self {
            Pool::RaydiumAmmV4(p) => p.as_mut(),
            Pool::RaydiumCpmm(p) => p.as_mut(),
            Pool::RaydiumStable(p) => p.as_mut(),
            Pool::RaydiumClmm(p) => p.as_mut(),
            Pool::OrcaWhirlpool(p) => p.as_mut(),
            Pool::MeteoraDlmm(p) => p.as_mut(),
            Pool::PumpAmm(p) => p.as_mut(),
        }
    }
}

#[async_trait]
impl PoolOperations for Pool {
    fn protocol_name(&self) -> &'static str {
        self.ops().protocol_name()
    }

    fn program_id(&self) -> Pubkey {
        self.ops().program_id()
    }

    fn address(&self) -> Pubkey {
        self.ops().address()
    }

    fn get_mints(&self) -> (Pubkey, Pubkey) {
        self.ops().get_mints()
    }

    fn get_vaults(&self) -> Option<(Pubkey, Pubkey)> {
        self.ops().get_vaults()
    }

    fn accounts_to_watch(&self) -> Vec<Pubkey> {
        self.ops().accounts_to_watch()
    }

    fn opposite_reserve(&self, token_in: &Pubkey) -> Option<u64> {
        self.ops().opposite_reserve(token_in)
    }

    fn is_fresh(&self, now: i64) -> bool {
        self.ops().is_fresh(now)
    }

    fn get_quote(&self, token_in_mint: &Pubkey, amount_in: u64, current_timestamp: i64) -> Result<u64> {
        self.ops().get_quote(token_in_mint, amount_in, current_timestamp)
    }

    async fn get_quote_async(
        &mut self,
        token_in_mint: &Pubkey,
        amount_in: u64,
        current_timestamp: i64,
        gateway: &dyn SolanaGateway,
    ) -> Result<u64> {
        self.ops_mut()
            .get_quote_async(token_in_mint, amount_in, current_timestamp, gateway)
            .await
    }

    fn apply_account_update(&mut self, account: &Pubkey, data: &[u8], timestamp: i64) -> Result<()> {
        self.ops_mut().apply_account_update(account, data, timestamp)
    }
}
