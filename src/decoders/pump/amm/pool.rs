// src/decoders/pump/amm/pool.rs

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytemuck::{from_bytes, Pod, Zeroable};
use solana_sdk::pubkey;
use solana_sdk::pubkey::Pubkey;

use crate::decoders::pool_operations::{PoolOperations, VAULT_CACHE_MAX_AGE_SECS};
use crate::decoders::spl_token::decode_token_amount;
use crate::math::cp_math;
use crate::rpc::SolanaGateway;

pub const PUMP_AMM_PROGRAM_ID: Pubkey = pubkey!("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA");
pub const PROTOCOL_NAME: &str = "pump-amm";

const POOL_DISCRIMINATOR: [u8; 8] = [241, 154, 109, 4, 17, 177, 109, 188];

/// Frais plat du venue : 25 bps.
pub const FEE_NUMERATOR: u64 = 25;
pub const FEE_DENOMINATOR: u64 = 10_000;

/// Offsets memcmp des mints (discriminator + bump + index + creator).
pub const BASE_MINT_OFFSET: usize = 43;
pub const QUOTE_MINT_OFFSET: usize = 75;

#[derive(Debug, Clone)]
pub struct PumpAmmPool {
    pub address: Pubkey,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub vault_a: Pubkey,
    pub vault_b: Pubkey,
    pub coin_creator: Pubkey,
    pub reserve_a: u64,
    pub reserve_b: u64,
    pub last_reserve_update: i64,
    pub reserves_fresh: bool,
}

// Le layout s'arrête à lp_supply ; coin_creator est une extension optionnelle
// en queue de compte.
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PumpPoolData {
    pub pool_bump: u8,
    pub index: u16,
    pub creator: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub pool_base_token_account: Pubkey,
    pub pool_quote_token_account: Pubkey,
    pub lp_supply: u64,
}

pub fn decode_pool(address: &Pubkey, data: &[u8]) -> Result<PumpAmmPool> {
    if data.get(..8) != Some(&POOL_DISCRIMINATOR) {
        bail!("invalid discriminator, not a Pump AMM pool account");
    }
    let data_slice = &data[8..];
    let expected = std::mem::size_of::<PumpPoolData>();
    if data_slice.len() < expected {
        bail!(
            "Pump pool data too short: expected at least {} bytes, got {}",
            expected,
            data_slice.len()
        );
    }
    let raw: &PumpPoolData = from_bytes(&data_slice[..expected]);

    let coin_creator = match data_slice.get(expected..expected + 32) {
        Some(tail) => Pubkey::new_from_array(tail.try_into()?),
        None => Pubkey::default(),
    };

    Ok(PumpAmmPool {
        address: *address,
        mint_a: raw.base_mint,
        mint_b: raw.quote_mint,
        vault_a: raw.pool_base_token_account,
        vault_b: raw.pool_quote_token_account,
        coin_creator,
        reserve_a: 0,
        reserve_b: 0,
        last_reserve_update: 0,
        reserves_fresh: false,
    })
}

impl PumpAmmPool {
    async fn refresh_reserves(&mut self, now: i64, gateway: &dyn SolanaGateway) -> Result<()> {
        let accounts = gateway
            .get_multiple_account_data(&[self.vault_a, self.vault_b])
            .await?;
        let base = accounts
            .first()
            .and_then(|a| a.as_deref())
            .ok_or_else(|| anyhow!("vault {} not found", self.vault_a))?;
        let quote = accounts
            .get(1)
            .and_then(|a| a.as_deref())
            .ok_or_else(|| anyhow!("vault {} not found", self.vault_b))?;
        self.reserve_a = decode_token_amount(base)?;
        self.reserve_b = decode_token_amount(quote)?;
        self.last_reserve_update = now;
        self.reserves_fresh = true;
        Ok(())
    }
}

#[async_trait]
impl PoolOperations for PumpAmmPool {
    fn protocol_name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    fn program_id(&self) -> Pubkey {
        PUMP_AMM_PROGRAM_ID
    }

    fn address(&self) -> Pubkey {
        self.address
    }

    fn get_mints(&self) -> (Pubkey, Pubkey) {
        (self.mint_a, self.mint_b)
    }

    fn get_vaults(&self) -> Option<(Pubkey, Pubkey)> {
        Some((self.vault_a, self.vault_b))
    }

    fn opposite_reserve(&self, token_in: &Pubkey) -> Option<u64> {
        if *token_in == self.mint_a {
            Some(self.reserve_b)
        } else {
            Some(self.reserve_a)
        }
    }

    fn is_fresh(&self, now: i64) -> bool {
        self.reserves_fresh && now - self.last_reserve_update <= VAULT_CACHE_MAX_AGE_SECS
    }

    fn get_quote(&self, token_in_mint: &Pubkey, amount_in: u64, _current_timestamp: i64) -> Result<u64> {
        let (reserve_in, reserve_out) = if *token_in_mint == self.mint_a {
            (self.reserve_a, self.reserve_b)
        } else if *token_in_mint == self.mint_b {
            (self.reserve_b, self.reserve_a)
        } else {
            bail!("input token {} does not belong to pool {}", token_in_mint, self.address);
        };
        cp_math::get_amount_out(amount_in, reserve_in, reserve_out, FEE_NUMERATOR, FEE_DENOMINATOR)
    }

    async fn get_quote_async(
        &mut self,
        token_in_mint: &Pubkey,
        amount_in: u64,
        current_timestamp: i64,
        gateway: &dyn SolanaGateway,
    ) -> Result<u64> {
        if !self.is_fresh(current_timestamp) {
            self.refresh_reserves(current_timestamp, gateway).await?;
        }
        self.get_quote(token_in_mint, amount_in, current_timestamp)
    }

    fn apply_account_update(&mut self, account: &Pubkey, data: &[u8], timestamp: i64) -> Result<()> {
        if *account == self.vault_a {
            self.reserve_a = decode_token_amount(data)?;
        } else if *account == self.vault_b {
            self.reserve_b = decode_token_amount(data)?;
        } else if *account == self.address {
            let fresh = decode_pool(&self.address, data)?;
            self.vault_a = fresh.vault_a;
            self.vault_b = fresh.vault_b;
            self.coin_creator = fresh.coin_creator;
            return Ok(());
        } else {
            bail!("account {} does not belong to pool {}", account, self.address);
        }
        self.last_reserve_update = timestamp;
        self.reserves_fresh = true;
        Ok(())
    }
}
