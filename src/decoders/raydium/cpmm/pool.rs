// src/decoders/raydium/cpmm/pool.rs

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytemuck::{from_bytes, Pod, Zeroable};
use solana_sdk::pubkey;
use solana_sdk::pubkey::Pubkey;

use crate::decoders::pool_operations::{PoolOperations, VAULT_CACHE_MAX_AGE_SECS};
use crate::decoders::spl_token::decode_token_amount;
use crate::math::cp_math;
use crate::rpc::SolanaGateway;

pub const RAYDIUM_CPMM_PROGRAM_ID: Pubkey = pubkey!("CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C");
pub const PROTOCOL_NAME: &str = "raydium-cpmm";

/// Discriminator des comptes PoolState du programme CPMM.
const POOL_STATE_DISCRIMINATOR: [u8; 8] = [247, 237, 227, 245, 215, 195, 222, 70];
const AMM_CONFIG_DISCRIMINATOR: [u8; 8] = [218, 244, 33, 104, 203, 203, 43, 111];

/// Offsets memcmp des mints (discriminator compris).
pub const TOKEN_0_MINT_OFFSET: usize = 168;
pub const TOKEN_1_MINT_OFFSET: usize = 200;

#[derive(Debug, Clone)]
pub struct CpmmPool {
    pub address: Pubkey,
    pub amm_config: Pubkey,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub vault_a: Pubkey,
    pub vault_b: Pubkey,
    pub status: u8,
    /// Frais de trading sur 1_000_000, lus dans le compte AmmConfig.
    pub trade_fee_rate: u64,
    pub reserve_a: u64,
    pub reserve_b: u64,
    pub last_reserve_update: i64,
    pub reserves_fresh: bool,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CpmmPoolStateData {
    pub amm_config: Pubkey,
    pub pool_creator: Pubkey,
    pub token_0_vault: Pubkey,
    pub token_1_vault: Pubkey,
    pub lp_mint: Pubkey,
    pub token_0_mint: Pubkey,
    pub token_1_mint: Pubkey,
    pub token_0_program: Pubkey,
    pub token_1_program: Pubkey,
    pub observation_key: Pubkey,
    pub auth_bump: u8,
    pub status: u8,
    pub lp_mint_decimals: u8,
    pub mint_0_decimals: u8,
    pub mint_1_decimals: u8,
    pub lp_supply: u64,
    pub protocol_fees_token_0: u64,
    pub protocol_fees_token_1: u64,
    pub fund_fees_token_0: u64,
    pub fund_fees_token_1: u64,
    pub open_time: u64,
    pub recent_epoch: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct AmmConfigData {
    pub bump: u8,
    pub disable_create_pool: u8,
    pub index: u16,
    pub trade_fee_rate: u64,
    pub protocol_fee_rate: u64,
    pub fund_fee_rate: u64,
    pub create_pool_fee: u64,
    pub protocol_owner: Pubkey,
    pub fund_owner: Pubkey,
}

pub fn decode_pool(address: &Pubkey, data: &[u8]) -> Result<CpmmPool> {
    if data.get(..8) != Some(&POOL_STATE_DISCRIMINATOR) {
        bail!("invalid discriminator, not a Raydium CPMM PoolState account");
    }
    let data_slice = &data[8..];
    let expected = std::mem::size_of::<CpmmPoolStateData>();
    if data_slice.len() < expected {
        bail!(
            "CPMM PoolState data too short: expected at least {} bytes, got {}",
            expected,
            data_slice.len()
        );
    }
    let raw: &CpmmPoolStateData = from_bytes(&data_slice[..expected]);

    Ok(CpmmPool {
        address: *address,
        amm_config: raw.amm_config,
        mint_a: raw.token_0_mint,
        mint_b: raw.token_1_mint,
        vault_a: raw.token_0_vault,
        vault_b: raw.token_1_vault,
        status: raw.status,
        trade_fee_rate: 0,
        reserve_a: 0,
        reserve_b: 0,
        last_reserve_update: 0,
        reserves_fresh: false,
    })
}

/// Décode un compte AmmConfig et en extrait le fee de trading.
pub fn decode_config_fee(data: &[u8]) -> Result<u64> {
    if data.get(..8) != Some(&AMM_CONFIG_DISCRIMINATOR) {
        bail!("invalid discriminator, not a Raydium AmmConfig account");
    }
    let data_slice = &data[8..];
    let expected = std::mem::size_of::<AmmConfigData>();
    if data_slice.len() < expected {
        bail!(
            "AmmConfig data too short: expected at least {} bytes, got {}",
            expected,
            data_slice.len()
        );
    }
    let raw: &AmmConfigData = from_bytes(&data_slice[..expected]);
    Ok(raw.trade_fee_rate)
}

impl CpmmPool {
    async fn refresh(&mut self, now: i64, gateway: &dyn SolanaGateway) -> Result<()> {
        // Le fee de l'AmmConfig ne bouge pas : lu une seule fois.
        let mut wanted = vec![self.vault_a, self.vault_b];
        let need_config = self.trade_fee_rate == 0;
        if need_config {
            wanted.push(self.amm_config);
        }

        let accounts = gateway.get_multiple_account_data(&wanted).await?;
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

        if need_config {
            let config = accounts
                .get(2)
                .and_then(|a| a.as_deref())
                .ok_or_else(|| anyhow!("amm config {} not found", self.amm_config))?;
            self.trade_fee_rate = decode_config_fee(config)?;
        }

        self.last_reserve_update = now;
        self.reserves_fresh = true;
        Ok(())
    }
}

#[async_trait]
impl PoolOperations for CpmmPool {
    fn protocol_name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    fn program_id(&self) -> Pubkey {
        RAYDIUM_CPMM_PROGRAM_ID
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
        self.reserves_fresh
            && self.trade_fee_rate > 0
            && now - self.last_reserve_update <= VAULT_CACHE_MAX_AGE_SECS
    }

    fn get_quote(&self, token_in_mint: &Pubkey, amount_in: u64, _current_timestamp: i64) -> Result<u64> {
        let (reserve_in, reserve_out) = if *token_in_mint == self.mint_a {
            (self.reserve_a, self.reserve_b)
        } else if *token_in_mint == self.mint_b {
            (self.reserve_b, self.reserve_a)
        } else {
            bail!("input token {} does not belong to pool {}", token_in_mint, self.address);
        };
        // Réplique on-chain : frais arrondis au plafond sur 1e6.
        cp_math::get_amount_out_ceil_fee(amount_in, reserve_in, reserve_out, self.trade_fee_rate)
    }

    async fn get_quote_async(
        &mut self,
        token_in_mint: &Pubkey,
        amount_in: u64,
        current_timestamp: i64,
        gateway: &dyn SolanaGateway,
    ) -> Result<u64> {
        if !self.is_fresh(current_timestamp) {
            self.refresh(current_timestamp, gateway).await?;
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
            self.status = fresh.status;
            self.amm_config = fresh.amm_config;
            return Ok(());
        } else {
            bail!("account {} does not belong to pool {}", account, self.address);
        }
        self.last_reserve_update = timestamp;
        self.reserves_fresh = true;
        Ok(())
    }
}
