// src/decoders/orca/whirlpool/pool.rs

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytemuck::{from_bytes, Pod, Zeroable};
use solana_sdk::pubkey;
use solana_sdk::pubkey::Pubkey;

use crate::decoders::pool_operations::{PoolOperations, VAULT_CACHE_MAX_AGE_SECS};
use crate::math::clmm_math;
use crate::rpc::SolanaGateway;

pub const WHIRLPOOL_PROGRAM_ID: Pubkey = pubkey!("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc");
pub const PROTOCOL_NAME: &str = "orca-whirlpool";

const WHIRLPOOL_DISCRIMINATOR: [u8; 8] = [63, 149, 209, 12, 225, 128, 99, 9];

/// Offsets memcmp des mints (discriminator compris).
pub const TOKEN_MINT_A_OFFSET: usize = 101;
pub const TOKEN_MINT_B_OFFSET: usize = 181;

/// Whirlpool Orca : tout l'état de cotation (liquidité active, sqrtPrice,
/// fee) est dans le compte du pool, les frais en centièmes de bp.
#[derive(Debug, Clone)]
pub struct WhirlpoolPool {
    pub address: Pubkey,
    pub whirlpools_config: Pubkey,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub vault_a: Pubkey,
    pub vault_b: Pubkey,
    pub liquidity: u128,
    pub sqrt_price: u128,
    pub tick_current_index: i32,
    pub tick_spacing: u16,
    pub fee_rate: u16,
    pub last_state_update: i64,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct WhirlpoolRewardInfoData {
    pub mint: Pubkey,
    pub vault: Pubkey,
    pub authority: Pubkey,
    pub emissions_per_second_x64: u128,
    pub growth_global_x64: u128,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct WhirlpoolData {
    pub whirlpools_config: Pubkey,
    pub whirlpool_bump: [u8; 1],
    pub tick_spacing: u16,
    pub tick_spacing_seed: [u8; 2],
    pub fee_rate: u16,
    pub protocol_fee_rate: u16,
    pub liquidity: u128,
    pub sqrt_price: u128,
    pub tick_current_index: i32,
    pub protocol_fee_owed_a: u64,
    pub protocol_fee_owed_b: u64,
    pub token_mint_a: Pubkey,
    pub token_vault_a: Pubkey,
    pub fee_growth_global_a: u128,
    pub token_mint_b: Pubkey,
    pub token_vault_b: Pubkey,
    pub fee_growth_global_b: u128,
    pub reward_last_updated_timestamp: u64,
    pub reward_infos: [WhirlpoolRewardInfoData; 3],
}

pub fn decode_pool(address: &Pubkey, data: &[u8]) -> Result<WhirlpoolPool> {
    if data.get(..8) != Some(&WHIRLPOOL_DISCRIMINATOR) {
        bail!("invalid discriminator, not a Whirlpool account");
    }
    let data_slice = &data[8..];
    let expected = std::mem::size_of::<WhirlpoolData>();
    if data_slice.len() < expected {
        bail!(
            "Whirlpool data too short: expected at least {} bytes, got {}",
            expected,
            data_slice.len()
        );
    }
    let raw: &WhirlpoolData = from_bytes(&data_slice[..expected]);

    Ok(WhirlpoolPool {
        address: *address,
        whirlpools_config: raw.whirlpools_config,
        mint_a: raw.token_mint_a,
        mint_b: raw.token_mint_b,
        vault_a: raw.token_vault_a,
        vault_b: raw.token_vault_b,
        liquidity: raw.liquidity,
        sqrt_price: raw.sqrt_price,
        tick_current_index: raw.tick_current_index,
        tick_spacing: raw.tick_spacing,
        fee_rate: raw.fee_rate,
        last_state_update: 0,
    })
}

#[async_trait]
impl PoolOperations for WhirlpoolPool {
    fn protocol_name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    fn program_id(&self) -> Pubkey {
        WHIRLPOOL_PROGRAM_ID
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

    fn opposite_reserve(&self, _token_in: &Pubkey) -> Option<u64> {
        None
    }

    fn get_quote(&self, token_in_mint: &Pubkey, amount_in: u64, _current_timestamp: i64) -> Result<u64> {
        let a_to_b = if *token_in_mint == self.mint_a {
            true
        } else if *token_in_mint == self.mint_b {
            false
        } else {
            bail!("input token {} does not belong to pool {}", token_in_mint, self.address);
        };
        clmm_math::get_amount_out(
            amount_in,
            self.sqrt_price,
            self.liquidity,
            self.fee_rate as u32,
            a_to_b,
        )
    }

    async fn get_quote_async(
        &mut self,
        token_in_mint: &Pubkey,
        amount_in: u64,
        current_timestamp: i64,
        gateway: &dyn SolanaGateway,
    ) -> Result<u64> {
        if current_timestamp - self.last_state_update > VAULT_CACHE_MAX_AGE_SECS {
            let data = gateway.get_account_data(&self.address).await?;
            let fresh = decode_pool(&self.address, &data)?;
            self.liquidity = fresh.liquidity;
            self.sqrt_price = fresh.sqrt_price;
            self.tick_current_index = fresh.tick_current_index;
            self.fee_rate = fresh.fee_rate;
            self.last_state_update = current_timestamp;
        }
        self.get_quote(token_in_mint, amount_in, current_timestamp)
    }

    fn apply_account_update(&mut self, account: &Pubkey, data: &[u8], timestamp: i64) -> Result<()> {
        if *account == self.address {
            let fresh = decode_pool(&self.address, data)?;
            self.liquidity = fresh.liquidity;
            self.sqrt_price = fresh.sqrt_price;
            self.tick_current_index = fresh.tick_current_index;
            self.fee_rate = fresh.fee_rate;
        } else if *account == self.vault_a || *account == self.vault_b {
            // Les vaults ne portent pas l'état de cotation ; la notification
            // sert uniquement d'horodatage de fraîcheur.
        } else {
            bail!("account {} does not belong to pool {}", account, self.address);
        }
        self.last_state_update = timestamp;
        Ok(())
    }
}
