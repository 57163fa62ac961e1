// src/decoders/raydium/clmm/pool.rs

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytemuck::{from_bytes, Pod, Zeroable};
use solana_sdk::pubkey;
use solana_sdk::pubkey::Pubkey;

use crate::decoders::pool_operations::{PoolOperations, VAULT_CACHE_MAX_AGE_SECS};
use crate::math::clmm_math;
use crate::rpc::SolanaGateway;

pub const RAYDIUM_CLMM_PROGRAM_ID: Pubkey = pubkey!("CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK");
pub const PROTOCOL_NAME: &str = "raydium-clmm";

const POOL_STATE_DISCRIMINATOR: [u8; 8] = [247, 237, 227, 245, 215, 195, 222, 70];
const AMM_CONFIG_DISCRIMINATOR: [u8; 8] = [218, 244, 33, 104, 203, 203, 43, 111];

/// Offsets memcmp des mints (discriminator + bump + amm_config + owner).
pub const TOKEN_MINT_0_OFFSET: usize = 73;
pub const TOKEN_MINT_1_OFFSET: usize = 105;

/// Pool concentré Raydium. Le swap est approximé sur la plage active : la
/// liquidité et le sqrtPrice vivent dans le compte du pool, le fee dans
/// l'AmmConfig.
#[derive(Debug, Clone)]
pub struct ClmmPool {
    pub address: Pubkey,
    pub amm_config: Pubkey,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub vault_a: Pubkey,
    pub vault_b: Pubkey,
    pub liquidity: u128,
    pub sqrt_price_x64: u128,
    pub tick_current: i32,
    pub status: u8,
    pub trade_fee_rate: u32,
    pub last_state_update: i64,
    pub fee_hydrated: bool,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RewardInfoData {
    pub reward_state: u8,
    pub open_time: u64,
    pub end_time: u64,
    pub last_update_time: u64,
    pub emissions_per_second_x64: u128,
    pub reward_total_emissioned: u64,
    pub reward_claimed: u64,
    pub token_mint: Pubkey,
    pub token_vault: Pubkey,
    pub authority: Pubkey,
    pub reward_growth_global_x64: u128,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PoolStateData {
    pub bump: [u8; 1],
    pub amm_config: Pubkey,
    pub owner: Pubkey,
    pub token_mint_0: Pubkey,
    pub token_mint_1: Pubkey,
    pub token_vault_0: Pubkey,
    pub token_vault_1: Pubkey,
    pub observation_key: Pubkey,
    pub mint_decimals_0: u8,
    pub mint_decimals_1: u8,
    pub tick_spacing: u16,
    pub liquidity: u128,
    pub sqrt_price_x64: u128,
    pub tick_current: i32,
    pub padding3: u16,
    pub padding4: u16,
    pub fee_growth_global_0_x64: u128,
    pub fee_growth_global_1_x64: u128,
    pub protocol_fees_token_0: u64,
    pub protocol_fees_token_1: u64,
    pub swap_in_amount_token_0: u128,
    pub swap_out_amount_token_1: u128,
    pub swap_in_amount_token_1: u128,
    pub swap_out_amount_token_0: u128,
    pub status: u8,
    pub padding: [u8; 7],
    pub reward_infos: [RewardInfoData; 3],
    pub tick_array_bitmap: [u64; 16],
    pub total_fees_token_0: u64,
    pub total_fees_claimed_token_0: u64,
    pub total_fees_token_1: u64,
    pub total_fees_claimed_token_1: u64,
    pub fund_fees_token_0: u64,
    pub fund_fees_token_1: u64,
    pub open_time: u64,
    pub recent_epoch: u64,
    pub padding1: [u64; 24],
    pub padding2: [u64; 32],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ClmmAmmConfigData {
    pub bump: u8,
    pub index: u16,
    pub owner: Pubkey,
    pub protocol_fee_rate: u32,
    pub trade_fee_rate: u32,
    pub tick_spacing: u16,
    pub fund_fee_rate: u32,
    pub padding_u32: u32,
    pub fund_owner: Pubkey,
    pub padding: [u64; 3],
}

pub fn decode_pool(address: &Pubkey, data: &[u8]) -> Result<ClmmPool> {
    if data.get(..8) != Some(&POOL_STATE_DISCRIMINATOR) {
        bail!("invalid discriminator, not a Raydium CLMM PoolState account");
    }
    let data_slice = &data[8..];
    let expected = std::mem::size_of::<PoolStateData>();
    if data_slice.len() < expected {
        bail!(
            "CLMM PoolState data too short: expected at least {} bytes, got {}",
            expected,
            data_slice.len()
        );
    }
    let raw: &PoolStateData = from_bytes(&data_slice[..expected]);

    Ok(ClmmPool {
        address: *address,
        amm_config: raw.amm_config,
        mint_a: raw.token_mint_0,
        mint_b: raw.token_mint_1,
        vault_a: raw.token_vault_0,
        vault_b: raw.token_vault_1,
        liquidity: raw.liquidity,
        sqrt_price_x64: raw.sqrt_price_x64,
        tick_current: raw.tick_current,
        status: raw.status,
        trade_fee_rate: 0,
        last_state_update: 0,
        fee_hydrated: false,
    })
}

pub fn decode_config_fee(data: &[u8]) -> Result<u32> {
    if data.get(..8) != Some(&AMM_CONFIG_DISCRIMINATOR) {
        bail!("invalid discriminator, not a Raydium CLMM AmmConfig account");
    }
    let data_slice = &data[8..];
    let expected = std::mem::size_of::<ClmmAmmConfigData>();
    if data_slice.len() < expected {
        bail!(
            "CLMM AmmConfig data too short: expected at least {} bytes, got {}",
            expected,
            data_slice.len()
        );
    }
    let raw: &ClmmAmmConfigData = from_bytes(&data_slice[..expected]);
    Ok(raw.trade_fee_rate)
}

#[async_trait]
impl PoolOperations for ClmmPool {
    fn protocol_name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    fn program_id(&self) -> Pubkey {
        RAYDIUM_CLMM_PROGRAM_ID
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

    // Pas de réserve simple sur un pool concentré : pas de proxy liquidité.
    fn opposite_reserve(&self, _token_in: &Pubkey) -> Option<u64> {
        None
    }

    fn is_fresh(&self, _now: i64) -> bool {
        // L'état de cotation vit dans le compte du pool, décodé d'emblée ;
        // seul le fee demande une hydratation.
        self.fee_hydrated
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
            self.sqrt_price_x64,
            self.liquidity,
            self.trade_fee_rate,
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
        if !self.fee_hydrated {
            let config = gateway.get_account_data(&self.amm_config).await?;
            self.trade_fee_rate = decode_config_fee(&config)?;
            self.fee_hydrated = true;
        }
        if current_timestamp - self.last_state_update > VAULT_CACHE_MAX_AGE_SECS {
            // Relecture du compte du pool : sqrtPrice et liquidité bougent à
            // chaque swap on-chain.
            let data = gateway.get_account_data(&self.address).await?;
            let fresh = decode_pool(&self.address, &data)?;
            self.liquidity = fresh.liquidity;
            self.sqrt_price_x64 = fresh.sqrt_price_x64;
            self.tick_current = fresh.tick_current;
            self.status = fresh.status;
            self.last_state_update = current_timestamp;
        }
        self.get_quote(token_in_mint, amount_in, current_timestamp)
    }

    fn apply_account_update(&mut self, account: &Pubkey, data: &[u8], timestamp: i64) -> Result<()> {
        if *account == self.address {
            let fresh = decode_pool(&self.address, data)?;
            self.liquidity = fresh.liquidity;
            self.sqrt_price_x64 = fresh.sqrt_price_x64;
            self.tick_current = fresh.tick_current;
            self.status = fresh.status;
        } else if *account == self.vault_a || *account == self.vault_b {
            // Les soldes de vault n'entrent pas dans l'approximation ; la
            // notification vaut quand même rafraîchissement.
        } else {
            bail!("account {} does not belong to pool {}", account, self.address);
        }
        self.last_state_update = timestamp;
        Ok(())
    }
}
