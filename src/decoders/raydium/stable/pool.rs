// src/decoders/raydium/stable/pool.rs

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytemuck::{from_bytes, Pod, Zeroable};
use solana_sdk::pubkey;
use solana_sdk::pubkey::Pubkey;

use crate::decoders::pool_operations::{PoolOperations, VAULT_CACHE_MAX_AGE_SECS};
use crate::decoders::spl_token::decode_token_amount;
use crate::math::stable_math;
use crate::rpc::SolanaGateway;

pub const RAYDIUM_STABLE_PROGRAM_ID: Pubkey = pubkey!("5quBtoiQqxF9Jv6KYKctB59NT3gtJD2Y65kdnB1Uev3h");
pub const PROTOCOL_NAME: &str = "raydium-stable";

/// Offsets memcmp des mints dans le layout stable (pas de discriminator).
pub const COIN_MINT_OFFSET: usize = 432;
pub const PC_MINT_OFFSET: usize = 464;

/// Pool stable-swap : l'invariant de courbe remplace x*y=k, le facteur
/// d'amplification vit dans un compte ModelData séparé.
#[derive(Debug, Clone)]
pub struct StablePool {
    pub address: Pubkey,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub vault_a: Pubkey,
    pub vault_b: Pubkey,
    pub model_data_account: Pubkey,
    pub status: u64,
    pub fee_numerator: u64,
    pub fee_denominator: u64,
    pub amp: u64,
    pub reserve_a: u64,
    pub reserve_b: u64,
    pub last_reserve_update: i64,
    pub reserves_fresh: bool,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct Fees {
    pub min_separate_numerator: u64,
    pub min_separate_denominator: u64,
    pub trade_fee_numerator: u64,
    pub trade_fee_denominator: u64,
    pub pnl_numerator: u64,
    pub pnl_denominator: u64,
    pub swap_fee_numerator: u64,
    pub swap_fee_denominator: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct OutPutData {
    pub need_take_pnl_coin: u64,
    pub need_take_pnl_pc: u64,
    pub total_pnl_pc: u64,
    pub total_pnl_coin: u64,
    pub pool_open_time: u64,
    pub punish_pc_amount: u64,
    pub punish_coin_amount: u64,
    pub orderbook_to_init_time: u64,
    pub swap_coin_in_amount: u128,
    pub swap_pc_out_amount: u128,
    pub swap_pc_in_amount: u128,
    pub swap_coin_out_amount: u128,
    pub swap_pc_fee: u64,
    pub swap_coin_fee: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct StableAmmInfoData {
    pub account_type: u64,
    pub status: u64,
    pub nonce: u64,
    pub order_num: u64,
    pub depth: u64,
    pub coin_decimals: u64,
    pub pc_decimals: u64,
    pub state: u64,
    pub reset_flag: u64,
    pub min_size: u64,
    pub vol_max_cut_ratio: u64,
    pub amount_wave: u64,
    pub coin_lot_size: u64,
    pub pc_lot_size: u64,
    pub min_price_multiplier: u64,
    pub max_price_multiplier: u64,
    pub sys_decimal_value: u64,
    pub abort_trade_factor: u64,
    pub price_tick_multiplier: u64,
    pub price_tick: u64,
    pub fees: Fees,
    pub out_put: OutPutData,
    pub coin_vault: Pubkey,
    pub pc_vault: Pubkey,
    pub coin_mint: Pubkey,
    pub pc_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub model_data_key: Pubkey,
    pub open_orders: Pubkey,
    pub serum_market: Pubkey,
    pub serum_program: Pubkey,
    pub target_orders: Pubkey,
    pub amm_admin: Pubkey,
    pub padding: [u64; 64],
}

pub fn decode_pool(address: &Pubkey, data: &[u8]) -> Result<StablePool> {
    let expected = std::mem::size_of::<StableAmmInfoData>();
    if data.len() < expected {
        bail!(
            "stable swap data too short: expected {} bytes, got {}",
            expected,
            data.len()
        );
    }
    let raw: &StableAmmInfoData = from_bytes(&data[..expected]);
    if raw.status == 0 {
        bail!("pool {} is not initialized", address);
    }

    Ok(StablePool {
        address: *address,
        mint_a: raw.coin_mint,
        mint_b: raw.pc_mint,
        vault_a: raw.coin_vault,
        vault_b: raw.pc_vault,
        model_data_account: raw.model_data_key,
        status: raw.status,
        fee_numerator: raw.fees.trade_fee_numerator,
        fee_denominator: raw.fees.trade_fee_denominator,
        amp: 0,
        reserve_a: 0,
        reserve_b: 0,
        last_reserve_update: 0,
        reserves_fresh: false,
    })
}

/// Le facteur d'amplification est le premier u64 du ModelDataAccount.
pub fn decode_model_amp(data: &[u8]) -> Result<u64> {
    if data.len() < 8 {
        bail!("model data too short: expected at least 8 bytes, got {}", data.len());
    }
    let bytes: [u8; 8] = data[0..8].try_into()?;
    Ok(u64::from_le_bytes(bytes))
}

impl StablePool {
    async fn refresh(&mut self, now: i64, gateway: &dyn SolanaGateway) -> Result<()> {
        let mut wanted = vec![self.vault_a, self.vault_b];
        let need_amp = self.amp == 0;
        if need_amp {
            wanted.push(self.model_data_account);
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

        if need_amp {
            let model = accounts
                .get(2)
                .and_then(|a| a.as_deref())
                .ok_or_else(|| anyhow!("model data {} not found", self.model_data_account))?;
            self.amp = decode_model_amp(model)?;
        }

        self.last_reserve_update = now;
        self.reserves_fresh = true;
        Ok(())
    }
}

#[async_trait]
impl PoolOperations for StablePool {
    fn protocol_name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    fn program_id(&self) -> Pubkey {
        RAYDIUM_STABLE_PROGRAM_ID
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
            && self.amp > 0
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
        stable_math::get_amount_out(
            amount_in,
            reserve_in,
            reserve_out,
            self.amp,
            self.fee_numerator,
            self.fee_denominator,
        )
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
            self.fee_numerator = fresh.fee_numerator;
            self.fee_denominator = fresh.fee_denominator;
            return Ok(());
        } else {
            bail!("account {} does not belong to pool {}", account, self.address);
        }
        self.last_reserve_update = timestamp;
        self.reserves_fresh = true;
        Ok(())
    }
}
