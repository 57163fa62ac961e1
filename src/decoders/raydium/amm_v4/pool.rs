// src/decoders/raydium/amm_v4/pool.rs

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytemuck::{from_bytes, Pod, Zeroable};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::pubkey;

use crate::decoders::pool_operations::{PoolOperations, VAULT_CACHE_MAX_AGE_SECS};
use crate::decoders::spl_token::decode_token_amount;
use crate::math::cp_math;
use crate::rpc::SolanaGateway;

pub const RAYDIUM_AMM_V4_PROGRAM_ID: Pubkey = pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");
pub const PROTOCOL_NAME: &str = "raydium-amm-v4";

/// Offsets memcmp des mints dans AmmInfoData (pas de discriminator sur ce
/// layout).
pub const COIN_MINT_OFFSET: usize = 400;
pub const PC_MINT_OFFSET: usize = 432;

/// État de travail d'un pool Raydium AMM V4. Les réserves viennent des
/// vaults (comptes de token), pas du compte du pool ; elles sont soit
/// hydratées à la demande, soit poussées par subscription.
#[derive(Debug, Clone)]
pub struct AmmV4Pool {
    pub address: Pubkey,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub vault_a: Pubkey,
    pub vault_b: Pubkey,
    pub status: u64,
    pub fee_numerator: u64,
    pub fee_denominator: u64,
    /// PnL en attente de retrait, à soustraire des soldes bruts des vaults.
    pub need_take_pnl_a: u64,
    pub need_take_pnl_b: u64,
    pub reserve_a: u64,
    pub reserve_b: u64,
    pub last_reserve_update: i64,
    pub reserves_fresh: bool,
}

// Miroir exact du layout on-chain (little-endian, offsets fixes).
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
    pub swap_take_pc_fee: u64,
    pub swap_pc_in_amount: u128,
    pub swap_coin_out_amount: u128,
    pub swap_take_coin_fee: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct AmmInfoData {
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
    pub fees: Fees,
    pub out_put: OutPutData,
    pub token_coin: Pubkey,
    pub token_pc: Pubkey,
    pub coin_mint: Pubkey,
    pub pc_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub open_orders: Pubkey,
    pub market: Pubkey,
    pub serum_dex: Pubkey,
    pub target_orders: Pubkey,
    pub withdraw_queue: Pubkey,
    pub token_temp_lp: Pubkey,
    pub amm_owner: Pubkey,
    pub lp_amount: u64,
    pub client_order_id: u64,
    pub padding: [u64; 2],
}

pub fn decode_pool(address: &Pubkey, data: &[u8]) -> Result<AmmV4Pool> {
    let expected = std::mem::size_of::<AmmInfoData>();
    if data.len() < expected {
        bail!("AMM V4 data too short: expected {} bytes, got {}", expected, data.len());
    }
    let raw: &AmmInfoData = from_bytes(&data[..expected]);
    if raw.status == 0 {
        // Pool non initialisé : exclu du routage dès le décodage.
        bail!("pool {} is not initialized", address);
    }

    Ok(AmmV4Pool {
        address: *address,
        mint_a: raw.coin_mint,
        mint_b: raw.pc_mint,
        vault_a: raw.token_coin,
        vault_b: raw.token_pc,
        status: raw.status,
        fee_numerator: raw.fees.swap_fee_numerator,
        fee_denominator: raw.fees.swap_fee_denominator,
        need_take_pnl_a: raw.out_put.need_take_pnl_coin,
        need_take_pnl_b: raw.out_put.need_take_pnl_pc,
        reserve_a: 0,
        reserve_b: 0,
        last_reserve_update: 0,
        reserves_fresh: false,
    })
}

impl AmmV4Pool {
    /// Réserves échangeables : soldes de vaults moins le PnL en attente.
    fn tradable_reserves(&self) -> (u64, u64) {
        cp_math::pnl_adjusted_reserves(
            self.reserve_a,
            self.reserve_b,
            self.need_take_pnl_a,
            self.need_take_pnl_b,
        )
    }

    async fn refresh_reserves(&mut self, now: i64, gateway: &dyn SolanaGateway) -> Result<()> {
        let accounts = gateway
            .get_multiple_account_data(&[self.vault_a, self.vault_b])
            .await?;
        let base = accounts
            .first()
            .and_then(|a| a.as_deref())
            .ok_or_else(|| anyhow::anyhow!("vault {} not found", self.vault_a))?;
        let quote = accounts
            .get(1)
            .and_then(|a| a.as_deref())
            .ok_or_else(|| anyhow::anyhow!("vault {} not found", self.vault_b))?;
        self.reserve_a = decode_token_amount(base)?;
        self.reserve_b = decode_token_amount(quote)?;
        self.last_reserve_update = now;
        self.reserves_fresh = true;
        Ok(())
    }
}

#[async_trait]
impl PoolOperations for AmmV4Pool {
    fn protocol_name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    fn program_id(&self) -> Pubkey {
        RAYDIUM_AMM_V4_PROGRAM_ID
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
        let (reserve_a, reserve_b) = self.tradable_reserves();
        if *token_in == self.mint_a {
            Some(reserve_b)
        } else {
            Some(reserve_a)
        }
    }

    fn is_fresh(&self, now: i64) -> bool {
        self.reserves_fresh && now - self.last_reserve_update <= VAULT_CACHE_MAX_AGE_SECS
    }

    fn get_quote(&self, token_in_mint: &Pubkey, amount_in: u64, _current_timestamp: i64) -> Result<u64> {
        let (reserve_a, reserve_b) = self.tradable_reserves();
        let (reserve_in, reserve_out) = if *token_in_mint == self.mint_a {
            (reserve_a, reserve_b)
        } else if *token_in_mint == self.mint_b {
            (reserve_b, reserve_a)
        } else {
            bail!("input token {} does not belong to pool {}", token_in_mint, self.address);
        };
        cp_math::get_amount_out(
            amount_in,
            reserve_in,
            reserve_out,
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
            // Les réserves ne vivent pas dans le compte du pool : on les garde.
            self.status = fresh.status;
            self.fee_numerator = fresh.fee_numerator;
            self.fee_denominator = fresh.fee_denominator;
            self.need_take_pnl_a = fresh.need_take_pnl_a;
            self.need_take_pnl_b = fresh.need_take_pnl_b;
            return Ok(());
        } else {
            bail!("account {} does not belong to pool {}", account, self.address);
        }
        self.last_reserve_update = timestamp;
        self.reserves_fresh = true;
        Ok(())
    }
}
