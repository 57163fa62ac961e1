// src/decoders/meteora/dlmm/pool.rs

use std::collections::BTreeMap;
use std::mem;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytemuck::{pod_read_unaligned, Pod, Zeroable};
use solana_sdk::pubkey;
use solana_sdk::pubkey::Pubkey;

use crate::decoders::pool_operations::{PoolOperations, VAULT_CACHE_MAX_AGE_SECS};
use crate::math::dlmm_math::{self, FEE_PRECISION};
use crate::rpc::SolanaGateway;

pub const METEORA_DLMM_PROGRAM_ID: Pubkey = pubkey!("LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo");
pub const PROTOCOL_NAME: &str = "meteora-dlmm";

const LB_PAIR_DISCRIMINATOR: [u8; 8] = [33, 11, 49, 98, 181, 101, 177, 13];
const BIN_ARRAY_DISCRIMINATOR: [u8; 8] = [92, 142, 92, 220, 5, 148, 70, 181];

pub const MAX_BIN_PER_ARRAY: usize = 70;
const BIN_ARRAY_SEED: &[u8] = b"bin_array";

/// Offsets memcmp des mints dans LbPair (discriminator + paramètres + header).
pub const TOKEN_X_MINT_OFFSET: usize = 88;
pub const TOKEN_Y_MINT_OFFSET: usize = 120;

/// Plafond du fee total : 10 % en précision 1e9.
const MAX_FEE_RATE: u128 = 100_000_000;

#[derive(Debug, Clone, Copy)]
pub struct Bin {
    pub amount_a: u64,
    pub amount_b: u64,
    pub price_x64: u128,
}

#[derive(Debug, Clone)]
pub struct BinArray {
    pub index: i64,
    pub bins: [Bin; MAX_BIN_PER_ARRAY],
}

/// Pool à bins discrets. Un swap consomme la liquidité bin par bin en
/// s'éloignant du bin actif, avec un fee dynamique piloté par
/// l'accumulateur de volatilité.
#[derive(Debug, Clone)]
pub struct DlmmPool {
    pub address: Pubkey,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub vault_a: Pubkey,
    pub vault_b: Pubkey,
    pub oracle: Pubkey,
    pub active_bin_id: i32,
    pub bin_step: u16,
    pub parameters: StaticParameters,
    pub v_parameters: VariableParameters,
    pub bin_arrays: Option<BTreeMap<i64, BinArray>>,
    pub last_state_update: i64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct StaticParameters {
    pub base_factor: u16,
    pub filter_period: u16,
    pub decay_period: u16,
    pub reduction_factor: u16,
    pub variable_fee_control: u32,
    pub max_volatility_accumulator: u32,
    pub min_bin_id: i32,
    pub max_bin_id: i32,
    pub protocol_share: u16,
    pub base_fee_power_factor: u8,
    pub padding: [u8; 5],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct VariableParameters {
    pub volatility_accumulator: u32,
    pub volatility_reference: u32,
    pub index_reference: i32,
    pub padding: [u8; 4],
    pub last_update_timestamp: i64,
    pub padding1: [u8; 8],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ProtocolFeeData {
    pub amount_x: u64,
    pub amount_y: u64,
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RewardInfoData {
    pub mint: Pubkey,
    pub vault: Pubkey,
    pub funder: Pubkey,
    pub reward_duration: u64,
    pub reward_duration_end: u64,
    pub reward_rate: u128,
    pub last_update_time: u64,
    pub cumulative_seconds_with_empty_liquidity_reward: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LbPairData {
    pub parameters: StaticParameters,
    pub v_parameters: VariableParameters,
    pub bump_seed: [u8; 1],
    pub bin_step_seed: [u8; 2],
    pub pair_type: u8,
    pub active_id: i32,
    pub bin_step: u16,
    pub status: u8,
    pub require_base_factor_seed: u8,
    pub base_factor_seed: [u8; 2],
    pub activation_type: u8,
    pub creator_pool_on_off_control: u8,
    pub token_x_mint: Pubkey,
    pub token_y_mint: Pubkey,
    pub reserve_x: Pubkey,
    pub reserve_y: Pubkey,
    pub protocol_fee: ProtocolFeeData,
    pub padding1: [u8; 32],
    pub reward_infos: [RewardInfoData; 2],
    pub oracle: Pubkey,
    pub bin_array_bitmap: [u64; 16],
    pub last_updated_at: i64,
    pub padding2: [u8; 32],
    pub pre_activation_swap_address: Pubkey,
    pub base_key: Pubkey,
    pub activation_point: u64,
    pub pre_activation_duration: u64,
    pub padding3: [u8; 8],
    pub padding4: u64,
    pub creator: Pubkey,
    pub token_mint_x_program_flag: u8,
    pub token_mint_y_program_flag: u8,
    pub reserved: [u8; 22],
}

#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BinData {
    pub amount_x: u64,
    pub amount_y: u64,
    pub price: u128,
    pub liquidity_supply: u128,
    pub reward_per_token_stored: [u128; 2],
    pub fee_amount_x_per_token_stored: u128,
    pub fee_amount_y_per_token_stored: u128,
    pub amount_x_in: u128,
    pub amount_y_in: u128,
}

pub fn decode_lb_pair(address: &Pubkey, data: &[u8]) -> Result<DlmmPool> {
    if data.get(..8) != Some(&LB_PAIR_DISCRIMINATOR) {
        bail!("invalid discriminator, not an LbPair account");
    }
    let data_slice = &data[8..];
    let expected = mem::size_of::<LbPairData>();
    if data_slice.len() < expected {
        bail!(
            "LbPair data too short: expected at least {} bytes, got {}",
            expected,
            data_slice.len()
        );
    }
    // lecture non alignée : le buffer vient du réseau, rien ne garantit
    // l'alignement du layout
    let raw: LbPairData = pod_read_unaligned(&data_slice[..expected]);

    Ok(DlmmPool {
        address: *address,
        mint_a: raw.token_x_mint,
        mint_b: raw.token_y_mint,
        vault_a: raw.reserve_x,
        vault_b: raw.reserve_y,
        oracle: raw.oracle,
        active_bin_id: raw.active_id,
        bin_step: raw.bin_step,
        parameters: raw.parameters,
        v_parameters: raw.v_parameters,
        bin_arrays: None,
        last_state_update: 0,
    })
}

pub fn decode_bin_array(index: i64, data: &[u8]) -> Result<BinArray> {
    if data.get(..8) != Some(&BIN_ARRAY_DISCRIMINATOR) {
        bail!("invalid discriminator, not a BinArray account");
    }
    let data_slice = &data[8..];
    // index(8) + version(1) + padding(7) + lb_pair(32)
    const BINS_FIELD_OFFSET: usize = 48;
    let bin_size = mem::size_of::<BinData>();
    let needed = BINS_FIELD_OFFSET + MAX_BIN_PER_ARRAY * bin_size;
    if data_slice.len() < needed {
        bail!(
            "BinArray data too short: expected at least {} bytes, got {}",
            needed,
            data_slice.len()
        );
    }

    let mut bins = [Bin { amount_a: 0, amount_b: 0, price_x64: 0 }; MAX_BIN_PER_ARRAY];
    for (i, bin) in bins.iter_mut().enumerate() {
        let start = BINS_FIELD_OFFSET + i * bin_size;
        let raw: BinData = pod_read_unaligned(&data_slice[start..start + bin_size]);
        *bin = Bin {
            amount_a: raw.amount_x,
            amount_b: raw.amount_y,
            price_x64: raw.price,
        };
    }
    Ok(BinArray { index, bins })
}

pub fn bin_array_index_for(bin_id: i32) -> i64 {
    let id = bin_id as i64;
    let size = MAX_BIN_PER_ARRAY as i64;
    id.div_euclid(size)
}

pub fn bin_array_address(lb_pair: &Pubkey, bin_array_index: i64) -> Pubkey {
    Pubkey::find_program_address(
        &[BIN_ARRAY_SEED, &lb_pair.to_bytes(), &bin_array_index.to_le_bytes()],
        &METEORA_DLMM_PROGRAM_ID,
    )
    .0
}

// --- Fee dynamique ---

fn base_fee(bin_step: u16, params: &StaticParameters) -> Result<u128> {
    u128::from(params.base_factor)
        .checked_mul(bin_step.into())
        .and_then(|f| f.checked_mul(10))
        .and_then(|f| f.checked_mul(10u128.pow(params.base_fee_power_factor.into())))
        .ok_or_else(|| anyhow!("base fee overflow"))
}

fn variable_fee(volatility_accumulator: u32, bin_step: u16, params: &StaticParameters) -> Result<u128> {
    if params.variable_fee_control == 0 {
        return Ok(0);
    }
    let vfa = u128::from(volatility_accumulator);
    let v_fee = vfa
        .checked_mul(bin_step.into())
        .and_then(|f| f.checked_pow(2))
        .and_then(|f| f.checked_mul(params.variable_fee_control.into()))
        .ok_or_else(|| anyhow!("variable fee overflow"))?;
    // arrondi au plafond sur 1e11
    Ok((v_fee + 99_999_999_999) / 100_000_000_000)
}

fn total_fee(bin_step: u16, s_params: &StaticParameters, v_params: &VariableParameters) -> Result<u128> {
    let total = base_fee(bin_step, s_params)?
        .checked_add(variable_fee(v_params.volatility_accumulator, bin_step, s_params)?)
        .ok_or_else(|| anyhow!("total fee overflow"))?;
    Ok(total.min(MAX_FEE_RATE))
}

/// Décroissance des références de volatilité au début du swap.
fn update_references(
    v_params: &mut VariableParameters,
    s_params: &StaticParameters,
    active_id: i32,
    current_timestamp: i64,
) {
    let elapsed = current_timestamp.saturating_sub(v_params.last_update_timestamp);
    if elapsed >= s_params.filter_period as i64 {
        v_params.index_reference = active_id;
        if elapsed < s_params.decay_period as i64 {
            v_params.volatility_reference = ((v_params.volatility_accumulator as u64
                * s_params.reduction_factor as u64)
                / 10_000) as u32;
        } else {
            v_params.volatility_reference = 0;
        }
    }
}

/// L'accumulateur suit la distance parcourue depuis la référence.
fn update_volatility_accumulator(
    v_params: &mut VariableParameters,
    s_params: &StaticParameters,
    bin_id: i32,
) {
    let delta = (i64::from(v_params.index_reference) - i64::from(bin_id)).unsigned_abs();
    let accumulated = u64::from(v_params.volatility_reference).saturating_add(delta.saturating_mul(10_000));
    v_params.volatility_accumulator = accumulated.min(s_params.max_volatility_accumulator as u64) as u32;
}

impl DlmmPool {
    /// Marche de bins : vide la réserve de sortie de chaque bin traversé,
    /// fee dynamique recalculé à chaque bin.
    fn swap_across_bins(&self, amount_in: u64, swap_for_y: bool, current_timestamp: i64) -> Result<u64> {
        let bin_arrays = self
            .bin_arrays
            .as_ref()
            .ok_or_else(|| anyhow!("pool {} is not hydrated", self.address))?;

        let mut amount_remaining = amount_in as u128;
        let mut total_out: u128 = 0;
        let mut bin_id = self.active_bin_id;

        let mut v_params = self.v_parameters;
        update_references(&mut v_params, &self.parameters, self.active_bin_id, current_timestamp);

        while amount_remaining > 0 {
            if bin_id < self.parameters.min_bin_id || bin_id > self.parameters.max_bin_id {
                break;
            }

            let array_index = bin_array_index_for(bin_id);
            let bin_array = match bin_arrays.get(&array_index) {
                Some(array) => array,
                None => break,
            };
            let slot = bin_id.rem_euclid(MAX_BIN_PER_ARRAY as i32) as usize;
            let bin = &bin_array.bins[slot];

            update_volatility_accumulator(&mut v_params, &self.parameters, bin_id);
            let fee_rate = total_fee(self.bin_step, &self.parameters, &v_params)?;

            let out_reserve = if swap_for_y { bin.amount_b } else { bin.amount_a };
            if out_reserve == 0 {
                bin_id = if swap_for_y { bin_id.saturating_sub(1) } else { bin_id.saturating_add(1) };
                continue;
            }

            // Entrée nette qui viderait ce bin, puis entrée brute fee compris.
            let max_out = out_reserve as u128;
            let net_in_for_max_out =
                dlmm_math::get_amount_in(out_reserve, bin.price_x64, swap_for_y)? as u128;
            let fee_for_max_out =
                (net_in_for_max_out * fee_rate) / (FEE_PRECISION - fee_rate);
            let gross_in_for_max_out = net_in_for_max_out + fee_for_max_out;

            if amount_remaining >= gross_in_for_max_out && gross_in_for_max_out > 0 {
                total_out += max_out;
                amount_remaining -= gross_in_for_max_out;
                bin_id = if swap_for_y { bin_id.saturating_sub(1) } else { bin_id.saturating_add(1) };
            } else {
                let fee = (amount_remaining * fee_rate) / FEE_PRECISION;
                let net_in = (amount_remaining - fee) as u64;
                let out = dlmm_math::get_amount_out(net_in, bin.price_x64, swap_for_y)?;
                total_out += (out as u128).min(max_out);
                amount_remaining = 0;
            }
        }

        Ok(total_out.try_into().unwrap_or(u64::MAX))
    }

    async fn hydrate_bin_arrays(&mut self, now: i64, gateway: &dyn SolanaGateway) -> Result<()> {
        let active_index = bin_array_index_for(self.active_bin_id);
        let indices = [active_index - 1, active_index, active_index + 1];
        let addresses: Vec<Pubkey> =
            indices.iter().map(|i| bin_array_address(&self.address, *i)).collect();

        let accounts = gateway.get_multiple_account_data(&addresses).await?;
        let mut arrays = BTreeMap::new();
        for (i, account) in indices.iter().zip(accounts.into_iter()) {
            if let Some(data) = account {
                if let Ok(decoded) = decode_bin_array(*i, &data) {
                    arrays.insert(*i, decoded);
                }
            }
        }
        if arrays.is_empty() {
            bail!("no bin arrays found around active bin {}", self.active_bin_id);
        }
        self.bin_arrays = Some(arrays);
        self.last_state_update = now;
        Ok(())
    }
}

#[async_trait]
impl PoolOperations for DlmmPool {
    fn protocol_name(&self) -> &'static str {
        PROTOCOL_NAME
    }

    fn program_id(&self) -> Pubkey {
        METEORA_DLMM_PROGRAM_ID
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

    fn is_fresh(&self, now: i64) -> bool {
        self.bin_arrays.is_some() && now - self.last_state_update <= VAULT_CACHE_MAX_AGE_SECS
    }

    fn get_quote(&self, token_in_mint: &Pubkey, amount_in: u64, current_timestamp: i64) -> Result<u64> {
        let swap_for_y = if *token_in_mint == self.mint_a {
            true
        } else if *token_in_mint == self.mint_b {
            false
        } else {
            bail!("input token {} does not belong to pool {}", token_in_mint, self.address);
        };
        self.swap_across_bins(amount_in, swap_for_y, current_timestamp)
    }

    async fn get_quote_async(
        &mut self,
        token_in_mint: &Pubkey,
        amount_in: u64,
        current_timestamp: i64,
        gateway: &dyn SolanaGateway,
    ) -> Result<u64> {
        if !self.is_fresh(current_timestamp) {
            let data = gateway.get_account_data(&self.address).await?;
            let fresh = decode_lb_pair(&self.address, &data)?;
            self.active_bin_id = fresh.active_bin_id;
            self.parameters = fresh.parameters;
            self.v_parameters = fresh.v_parameters;
            self.hydrate_bin_arrays(current_timestamp, gateway).await?;
        }
        self.get_quote(token_in_mint, amount_in, current_timestamp)
    }

    fn apply_account_update(&mut self, account: &Pubkey, data: &[u8], timestamp: i64) -> Result<()> {
        if *account == self.address {
            let fresh = decode_lb_pair(&self.address, data)?;
            self.active_bin_id = fresh.active_bin_id;
            self.parameters = fresh.parameters;
            self.v_parameters = fresh.v_parameters;
        } else if *account == self.vault_a || *account == self.vault_b {
            // Les montants par bin vivent dans les BinArrays ; la notification
            // de vault ne sert que d'indicateur d'activité.
        } else {
            bail!("account {} does not belong to pool {}", account, self.address);
        }
        self.last_state_update = timestamp;
        Ok(())
    }
}
