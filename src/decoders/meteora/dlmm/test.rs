// src/decoders/meteora/dlmm/test.rs

use std::collections::BTreeMap;

use solana_sdk::pubkey::Pubkey;

use super::*;
use crate::decoders::PoolOperations;
use crate::math::dlmm_math;

const ONE_X64: u128 = 1 << 64;

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_pubkey(buf: &mut [u8], offset: usize, value: &Pubkey) {
    buf[offset..offset + 32].copy_from_slice(value.as_ref());
}

#[test]
fn decode_lb_pair_reads_documented_offsets() {
    let mint_x = Pubkey::new_unique();
    let mint_y = Pubkey::new_unique();
    let reserve_x = Pubkey::new_unique();
    let reserve_y = Pubkey::new_unique();

    let mut data = vec![0u8; 8 + 896];
    data[..8].copy_from_slice(&[33, 11, 49, 98, 181, 101, 177, 13]);
    put_u16(&mut data, 8, 5_000); // base_factor
    put_i32(&mut data, 24, -4_000); // min_bin_id
    put_i32(&mut data, 28, 4_000); // max_bin_id
    put_i32(&mut data, 76, 12); // active_id
    put_u16(&mut data, 80, 25); // bin_step
    put_pubkey(&mut data, TOKEN_X_MINT_OFFSET, &mint_x);
    put_pubkey(&mut data, TOKEN_Y_MINT_OFFSET, &mint_y);
    put_pubkey(&mut data, 152, &reserve_x);
    put_pubkey(&mut data, 184, &reserve_y);

    let pool = decode_lb_pair(&Pubkey::new_unique(), &data).unwrap();
    assert_eq!(pool.mint_a, mint_x);
    assert_eq!(pool.mint_b, mint_y);
    assert_eq!(pool.vault_a, reserve_x);
    assert_eq!(pool.vault_b, reserve_y);
    assert_eq!(pool.active_bin_id, 12);
    assert_eq!(pool.bin_step, 25);
    assert_eq!(pool.parameters.base_factor, 5_000);
    assert_eq!(pool.parameters.min_bin_id, -4_000);
    assert_eq!(pool.parameters.max_bin_id, 4_000);
}

#[test]
fn lb_pair_discriminator_is_checked() {
    let data = vec![0u8; 8 + 896];
    assert!(decode_lb_pair(&Pubkey::new_unique(), &data).is_err());
}

#[test]
fn decode_bin_array_extracts_amounts_and_price() {
    let mut data = vec![0u8; 8 + 48 + MAX_BIN_PER_ARRAY * 144];
    data[..8].copy_from_slice(&[92, 142, 92, 220, 5, 148, 70, 181]);
    // bin #3 : amount_x, amount_y, price
    let base = 8 + 48 + 3 * 144;
    data[base..base + 8].copy_from_slice(&111u64.to_le_bytes());
    data[base + 8..base + 16].copy_from_slice(&222u64.to_le_bytes());
    data[base + 16..base + 32].copy_from_slice(&ONE_X64.to_le_bytes());

    let array = decode_bin_array(0, &data).unwrap();
    assert_eq!(array.bins[3].amount_a, 111);
    assert_eq!(array.bins[3].amount_b, 222);
    assert_eq!(array.bins[3].price_x64, ONE_X64);
    assert_eq!(array.bins[0].amount_a, 0);
}

#[test]
fn bin_array_indexing_handles_negative_ids() {
    assert_eq!(bin_array_index_for(0), 0);
    assert_eq!(bin_array_index_for(69), 0);
    assert_eq!(bin_array_index_for(70), 1);
    assert_eq!(bin_array_index_for(-1), -1);
    assert_eq!(bin_array_index_for(-70), -1);
    assert_eq!(bin_array_index_for(-71), -2);
}

fn static_params(base_factor: u16, variable_fee_control: u32) -> StaticParameters {
    StaticParameters {
        base_factor,
        filter_period: 30,
        decay_period: 600,
        reduction_factor: 5_000,
        variable_fee_control,
        max_volatility_accumulator: 350_000,
        min_bin_id: -4_000,
        max_bin_id: 4_000,
        protocol_share: 0,
        base_fee_power_factor: 0,
        padding: [0; 5],
    }
}

/// Pool synthétique : bin actif 0, bins remplis fournis par l'appelant,
/// prix dérivés du bin_step.
fn synthetic_pool(bin_step: u16, params: StaticParameters, filled: &[(i32, u64, u64)]) -> DlmmPool {
    let mut arrays: BTreeMap<i64, BinArray> = BTreeMap::new();
    for (bin_id, amount_a, amount_b) in filled {
        let index = bin_array_index_for(*bin_id);
        let array = arrays.entry(index).or_insert_with(|| BinArray {
            index,
            bins: [Bin { amount_a: 0, amount_b: 0, price_x64: 0 }; MAX_BIN_PER_ARRAY],
        });
        let slot = bin_id.rem_euclid(MAX_BIN_PER_ARRAY as i32) as usize;
        array.bins[slot] = Bin {
            amount_a: *amount_a,
            amount_b: *amount_b,
            price_x64: dlmm_math::bin_id_to_price_x64(*bin_id, bin_step).unwrap(),
        };
    }

    DlmmPool {
        address: Pubkey::new_unique(),
        mint_a: Pubkey::new_unique(),
        mint_b: Pubkey::new_unique(),
        vault_a: Pubkey::new_unique(),
        vault_b: Pubkey::new_unique(),
        oracle: Pubkey::new_unique(),
        active_bin_id: 0,
        bin_step,
        parameters: params,
        v_parameters: VariableParameters {
            volatility_accumulator: 0,
            volatility_reference: 0,
            index_reference: 0,
            padding: [0; 4],
            last_update_timestamp: 0,
            padding1: [0; 8],
        },
        bin_arrays: Some(arrays),
        last_state_update: 0,
    }
}

#[test]
fn single_bin_swap_applies_base_fee() {
    // base fee = 10_000 * 10 * 10 = 1e6 sur 1e9, soit 0,1 %.
    let params = static_params(10_000, 0);
    let pool = synthetic_pool(10, params, &[(0, 0, 10_000_000)]);
    let mint_a = pool.mint_a;

    let out = pool.get_quote(&mint_a, 1_000_000, 1_000).unwrap();
    assert_eq!(out, 999_000);
}

#[test]
fn traversal_consumes_bins_outward() {
    let params = static_params(10_000, 0);
    // bin 0 n'a que 500_000 de Y ; le reste vient du bin -1.
    let pool = synthetic_pool(10, params, &[(0, 0, 500_000), (-1, 0, 10_000_000)]);
    let mint_a = pool.mint_a;

    let out = pool.get_quote(&mint_a, 1_000_000, 1_000).unwrap();
    assert!(out > 500_000, "traversal did not cross bins: {}", out);
    // jamais plus que l'entrée nette convertie au meilleur prix
    assert!(out < 1_000_000);
}

#[test]
fn exhausted_liquidity_caps_the_output() {
    let params = static_params(10_000, 0);
    let pool = synthetic_pool(10, params, &[(0, 0, 400_000)]);
    let mint_a = pool.mint_a;

    let out = pool.get_quote(&mint_a, 1_000_000, 1_000).unwrap();
    assert_eq!(out, 400_000);
}

#[test]
fn volatility_fee_reduces_output() {
    let calm = synthetic_pool(10, static_params(10_000, 0), &[(0, 0, 500_000), (-1, 0, 10_000_000)]);
    let volatile = {
        let mut pool =
            synthetic_pool(10, static_params(10_000, 50_000), &[(0, 0, 500_000), (-1, 0, 10_000_000)]);
        pool.v_parameters.volatility_accumulator = 100_000;
        pool.v_parameters.volatility_reference = 100_000;
        pool
    };
    let calm_out = calm.get_quote(&calm.mint_a.clone(), 1_000_000, 10).unwrap();
    let volatile_out = volatile.get_quote(&volatile.mint_a.clone(), 1_000_000, 10).unwrap();
    assert!(volatile_out < calm_out, "volatile {} vs calm {}", volatile_out, calm_out);
}

#[test]
fn unhydrated_pool_refuses_to_quote() {
    let mut pool = synthetic_pool(10, static_params(10_000, 0), &[]);
    pool.bin_arrays = None;
    let mint_a = pool.mint_a;
    assert!(pool.get_quote(&mint_a, 1_000, 0).is_err());
}

#[test]
fn reverse_direction_walks_up() {
    let params = static_params(10_000, 0);
    let pool = synthetic_pool(10, params, &[(0, 10_000_000, 0), (1, 10_000_000, 0)]);
    let mint_b = pool.mint_b;

    // Y -> X : prix ~1, sortie ~ entrée moins le fee.
    let out = pool.get_quote(&mint_b, 1_000_000, 1_000).unwrap();
    assert!(out > 990_000 && out < 1_000_000, "out = {}", out);
}
