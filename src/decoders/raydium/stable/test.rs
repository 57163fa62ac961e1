// src/decoders/raydium/stable/test.rs

use solana_sdk::pubkey::Pubkey;

use super::*;
use crate::decoders::PoolOperations;

const LAYOUT_LEN: usize = 1_232;

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

fn put_pubkey(buf: &mut [u8], offset: usize, value: &Pubkey) {
    buf[offset..offset + 32].copy_from_slice(value.as_ref());
}

struct Fixture {
    data: Vec<u8>,
    mint_a: Pubkey,
    mint_b: Pubkey,
    model: Pubkey,
}

fn fixture() -> Fixture {
    let mint_a = Pubkey::new_unique();
    let mint_b = Pubkey::new_unique();
    let vault_a = Pubkey::new_unique();
    let vault_b = Pubkey::new_unique();
    let model = Pubkey::new_unique();

    let mut data = vec![0u8; LAYOUT_LEN];
    put_u64(&mut data, 8, 1); // status
    // fees.trade_fee_numerator / denominator (fees à l'offset 160)
    put_u64(&mut data, 176, 4);
    put_u64(&mut data, 184, 10_000);
    put_pubkey(&mut data, 368, &vault_a);
    put_pubkey(&mut data, 400, &vault_b);
    put_pubkey(&mut data, COIN_MINT_OFFSET, &mint_a);
    put_pubkey(&mut data, PC_MINT_OFFSET, &mint_b);
    put_pubkey(&mut data, 528, &model); // model_data_key après lp_mint

    Fixture { data, mint_a, mint_b, model }
}

#[test]
fn decode_reads_fees_and_model_account() {
    let fx = fixture();
    let pool = decode_pool(&Pubkey::new_unique(), &fx.data).unwrap();
    assert_eq!(pool.mint_a, fx.mint_a);
    assert_eq!(pool.mint_b, fx.mint_b);
    assert_eq!(pool.model_data_account, fx.model);
    assert_eq!(pool.fee_numerator, 4);
    assert_eq!(pool.fee_denominator, 10_000);
    assert_eq!(pool.amp, 0);
}

#[test]
fn short_data_reports_lengths() {
    let err = decode_pool(&Pubkey::new_unique(), &[0u8; 64]).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("got 64"), "{}", msg);
}

#[test]
fn model_amp_is_first_u64() {
    let mut data = vec![0u8; 32];
    data[0..8].copy_from_slice(&100u64.to_le_bytes());
    assert_eq!(decode_model_amp(&data).unwrap(), 100);
    assert!(decode_model_amp(&[0u8; 4]).is_err());
}

#[test]
fn balanced_stable_pool_beats_constant_product() {
    let fx = fixture();
    let mut pool = decode_pool(&Pubkey::new_unique(), &fx.data).unwrap();
    pool.amp = 100;
    pool.reserve_a = 1_000_000_000;
    pool.reserve_b = 1_000_000_000;
    pool.reserves_fresh = true;

    let stable_out = pool.get_quote(&fx.mint_a, 10_000_000, 0).unwrap();
    let cp_out = crate::math::cp_math::get_amount_out(
        10_000_000,
        1_000_000_000,
        1_000_000_000,
        4,
        10_000,
    )
    .unwrap();
    assert!(stable_out > cp_out, "stable {} <= cp {}", stable_out, cp_out);
}

#[test]
fn unhydrated_amp_never_fresh() {
    let fx = fixture();
    let pool = decode_pool(&Pubkey::new_unique(), &fx.data).unwrap();
    assert!(!pool.is_fresh(0));
}
