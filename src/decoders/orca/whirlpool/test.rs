// src/decoders/orca/whirlpool/test.rs

use solana_sdk::pubkey::Pubkey;

use super::*;
use crate::decoders::PoolOperations;

const SQRT_2_X64: u128 = 26_087_635_650_665_564_424;

fn put_pubkey(buf: &mut [u8], offset: usize, value: &Pubkey) {
    buf[offset..offset + 32].copy_from_slice(value.as_ref());
}

fn put_u128(buf: &mut [u8], offset: usize, value: u128) {
    buf[offset..offset + 16].copy_from_slice(&value.to_le_bytes());
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

struct Fixture {
    data: Vec<u8>,
    mint_a: Pubkey,
    mint_b: Pubkey,
}

fn fixture(liquidity: u128, sqrt_price: u128, fee_rate: u16) -> Fixture {
    let mint_a = Pubkey::new_unique();
    let mint_b = Pubkey::new_unique();

    let mut data = vec![0u8; 653];
    data[..8].copy_from_slice(&[63, 149, 209, 12, 225, 128, 99, 9]);
    put_pubkey(&mut data, 8, &Pubkey::new_unique()); // config
    put_u16(&mut data, 41, 64); // tick_spacing
    put_u16(&mut data, 45, fee_rate);
    put_u128(&mut data, 49, liquidity);
    put_u128(&mut data, 65, sqrt_price);
    put_pubkey(&mut data, TOKEN_MINT_A_OFFSET, &mint_a);
    put_pubkey(&mut data, 133, &Pubkey::new_unique()); // vault A
    put_pubkey(&mut data, TOKEN_MINT_B_OFFSET, &mint_b);
    put_pubkey(&mut data, 213, &Pubkey::new_unique()); // vault B

    Fixture { data, mint_a, mint_b }
}

#[test]
fn decode_reads_documented_offsets() {
    let fx = fixture(1_000_000_000_000, SQRT_2_X64, 3_000);
    let pool = decode_pool(&Pubkey::new_unique(), &fx.data).unwrap();
    assert_eq!(pool.mint_a, fx.mint_a);
    assert_eq!(pool.mint_b, fx.mint_b);
    assert_eq!(pool.liquidity, 1_000_000_000_000);
    assert_eq!(pool.sqrt_price, SQRT_2_X64);
    assert_eq!(pool.fee_rate, 3_000);
    assert_eq!(pool.tick_spacing, 64);
}

#[test]
fn wrong_discriminator_is_rejected() {
    let mut fx = fixture(1, SQRT_2_X64, 0);
    fx.data[0] = 0;
    assert!(decode_pool(&Pubkey::new_unique(), &fx.data).is_err());
}

#[test]
fn short_data_reports_lengths() {
    let mut data = vec![0u8; 100];
    data[..8].copy_from_slice(&[63, 149, 209, 12, 225, 128, 99, 9]);
    let err = decode_pool(&Pubkey::new_unique(), &data).unwrap_err();
    assert!(err.to_string().contains("got 92"), "{}", err);
}

#[test]
fn direction_symmetry_within_bound() {
    let fx = fixture(1_000_000_000_000, SQRT_2_X64, 3_000);
    let pool = decode_pool(&Pubkey::new_unique(), &fx.data).unwrap();

    // A -> B au prix 2 : 1e9 donne ~2e9 moins 30 bps.
    let out_ab = pool.get_quote(&fx.mint_a, 1_000_000_000, 0).unwrap();
    let expected_ab = 1_994_000_000f64;
    assert!((out_ab as f64 - expected_ab).abs() / expected_ab <= 1e-4, "out = {}", out_ab);

    // B -> A : 2e9 redonnent ~1e9 moins 30 bps.
    let out_ba = pool.get_quote(&fx.mint_b, 2_000_000_000, 0).unwrap();
    let expected_ba = 997_000_000f64;
    assert!((out_ba as f64 - expected_ba).abs() / expected_ba <= 1e-4, "out = {}", out_ba);
}

#[test]
fn zero_liquidity_is_an_error() {
    let fx = fixture(0, SQRT_2_X64, 3_000);
    let pool = decode_pool(&Pubkey::new_unique(), &fx.data).unwrap();
    assert!(pool.get_quote(&fx.mint_a, 1_000, 0).is_err());
}

#[test]
fn watches_pool_and_both_vaults() {
    let fx = fixture(1, SQRT_2_X64, 0);
    let pool = decode_pool(&Pubkey::new_unique(), &fx.data).unwrap();
    let watched = pool.accounts_to_watch();
    assert_eq!(watched.len(), 3);
    assert_eq!(watched[0], pool.address);
    assert_eq!(watched[1], pool.vault_a);
    assert_eq!(watched[2], pool.vault_b);
}
