// src/decoders/pump/amm/test.rs

use solana_sdk::pubkey::Pubkey;

use super::*;
use crate::decoders::PoolOperations;

fn put_pubkey(buf: &mut [u8], offset: usize, value: &Pubkey) {
    buf[offset..offset + 32].copy_from_slice(value.as_ref());
}

struct Fixture {
    data: Vec<u8>,
    mint_a: Pubkey,
    mint_b: Pubkey,
    vault_a: Pubkey,
    vault_b: Pubkey,
}

fn fixture(with_coin_creator: bool) -> Fixture {
    let mint_a = Pubkey::new_unique();
    let mint_b = Pubkey::new_unique();
    let vault_a = Pubkey::new_unique();
    let vault_b = Pubkey::new_unique();

    let len = if with_coin_creator { 243 } else { 211 };
    let mut data = vec![0u8; len];
    data[..8].copy_from_slice(&[241, 154, 109, 4, 17, 177, 109, 188]);
    put_pubkey(&mut data, BASE_MINT_OFFSET, &mint_a);
    put_pubkey(&mut data, QUOTE_MINT_OFFSET, &mint_b);
    put_pubkey(&mut data, 139, &vault_a);
    put_pubkey(&mut data, 171, &vault_b);
    if with_coin_creator {
        put_pubkey(&mut data, 211, &Pubkey::new_unique());
    }

    Fixture { data, mint_a, mint_b, vault_a, vault_b }
}

fn token_account_bytes(amount: u64) -> Vec<u8> {
    let mut data = vec![0u8; 165];
    data[64..72].copy_from_slice(&amount.to_le_bytes());
    data
}

#[test]
fn decode_short_layout_without_coin_creator() {
    let fx = fixture(false);
    let pool = decode_pool(&Pubkey::new_unique(), &fx.data).unwrap();
    assert_eq!(pool.mint_a, fx.mint_a);
    assert_eq!(pool.mint_b, fx.mint_b);
    assert_eq!(pool.vault_a, fx.vault_a);
    assert_eq!(pool.vault_b, fx.vault_b);
    assert_eq!(pool.coin_creator, Pubkey::default());
}

#[test]
fn decode_extended_layout_with_coin_creator() {
    let fx = fixture(true);
    let pool = decode_pool(&Pubkey::new_unique(), &fx.data).unwrap();
    assert_ne!(pool.coin_creator, Pubkey::default());
}

#[test]
fn wrong_discriminator_is_rejected() {
    let mut fx = fixture(false);
    fx.data[7] ^= 0xFF;
    assert!(decode_pool(&Pubkey::new_unique(), &fx.data).is_err());
}

#[test]
fn quote_is_constant_product_at_25_bps() {
    let fx = fixture(false);
    let mut pool = decode_pool(&Pubkey::new_unique(), &fx.data).unwrap();
    pool.reserve_a = 1_000_000;
    pool.reserve_b = 2_000_000;
    pool.reserves_fresh = true;

    assert_eq!(pool.get_quote(&fx.mint_a, 10_000, 0).unwrap(), 19_752);
}

#[test]
fn vault_update_marks_reserves_fresh() {
    let fx = fixture(false);
    let mut pool = decode_pool(&Pubkey::new_unique(), &fx.data).unwrap();
    assert!(!pool.is_fresh(0));

    pool.apply_account_update(&fx.vault_a.clone(), &token_account_bytes(5_000), 100).unwrap();
    pool.apply_account_update(&fx.vault_b.clone(), &token_account_bytes(9_000), 100).unwrap();
    assert!(pool.is_fresh(103));
    assert_eq!(pool.reserve_a, 5_000);
    assert_eq!(pool.reserve_b, 9_000);
}

#[test]
fn liquidity_proxy_is_opposite_side() {
    let fx = fixture(false);
    let mut pool = decode_pool(&Pubkey::new_unique(), &fx.data).unwrap();
    pool.reserve_a = 11;
    pool.reserve_b = 22;
    assert_eq!(pool.opposite_reserve(&fx.mint_a), Some(22));
    assert_eq!(pool.opposite_reserve(&fx.mint_b), Some(11));
}
