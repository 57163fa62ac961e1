// src/math/clmm_math.rs

use anyhow::{bail, Result};
use uint::construct_uint;

construct_uint! { pub struct U256(4); }

/// Les fee rates CLMM sont en centièmes de point de base.
pub const FEE_RATE_DENOMINATOR: u64 = 1_000_000;

/// Approximation d'un swap concentré sur la plage active courante.
///
/// Le prix spot vaut (sqrtPriceX64)^2 / 2^128 (B par A). Après frais :
///   A -> B : out = effIn * Q^2 / 2^128
///   B -> A : out = effIn * 2^128 / Q^2
///
/// La traversée de ticks est volontairement hors périmètre : au-delà de la
/// liquidité active le résultat s'écarte de la réalité on-chain.
pub fn get_amount_out(
    amount_in: u64,
    sqrt_price_x64: u128,
    liquidity: u128,
    fee_rate: u32,
    a_to_b: bool,
) -> Result<u64> {
    if liquidity == 0 {
        bail!("pool has zero liquidity");
    }
    if sqrt_price_x64 == 0 {
        bail!("sqrt price is zero");
    }
    if fee_rate as u64 >= FEE_RATE_DENOMINATOR {
        bail!("fee rate {} out of range", fee_rate);
    }
    if amount_in == 0 {
        return Ok(0);
    }

    let fee = amount_in as u128 * fee_rate as u128 / FEE_RATE_DENOMINATOR as u128;
    let effective_in = amount_in as u128 - fee;

    let price_q128 = U256::from(sqrt_price_x64) * U256::from(sqrt_price_x64);
    let amount_out = if a_to_b {
        (U256::from(effective_in) * price_q128) >> 128
    } else {
        (U256::from(effective_in) << 128) / price_q128
    };

    if amount_out > U256::from(u64::MAX) {
        bail!("amount out overflows u64");
    }
    Ok(amount_out.as_u64())
}
