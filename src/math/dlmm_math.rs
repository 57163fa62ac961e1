// src/math/dlmm_math.rs

use anyhow::{anyhow, bail, Result};
use ruint::aliases::U256;

/// Précision des fee rates DLMM (1e9 = 100 %).
pub const FEE_PRECISION: u128 = 1_000_000_000;

/// Échelle des prix de bin : Q64.64.
const SCALE_OFFSET: u32 = 64;
const BASIS_POINT_MAX: u128 = 10_000;

/// Conversion montant -> montant à travers le prix Q64.64 d'un bin.
/// swap_for_y : on donne du X, on reçoit du Y (out = in * price).
pub fn get_amount_out(amount_in: u64, price_x64: u128, swap_for_y: bool) -> Result<u64> {
    let amount_in = U256::from(amount_in);
    let price = U256::from(price_x64);

    let amount_out: U256 = if swap_for_y {
        (amount_in * price) >> SCALE_OFFSET
    } else {
        if price.is_zero() {
            return Ok(0);
        }
        (amount_in << SCALE_OFFSET) / price
    };
    Ok(amount_out.try_into().unwrap_or(0))
}

/// Inverse : montant d'entrée net requis pour produire `amount_out`.
pub fn get_amount_in(amount_out: u64, price_x64: u128, swap_for_y: bool) -> Result<u64> {
    let amount_out = U256::from(amount_out);
    let price = U256::from(price_x64);

    let amount_in: U256 = if swap_for_y {
        if price.is_zero() {
            return Ok(u64::MAX);
        }
        (amount_out << SCALE_OFFSET) / price
    } else {
        (amount_out * price) >> SCALE_OFFSET
    };
    Ok(amount_in.try_into().unwrap_or(u64::MAX))
}

/// Prix d'un bin : (1 + bin_step/10_000)^bin_id en Q64.64, exponentiation
/// rapide ; les exposants négatifs passent par l'inverse.
pub fn bin_id_to_price_x64(bin_id: i32, bin_step: u16) -> Result<u128> {
    let base: U256 = (U256::from(BASIS_POINT_MAX + bin_step as u128) << SCALE_OFFSET)
        / U256::from(BASIS_POINT_MAX);

    let mut result: U256 = U256::from(1u128) << SCALE_OFFSET;
    let mut factor = base;
    let mut exponent = bin_id.unsigned_abs();

    while exponent > 0 {
        if exponent & 1 == 1 {
            result = (result * factor) >> SCALE_OFFSET;
        }
        factor = (factor * factor) >> SCALE_OFFSET;
        exponent >>= 1;
        if result.is_zero() {
            bail!("bin price underflow for bin {}", bin_id);
        }
    }

    if bin_id < 0 {
        let one_x128: U256 = U256::from(1u128) << (2 * SCALE_OFFSET);
        result = one_x128 / result;
    }

    result
        .try_into()
        .map_err(|_| anyhow!("bin price overflows u128 for bin {}", bin_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_X64: u128 = 1 << 64;

    #[test]
    fn bin_zero_is_parity() {
        assert_eq!(bin_id_to_price_x64(0, 25).unwrap(), ONE_X64);
    }

    #[test]
    fn one_step_up_matches_ratio() {
        // bin 1 avec step 25 : prix = 1.0025 en Q64.64.
        let price = bin_id_to_price_x64(1, 25).unwrap();
        let expected = (ONE_X64 / 10_000) * 10_025;
        let diff = price.abs_diff(expected);
        assert!(diff <= 10_000, "diff = {}", diff);
    }

    #[test]
    fn negative_bin_is_reciprocal() {
        let up = bin_id_to_price_x64(40, 25).unwrap();
        let down = bin_id_to_price_x64(-40, 25).unwrap();
        let product: U256 = (U256::from(up) * U256::from(down)) >> 64;
        let product: u128 = product.try_into().unwrap();
        let rel = product.abs_diff(ONE_X64) as f64 / ONE_X64 as f64;
        assert!(rel < 1e-9, "product = {}", product);
    }

    #[test]
    fn price_is_monotone_in_bin_id() {
        let step = 10u16;
        let mut last = bin_id_to_price_x64(-3, step).unwrap();
        for id in -2..=3 {
            let p = bin_id_to_price_x64(id, step).unwrap();
            assert!(p > last);
            last = p;
        }
    }

    #[test]
    fn amount_conversion_round_trips() {
        let price = bin_id_to_price_x64(120, 25).unwrap();
        let out = get_amount_out(1_000_000_000, price, true).unwrap();
        let back = get_amount_in(out, price, true).unwrap();
        // la troncature coûte au plus quelques unités
        assert!(back.abs_diff(1_000_000_000) <= 2, "back = {}", back);
    }

    #[test]
    fn parity_price_is_identity() {
        assert_eq!(get_amount_out(12_345, ONE_X64, true).unwrap(), 12_345);
        assert_eq!(get_amount_out(12_345, ONE_X64, false).unwrap(), 12_345);
    }
}
