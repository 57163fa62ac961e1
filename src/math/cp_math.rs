// src/math/cp_math.rs

use anyhow::{bail, Result};

/// Noyau produit constant (x*y = k), frais prélevés sur l'entrée.
///
/// feeIn  = amount_in * fee_numerator / fee_denominator   (division tronquée)
/// effIn  = amount_in - feeIn
/// out    = reserve_out * effIn / (reserve_in + effIn)
///
/// Les intermédiaires passent en u128 : aucun débordement possible avec des
/// réserves et montants u64.
pub fn get_amount_out(
    amount_in: u64,
    reserve_in: u64,
    reserve_out: u64,
    fee_numerator: u64,
    fee_denominator: u64,
) -> Result<u64> {
    if fee_denominator == 0 {
        bail!("fee denominator is zero");
    }
    if fee_numerator > fee_denominator {
        bail!("fee numerator {} exceeds denominator {}", fee_numerator, fee_denominator);
    }
    if amount_in == 0 || reserve_in == 0 || reserve_out == 0 {
        return Ok(0);
    }

    let amount_in = amount_in as u128;
    let fee_on_input = amount_in * fee_numerator as u128 / fee_denominator as u128;
    let effective_in = amount_in - fee_on_input;

    let numerator = effective_in * reserve_out as u128;
    let denominator = reserve_in as u128 + effective_in;
    Ok((numerator / denominator) as u64)
}

/// Variante CPMM : les frais sont arrondis au plafond, réplique du programme
/// on-chain (trade_fee_rate sur 1_000_000).
pub const CPMM_FEE_DENOMINATOR: u64 = 1_000_000;

pub fn get_amount_out_ceil_fee(
    amount_in: u64,
    reserve_in: u64,
    reserve_out: u64,
    trade_fee_rate: u64,
) -> Result<u64> {
    if trade_fee_rate > CPMM_FEE_DENOMINATOR {
        bail!("trade fee rate {} exceeds denominator {}", trade_fee_rate, CPMM_FEE_DENOMINATOR);
    }
    if amount_in == 0 || reserve_in == 0 || reserve_out == 0 {
        return Ok(0);
    }

    let amount_in = amount_in as u128;
    let trade_fee = (amount_in * trade_fee_rate as u128).div_ceil(CPMM_FEE_DENOMINATOR as u128);
    let effective_in = amount_in - trade_fee;

    let numerator = effective_in * reserve_out as u128;
    let denominator = reserve_in as u128 + effective_in;
    Ok((numerator / denominator) as u64)
}

/// Les soldes bruts des vaults Raydium V4 contiennent du PnL en attente de
/// retrait ; la réserve réellement échangeable est solde - need_take_pnl.
/// L'oublier sur-estime systématiquement les quotes.
pub fn pnl_adjusted_reserves(
    vault_base: u64,
    vault_quote: u64,
    need_take_pnl_base: u64,
    need_take_pnl_quote: u64,
) -> (u64, u64) {
    (
        vault_base.saturating_sub(need_take_pnl_base),
        vault_quote.saturating_sub(need_take_pnl_quote),
    )
}
