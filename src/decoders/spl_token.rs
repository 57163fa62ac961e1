// src/decoders/spl_token.rs

use anyhow::{bail, Result};

/// Le champ `amount` d'un compte de token SPL vit aux octets 64..72.
const AMOUNT_OFFSET: usize = 64;
const MIN_LEN: usize = AMOUNT_OFFSET + 8;

/// Extrait le solde d'un compte de token SPL à partir des octets bruts.
pub fn decode_token_amount(data: &[u8]) -> Result<u64> {
    if data.len() < MIN_LEN {
        bail!(
            "token account data too short: expected at least {} bytes, got {}",
            MIN_LEN,
            data.len()
        );
    }
    let bytes: [u8; 8] = data[AMOUNT_OFFSET..MIN_LEN].try_into()?;
    Ok(u64::from_le_bytes(bytes))
}
