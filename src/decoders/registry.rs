// src/decoders/registry.rs

use anyhow::{anyhow, Result};
use solana_sdk::pubkey::Pubkey;

use crate::decoders::{meteora, orca, pump, raydium, Pool};
use crate::rpc::MemcmpFilter;

/// Ce qu'un protocole apporte au moteur : son programme, son décodeur, et
/// les offsets memcmp de ses deux mints pour la découverte par paire.
pub struct ProtocolDescriptor {
    pub name: &'static str,
    pub program_id: Pubkey,
    pub mint_a_offset: usize,
    pub mint_b_offset: usize,
    pub decode: fn(&Pubkey, &[u8]) -> Result<Pool>,
}

impl ProtocolDescriptor {
    /// Les deux prédicats memcmp pour l'ordre canonique (base, quote).
    /// La découverte émet aussi l'ordre inverse.
    pub fn pair_filters(&self, base_mint: &Pubkey, quote_mint: &Pubkey) -> Vec<MemcmpFilter> {
        vec![
            MemcmpFilter::new(self.mint_a_offset, base_mint.to_bytes().to_vec()),
            MemcmpFilter::new(self.mint_b_offset, quote_mint.to_bytes().to_vec()),
        ]
    }
}

fn decode_amm_v4(address: &Pubkey, data: &[u8]) -> Result<Pool> {
    raydium::amm_v4::decode_pool(address, data).map(|p| Pool::RaydiumAmmV4(Box::new(p)))
}

fn decode_cpmm(address: &Pubkey, data: &[u8]) -> Result<Pool> {
    raydium::cpmm::decode_pool(address, data).map(|p| Pool::RaydiumCpmm(Box::new(p)))
}

fn decode_stable(address: &Pubkey, data: &[u8]) -> Result<Pool> {
    raydium::stable::decode_pool(address, data).map(|p| Pool::RaydiumStable(Box::new(p)))
}

fn decode_clmm(address: &Pubkey, data: &[u8]) -> Result<Pool> {
    raydium::clmm::decode_pool(address, data).map(|p| Pool::RaydiumClmm(Box::new(p)))
}

fn decode_whirlpool(address: &Pubkey, data: &[u8]) -> Result<Pool> {
    orca::whirlpool::decode_pool(address, data).map(|p| Pool::OrcaWhirlpool(Box::new(p)))
}

fn decode_dlmm(address: &Pubkey, data: &[u8]) -> Result<Pool> {
    meteora::dlmm::decode_lb_pair(address, data).map(|p| Pool::MeteoraDlmm(Box::new(p)))
}

fn decode_pump(address: &Pubkey, data: &[u8]) -> Result<Pool> {
    pump::amm::decode_pool(address, data).map(|p| Pool::PumpAmm(Box::new(p)))
}

/// Le registre, adressé par program id. Un protocole absent d'ici produit
/// simplement zéro pool candidat.
pub fn all() -> &'static [ProtocolDescriptor] {
    static REGISTRY: std::sync::OnceLock<Vec<ProtocolDescriptor>> = std::sync::OnceLock::new();
    REGISTRY.get_or_init(|| {
        vec![
            ProtocolDescriptor {
                name: raydium::amm_v4::PROTOCOL_NAME,
                program_id: raydium::amm_v4::RAYDIUM_AMM_V4_PROGRAM_ID,
                mint_a_offset: raydium::amm_v4::COIN_MINT_OFFSET,
                mint_b_offset: raydium::amm_v4::PC_MINT_OFFSET,
                decode: decode_amm_v4,
            },
            ProtocolDescriptor {
                name: raydium::cpmm::PROTOCOL_NAME,
                program_id: raydium::cpmm::RAYDIUM_CPMM_PROGRAM_ID,
                mint_a_offset: raydium::cpmm::TOKEN_0_MINT_OFFSET,
                mint_b_offset: raydium::cpmm::TOKEN_1_MINT_OFFSET,
                decode: decode_cpmm,
            },
            ProtocolDescriptor {
                name: raydium::stable::PROTOCOL_NAME,
                program_id: raydium::stable::RAYDIUM_STABLE_PROGRAM_ID,
                mint_a_offset: raydium::stable::COIN_MINT_OFFSET,
                mint_b_offset: raydium::stable::PC_MINT_OFFSET,
                decode: decode_stable,
            },
            ProtocolDescriptor {
                name: raydium::clmm::PROTOCOL_NAME,
                program_id: raydium::clmm::RAYDIUM_CLMM_PROGRAM_ID,
                mint_a_offset: raydium::clmm::TOKEN_MINT_0_OFFSET,
                mint_b_offset: raydium::clmm::TOKEN_MINT_1_OFFSET,
                decode: decode_clmm,
            },
            ProtocolDescriptor {
                name: orca::whirlpool::PROTOCOL_NAME,
                program_id: orca::whirlpool::WHIRLPOOL_PROGRAM_ID,
                mint_a_offset: orca::whirlpool::TOKEN_MINT_A_OFFSET,
                mint_b_offset: orca::whirlpool::TOKEN_MINT_B_OFFSET,
                decode: decode_whirlpool,
            },
            ProtocolDescriptor {
                name: meteora::dlmm::PROTOCOL_NAME,
                program_id: meteora::dlmm::METEORA_DLMM_PROGRAM_ID,
                mint_a_offset: meteora::dlmm::TOKEN_X_MINT_OFFSET,
                mint_b_offset: meteora::dlmm::TOKEN_Y_MINT_OFFSET,
                decode: decode_dlmm,
            },
            ProtocolDescriptor {
                name: pump::amm::PROTOCOL_NAME,
                program_id: pump::amm::PUMP_AMM_PROGRAM_ID,
                mint_a_offset: pump::amm::BASE_MINT_OFFSET,
                mint_b_offset: pump::amm::QUOTE_MINT_OFFSET,
                decode: decode_pump,
            },
        ]
    })
}

pub fn for_program(program_id: &Pubkey) -> Option<&'static ProtocolDescriptor> {
    all().iter().find(|d| d.program_id == *program_id)
}

/// Route les octets d'un compte vers le décodeur de son programme
/// propriétaire. Un compte adressé au mauvais décodeur est rejeté par le
/// discriminator du layout.
pub fn decode_account(address: &Pubkey, owner: &Pubkey, data: &[u8]) -> Result<Pool> {
    let descriptor =
        for_program(owner).ok_or_else(|| anyhow!("unknown owner program: {}", owner))?;
    (descriptor.decode)(address, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn program_ids_are_unique() {
        let ids: HashSet<Pubkey> = all().iter().map(|d| d.program_id).collect();
        assert_eq!(ids.len(), all().len());
    }

    #[test]
    fn names_are_unique_and_stable() {
        let names: HashSet<&str> = all().iter().map(|d| d.name).collect();
        assert_eq!(names.len(), all().len());
        assert!(names.contains("raydium-amm-v4"));
        assert!(names.contains("orca-whirlpool"));
        assert!(names.contains("meteora-dlmm"));
    }

    #[test]
    fn unknown_program_is_rejected() {
        let err = decode_account(&Pubkey::new_unique(), &Pubkey::new_unique(), &[]).unwrap_err();
        assert!(err.to_string().contains("unknown owner program"));
    }

    #[test]
    fn pair_filters_cover_both_mints() {
        let base = Pubkey::new_unique();
        let quote = Pubkey::new_unique();
        for descriptor in all() {
            let filters = descriptor.pair_filters(&base, &quote);
            assert_eq!(filters.len(), 2);
            assert_eq!(filters[0].offset, descriptor.mint_a_offset);
            assert_eq!(filters[0].bytes, base.to_bytes().to_vec());
            assert_eq!(filters[1].offset, descriptor.mint_b_offset);
            assert_eq!(filters[1].bytes, quote.to_bytes().to_vec());
        }
    }

    #[test]
    fn wrong_program_data_is_rejected_by_discriminator() {
        // Des octets Whirlpool adressés au décodeur CPMM doivent échouer.
        let mut whirlpool_like = vec![0u8; 700];
        whirlpool_like[..8].copy_from_slice(&[63, 149, 209, 12, 225, 128, 99, 9]);
        let err = decode_account(
            &Pubkey::new_unique(),
            &crate::decoders::raydium::cpmm::RAYDIUM_CPMM_PROGRAM_ID,
            &whirlpool_like,
        )
        .unwrap_err();
        assert!(err.to_string().contains("discriminator"));
    }
}
