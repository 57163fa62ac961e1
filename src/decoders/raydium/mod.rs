// src/decoders/raydium/mod.rs

pub mod amm_v4;
pub mod clmm;
pub mod cpmm;
pub mod stable;
