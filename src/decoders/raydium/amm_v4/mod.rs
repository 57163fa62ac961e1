// src/decoders/raydium/amm_v4/mod.rs

mod pool;
pub use pool::*;
