// src/decoders/raydium/clmm/mod.rs

mod pool;
pub use pool::*;
