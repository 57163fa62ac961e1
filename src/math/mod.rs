// src/math/mod.rs

// Les noyaux de pricing. Tout est en arithmétique entière : aucun flottant
// ne doit influencer un montant de sortie.
pub mod clmm_math;
pub mod cp_math;
pub mod dlmm_math;
pub mod stable_math;
