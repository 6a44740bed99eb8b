pub mod config;
pub mod constants;
pub mod det_rng;
pub mod hex;
