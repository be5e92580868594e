pub mod filter;
pub mod spectrum;
