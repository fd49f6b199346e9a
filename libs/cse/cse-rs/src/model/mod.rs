pub mod account;
pub mod api;
pub mod compression_service;
pub mod core_config;
pub mod crypto;
pub mod errors;
pub mod metadata;
pub mod pubkey;
pub mod symkey;
