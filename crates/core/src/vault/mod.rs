//! Vault command-line client wrapper.

pub mod client;
pub mod parser;

pub use client::VaultClient;
