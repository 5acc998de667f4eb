//! Author translation from Vault user names to Git identities.
//!
//! The lookup order is:
//! 1. Explicit TOML authors file
//! 2. Fallback: the user name at the configured email domain

pub mod mapper;
pub mod mapping_file;

pub use mapper::{AuthorMapper, GitIdentity};
