//! Vault user to Git identity translation.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::mapping_file::{self, AuthorEntry};
use crate::errors::IdentityError;

/// Name used when the source reports no user for a version.
const UNKNOWN_AUTHOR: &str = "unknown";

/// A Git author/committer identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

/// Translates Vault user names into Git identities.
///
/// Every user resolves to some identity: explicit entries from the authors
/// file win, everybody else becomes `user@domain`.
#[derive(Debug, Clone)]
pub struct AuthorMapper {
    entries: HashMap<String, AuthorEntry>,
    email_domain: String,
}

impl AuthorMapper {
    /// Create a mapper, loading `authors_file` when given.
    pub fn new(authors_file: Option<&Path>, email_domain: &str) -> Result<Self, IdentityError> {
        let entries = match authors_file {
            Some(path) => mapping_file::load(path)?,
            None => HashMap::new(),
        };
        Ok(Self::from_entries(entries, email_domain))
    }

    pub fn from_entries(entries: HashMap<String, AuthorEntry>, email_domain: &str) -> Self {
        Self {
            entries,
            email_domain: email_domain.trim_start_matches('@').to_string(),
        }
    }

    /// Git identity for a Vault user.
    pub fn identity(&self, vault_user: &str) -> GitIdentity {
        let user = vault_user.trim();
        let user = if user.is_empty() { UNKNOWN_AUTHOR } else { user };

        if let Some(entry) = self.entries.get(user) {
            debug!(user, "found in authors file");
            return GitIdentity {
                name: entry.name.clone(),
                email: entry.email.clone(),
            };
        }

        let identity = GitIdentity {
            name: user.to_string(),
            email: format!("{}@{}", email_local_part(user), self.email_domain),
        };
        debug!(user, email = %identity.email, "using fallback identity");
        identity
    }
}

/// Email local part for a user name: drops a `DOMAIN\` prefix, lower-cases
/// and joins whitespace-separated words with dots.
fn email_local_part(user: &str) -> String {
    let bare = user.rsplit('\\').next().unwrap_or(user);
    bare.split_whitespace()
        .collect::<Vec<_>>()
        .join(".")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper() -> AuthorMapper {
        let mut entries = HashMap::new();
        entries.insert(
            "jdoe".to_string(),
            AuthorEntry {
                name: "John Doe".into(),
                email: "john.doe@corp.example.com".into(),
            },
        );
        AuthorMapper::from_entries(entries, "example.com")
    }

    #[test]
    fn test_identity_from_authors_file_entry() {
        let identity = mapper().identity("jdoe");
        assert_eq!(identity.name, "John Doe");
        assert_eq!(identity.email, "john.doe@corp.example.com");
    }

    #[test]
    fn test_identity_fallback() {
        let identity = mapper().identity("alice");
        assert_eq!(identity.name, "alice");
        assert_eq!(identity.email, "alice@example.com");
    }

    #[test]
    fn test_identity_fallback_normalizes_local_part() {
        let identity = mapper().identity("CORP\\Mary Ann");
        assert_eq!(identity.name, "CORP\\Mary Ann");
        assert_eq!(identity.email, "mary.ann@example.com");
    }

    #[test]
    fn test_identity_empty_user() {
        let identity = mapper().identity("  ");
        assert_eq!(identity.name, "unknown");
        assert_eq!(identity.email, "unknown@example.com");
    }

    #[test]
    fn test_domain_with_leading_at() {
        let mapper = AuthorMapper::from_entries(HashMap::new(), "@example.org");
        assert_eq!(mapper.identity("bob").email, "bob@example.org");
    }

    #[test]
    fn test_new_with_authors_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authors.toml");
        std::fs::write(
            &path,
            "[authors]\nbob = { name = \"Bob Builder\", email = \"bob@build.example\" }\n",
        )
        .unwrap();
        let mapper = AuthorMapper::new(Some(&path), "example.com").unwrap();
        assert_eq!(mapper.identity("bob").name, "Bob Builder");
        assert!(AuthorMapper::new(Some(Path::new("/nonexistent.toml")), "x").is_err());
    }
}
