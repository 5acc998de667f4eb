//! TOML authors file reader.
//!
//! The file format:
//!
//! ```toml
//! [authors]
//! jdoe = { name = "John Doe", email = "jdoe@example.com" }
//! alice = { name = "Alice Smith", email = "alice@example.com" }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::IdentityError;

/// A single author entry in the authors file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorEntry {
    /// Git display name.
    pub name: String,
    /// Git email address.
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct MappingFileData {
    /// Vault user name -> AuthorEntry.
    #[serde(default)]
    authors: HashMap<String, AuthorEntry>,
}

/// Load the authors file and return the author map.
pub fn load<P: AsRef<Path>>(path: P) -> Result<HashMap<String, AuthorEntry>, IdentityError> {
    let path = path.as_ref();
    info!(path = %path.display(), "loading authors file");

    if !path.exists() {
        return Err(IdentityError::MappingFileError {
            path: path.display().to_string(),
            detail: "file not found".into(),
        });
    }

    let contents = std::fs::read_to_string(path)?;
    let data: MappingFileData =
        toml::from_str(&contents).map_err(|e| IdentityError::ParseError(e.to_string()))?;

    debug!(count = data.authors.len(), "loaded author mappings");
    Ok(data.authors)
}
