//! Vault folder to Git branch mappings.
//!
//! A mapping string has the form `folder~branch;folder~branch`. A segment
//! without `~` maps its folder onto [`DEFAULT_BRANCH`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;

/// Branch used for segments that name only a folder.
pub const DEFAULT_BRANCH: &str = "master";

/// One Vault folder replicated onto one Git branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMapping {
    pub source_folder: String,
    pub target_branch: String,
}

impl BranchMapping {
    pub fn new(source_folder: impl Into<String>, target_branch: impl Into<String>) -> Self {
        Self {
            source_folder: source_folder.into(),
            target_branch: target_branch.into(),
        }
    }
}

/// Parse a mapping string into an ordered mapping table.
///
/// Target branch names must be unique and folders non-empty.
pub fn parse_mappings(input: &str) -> Result<Vec<BranchMapping>, ConfigError> {
    let mut mappings = Vec::new();
    let mut seen = HashSet::new();

    for segment in input.split(';') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        let mut parts = segment.split('~');
        let folder = parts.next().unwrap_or_default().trim();
        let branch = parts.next().map(str::trim).unwrap_or(DEFAULT_BRANCH);

        if parts.next().is_some() {
            return Err(ConfigError::InvalidMapping {
                segment: segment.to_string(),
                detail: "expected at most one '~' separator".into(),
            });
        }
        if folder.is_empty() {
            return Err(ConfigError::InvalidMapping {
                segment: segment.to_string(),
                detail: "source folder must not be empty".into(),
            });
        }
        if branch.is_empty() {
            return Err(ConfigError::InvalidMapping {
                segment: segment.to_string(),
                detail: "target branch must not be empty".into(),
            });
        }
        if !seen.insert(branch.to_string()) {
            return Err(ConfigError::DuplicateBranch(branch.to_string()));
        }

        mappings.push(BranchMapping::new(folder, branch));
    }

    if mappings.is_empty() {
        return Err(ConfigError::InvalidMapping {
            segment: input.to_string(),
            detail: "no folder mappings given".into(),
        });
    }

    debug!(count = mappings.len(), "parsed branch mappings");
    Ok(mappings)
}

/// Build the ordered worklist for a run.
///
/// An empty `filter` selects every mapping. The table order is preserved
/// regardless of the order of the filter, and a filter name that is not in
/// the table is an error.
pub fn resolve_worklist(
    table: &[BranchMapping],
    filter: &[String],
) -> Result<Vec<BranchMapping>, ConfigError> {
    if filter.is_empty() {
        return Ok(table.to_vec());
    }

    for name in filter {
        if !table.iter().any(|m| &m.target_branch == name) {
            return Err(ConfigError::UnknownBranch(name.clone()));
        }
    }

    Ok(table
        .iter()
        .filter(|m| filter.contains(&m.target_branch))
        .cloned()
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pairs_in_order() {
        let table = parse_mappings("src/app~master;src/lib~dev").unwrap();
        assert_eq!(
            table,
            vec![
                BranchMapping::new("src/app", "master"),
                BranchMapping::new("src/lib", "dev"),
            ]
        );
    }

    #[test]
    fn test_bare_folder_maps_to_default_branch() {
        let table = parse_mappings("$/Project/trunk").unwrap();
        assert_eq!(table, vec![BranchMapping::new("$/Project/trunk", DEFAULT_BRANCH)]);

        let table = parse_mappings("$/a;$/b~dev").unwrap();
        assert_eq!(table[0].target_branch, "master");
        assert_eq!(table[1].target_branch, "dev");
    }

    #[test]
    fn test_whitespace_and_trailing_separator() {
        let table = parse_mappings(" $/a ~ master ; $/b~dev ;").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].source_folder, "$/a");
        assert_eq!(table[0].target_branch, "master");
    }

    #[test]
    fn test_rejects_bad_segments() {
        assert!(matches!(
            parse_mappings("~master"),
            Err(ConfigError::InvalidMapping { .. })
        ));
        assert!(matches!(
            parse_mappings("$/a~"),
            Err(ConfigError::InvalidMapping { .. })
        ));
        assert!(matches!(
            parse_mappings("$/a~b~c"),
            Err(ConfigError::InvalidMapping { .. })
        ));
        assert!(matches!(parse_mappings(" ; "), Err(ConfigError::InvalidMapping { .. })));
    }

    #[test]
    fn test_rejects_duplicate_branch() {
        let result = parse_mappings("$/a~dev;$/b~dev");
        assert!(matches!(result, Err(ConfigError::DuplicateBranch(ref b)) if b == "dev"));

        // Two bare folders both land on master.
        assert!(matches!(
            parse_mappings("$/a;$/b"),
            Err(ConfigError::DuplicateBranch(_))
        ));
    }

    #[test]
    fn test_worklist_empty_filter_selects_all() {
        let table = parse_mappings("$/a~master;$/b~dev").unwrap();
        assert_eq!(resolve_worklist(&table, &[]).unwrap(), table);
    }

    #[test]
    fn test_worklist_keeps_table_order() {
        let table = parse_mappings("$/a~master;$/b~dev;$/c~release").unwrap();
        let filter = vec!["release".to_string(), "master".to_string()];
        let worklist = resolve_worklist(&table, &filter).unwrap();
        let branches: Vec<_> = worklist.iter().map(|m| m.target_branch.as_str()).collect();
        assert_eq!(branches, vec!["master", "release"]);
    }

    #[test]
    fn test_worklist_unknown_branch_is_error() {
        let table = parse_mappings("$/a~master").unwrap();
        let result = resolve_worklist(&table, &["dev".to_string()]);
        assert!(matches!(result, Err(ConfigError::UnknownBranch(ref b)) if b == "dev"));
    }
}
