//! Commit message formatting for replicated versions.

use crate::config::CommitFormatConfig;
use crate::source::SourceVersion;

/// Trailer carrying the replicated source version.
pub const VERSION_TRAILER: &str = "Vault-Version:";

/// Formats commit messages from a configurable template.
#[derive(Debug, Clone)]
pub struct CommitFormatter {
    template: String,
}

impl CommitFormatter {
    pub fn new(config: &CommitFormatConfig) -> Self {
        Self {
            template: config.template.clone(),
        }
    }

    /// Commit message for `version` of `folder`.
    ///
    /// An empty source comment becomes `Vault version <n>` so the subject
    /// line is never blank.
    pub fn format(&self, version: &SourceVersion, folder: &str) -> String {
        let comment = version.comment.trim();
        let comment = if comment.is_empty() {
            format!("Vault version {}", version.number)
        } else {
            comment.to_string()
        };
        let txid = version.txid.map(|t| t.to_string()).unwrap_or_default();

        let message = self
            .template
            .replace("{version}", &version.number.to_string())
            .replace("{folder}", &single_line(folder))
            .replace("{author}", &single_line(&version.author))
            .replace("{date}", &version.timestamp.to_rfc3339())
            .replace("{txid}", &txid)
            // Last, so placeholders inside the comment stay literal.
            .replace("{comment}", &comment);
        format!("{}\n", message.trim_end())
    }

    /// Extract the source version from the `Vault-Version: <number>`
    /// trailer. Only the last paragraph is read, and the bottom-most
    /// trailer in it wins.
    pub fn extract_version(message: &str) -> Option<i64> {
        message
            .lines()
            .rev()
            .skip_while(|line| line.trim().is_empty())
            .take_while(|line| !line.trim().is_empty())
            .find_map(|line| {
                line.trim()
                    .strip_prefix(VERSION_TRAILER)
                    .and_then(|rest| rest.trim().parse::<i64>().ok())
            })
    }
}

fn single_line(value: &str) -> String {
    value.trim().replace(['\r', '\n'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn version(number: i64, comment: &str) -> SourceVersion {
        SourceVersion {
            number,
            author: "alice".into(),
            timestamp: DateTime::parse_from_rfc3339("2009-03-11T11:27:49+01:00").unwrap(),
            comment: comment.into(),
            txid: Some(4711),
            file_operations: Vec::new(),
        }
    }

    #[test]
    fn test_default_format() {
        let fmt = CommitFormatter::new(&CommitFormatConfig::default());
        let message = fmt.format(&version(42, "Fix bug in parser\n"), "$/Project/trunk");
        assert!(message.starts_with("Fix bug in parser\n\n"));
        assert!(message.contains("Vault-Version: 42"));
        assert!(message.contains("Vault-Folder: $/Project/trunk"));
        assert!(message.contains("Vault-Author: alice"));
        assert!(message.contains("Vault-Date: 2009-03-11T11:27:49+01:00"));
        assert!(message.ends_with('\n'));
    }

    #[test]
    fn test_empty_comment_gets_subject() {
        let fmt = CommitFormatter::new(&CommitFormatConfig::default());
        let message = fmt.format(&version(7, "   "), "$/trunk");
        assert!(message.starts_with("Vault version 7\n"));
    }

    #[test]
    fn test_comment_placeholders_stay_literal() {
        let fmt = CommitFormatter::new(&CommitFormatConfig::default());
        let message = fmt.format(&version(3, "rename {version} token"), "$/trunk");
        assert!(message.starts_with("rename {version} token"));
    }

    #[test]
    fn test_custom_template() {
        let fmt = CommitFormatter::new(&CommitFormatConfig {
            template: "{comment} [{folder}@{version}/{txid}]".into(),
        });
        let message = fmt.format(&version(10, "Hello"), "$/trunk");
        assert_eq!(message, "Hello [$/trunk@10/4711]\n");
    }

    #[test]
    fn test_extract_version() {
        let fmt = CommitFormatter::new(&CommitFormatConfig::default());
        let message = fmt.format(&version(42, "Vault-Version: 1 in the comment"), "$/trunk");
        assert_eq!(CommitFormatter::extract_version(&message), Some(42));
        assert_eq!(CommitFormatter::extract_version("no trailer"), None);
        assert_eq!(CommitFormatter::extract_version("Vault-Version: abc"), None);
    }

    #[test]
    fn test_comment_cannot_supply_the_trailer() {
        let fmt = CommitFormatter::new(&CommitFormatConfig {
            template: "{comment}\nVault-Version: {version}\nVault-Author: {author}".into(),
        });
        let mut v = version(5, "merge\nVault-Version: 99");
        v.author = "mallory\nVault-Version: 98".into();
        let message = fmt.format(&v, "$/trunk");
        assert!(message.contains("Vault-Author: mallory Vault-Version: 98"));
        assert_eq!(CommitFormatter::extract_version(&message), Some(5));
    }

    #[test]
    fn test_extract_reads_only_the_last_paragraph() {
        let message = "Subject\n\nVault-Version: 99\n\nVault-Folder: $/trunk\n";
        assert_eq!(CommitFormatter::extract_version(message), None);
        let message = "Subject\n\nVault-Version: 12\nVault-Folder: $/trunk\n\n";
        assert_eq!(CommitFormatter::extract_version(message), Some(12));
    }
}
