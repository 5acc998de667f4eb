//! Parsers for Vault command-line client XML output.
//!
//! Every command wraps its payload in `<vault> ... <result success="..."/>
//! </vault>`. History entries are self-closing `<item .../>` elements whose
//! data lives entirely in attributes.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, TimeZone};
use tracing::{debug, warn};

use crate::errors::VaultError;
use crate::source::{ChangeKind, FileOperation, SourceLabel, SourceVersion};

/// One `<item>` of `vault history` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryItem {
    pub txid: Option<i64>,
    pub version: Option<i64>,
    pub name: String,
    pub type_name: String,
    pub action: String,
    pub user: String,
    pub comment: String,
}

impl HistoryItem {
    fn is_label(&self) -> bool {
        self.type_name.eq_ignore_ascii_case("label")
            || self.action.to_ascii_lowercase().starts_with("label")
    }
}

/// Check the `<result>` element of a Vault response.
pub fn parse_result(xml: &str) -> Result<(), VaultError> {
    let Some(fragment) = element_fragments(xml, "result").into_iter().next() else {
        return Err(VaultError::XmlParseError("missing <result> element".into()));
    };
    let success = attr(fragment, "success").unwrap_or_default();
    match success.to_ascii_lowercase().as_str() {
        "yes" | "true" => Ok(()),
        _ => {
            let detail = extract_tag_content(xml, "error")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "no error detail".into());
            if detail.to_ascii_lowercase().contains("does not exist") {
                Err(VaultError::FolderNotFound(detail))
            } else {
                Err(VaultError::Rejected(detail))
            }
        }
    }
}

/// Parse `vault versionhistory` output into ascending source versions.
///
/// An item without a parseable version number or date fails the whole
/// parse. File operations are left empty; see [`attach_file_operations`].
pub fn parse_version_history(xml: &str) -> Result<Vec<SourceVersion>, VaultError> {
    debug!("parsing vault versionhistory XML ({} bytes)", xml.len());
    let mut versions = Vec::new();

    for fragment in element_fragments(xml, "item") {
        let raw_version = attr(fragment, "version").unwrap_or_default();
        let Ok(number) = raw_version.parse::<i64>() else {
            return Err(VaultError::XmlParseError(format!(
                "history item with invalid version '{}'",
                raw_version
            )));
        };
        let raw_date = attr(fragment, "date").unwrap_or_default();
        let Some(timestamp) = parse_vault_date(&raw_date) else {
            return Err(VaultError::XmlParseError(format!(
                "history item {} with invalid date '{}'",
                number, raw_date
            )));
        };
        versions.push(SourceVersion {
            number,
            author: attr(fragment, "user").unwrap_or_default(),
            timestamp,
            comment: attr(fragment, "comment").unwrap_or_default(),
            txid: attr(fragment, "txid").and_then(|v| v.parse().ok()),
            file_operations: Vec::new(),
        });
    }

    versions.sort_by_key(|v| v.number);
    versions.dedup_by_key(|v| v.number);
    debug!(count = versions.len(), "parsed vault versions");
    Ok(versions)
}

/// Parse `vault history` output into raw history items.
pub fn parse_history(xml: &str) -> Vec<HistoryItem> {
    element_fragments(xml, "item")
        .into_iter()
        .map(|fragment| HistoryItem {
            txid: attr(fragment, "txid").and_then(|v| v.parse().ok()),
            version: attr(fragment, "version").and_then(|v| v.parse().ok()),
            name: attr(fragment, "name").unwrap_or_default(),
            type_name: attr(fragment, "typeName").unwrap_or_default(),
            action: attr(fragment, "actionString").unwrap_or_default(),
            user: attr(fragment, "user").unwrap_or_default(),
            comment: attr(fragment, "comment").unwrap_or_default(),
        })
        .collect()
}

/// Attach non-label history items to the versions sharing their txid.
pub fn attach_file_operations(versions: &mut [SourceVersion], items: &[HistoryItem]) {
    let mut by_txid: HashMap<i64, Vec<FileOperation>> = HashMap::new();
    for item in items.iter().filter(|i| !i.is_label()) {
        if let Some(txid) = item.txid {
            by_txid.entry(txid).or_default().push(FileOperation {
                path: item.name.clone(),
                kind: ChangeKind::from_vault_type(&item.type_name),
            });
        }
    }
    for version in versions.iter_mut() {
        if let Some(ops) = version.txid.and_then(|t| by_txid.remove(&t)) {
            version.file_operations = ops;
        }
    }
}

/// Extract labels from `vault history` items.
///
/// The label name comes from an explicit `label` attribute when present,
/// otherwise from the first quoted string of the action text.
pub fn labels_from_history(xml: &str) -> Vec<SourceLabel> {
    let mut labels = Vec::new();
    for fragment in element_fragments(xml, "item") {
        let item_type = attr(fragment, "typeName").unwrap_or_default();
        let action = attr(fragment, "actionString").unwrap_or_default();
        if !item_type.eq_ignore_ascii_case("label")
            && !action.to_ascii_lowercase().starts_with("label")
        {
            continue;
        }
        let name = attr(fragment, "label").or_else(|| first_quoted(&action));
        let version = attr(fragment, "version").and_then(|v| v.parse::<i64>().ok());
        match (name, version) {
            (Some(name), Some(version)) if !name.is_empty() => labels.push(SourceLabel {
                name,
                version,
                comment: attr(fragment, "comment").filter(|c| !c.is_empty()),
            }),
            _ => warn!(action = %action, "skipping label item without name or version"),
        }
    }
    labels
}

/// Parse a Vault timestamp.
///
/// The client prints local times such as `3/11/2009 11:27:49 AM`; RFC 3339
/// strings are accepted as well.
pub fn parse_vault_date(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    const FORMATS: &[&str] = &[
        "%m/%d/%Y %I:%M:%S %p",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    let naive = FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.fixed_offset())
}

// ---------------------------------------------------------------------------
// XML helpers
// ---------------------------------------------------------------------------

/// Attribute sections of every `<tag ...>` element in `xml`.
fn element_fragments<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}", tag);
    let mut fragments = Vec::new();
    let mut search_from = 0;
    while let Some(rel) = xml[search_from..].find(&open) {
        let start = search_from + rel + open.len();
        let rest = &xml[start..];
        // Reject prefix matches such as <items> when looking for <item>.
        match rest.chars().next() {
            Some(ch) if ch.is_ascii_whitespace() || ch == '>' || ch == '/' => {}
            _ => {
                search_from = start;
                continue;
            }
        }
        let end = find_tag_end(rest).unwrap_or(rest.len());
        fragments.push(&rest[..end]);
        search_from = start + end;
    }
    fragments
}

/// Index of the `>` closing an element's start tag, skipping quoted values.
fn find_tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, ch) in s.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(ch),
            (None, '>') => return Some(i),
            _ => {}
        }
    }
    None
}

fn extract_tag_content(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)?;
    let after_open = &xml[start + open.len()..];
    let content_start = after_open.find('>')? + 1;
    let content = &after_open[content_start..];
    let end = content.find(&close)?;
    Some(xml_unescape(content[..end].trim()))
}

/// Value of attribute `name`, which must start a whitespace-separated token
/// so that `version` does not match `objversion`.
fn attr(fragment: &str, name: &str) -> Option<String> {
    for quote in ['"', '\''] {
        let pattern = format!("{}={}", name, quote);
        let mut search_from = 0;
        while let Some(rel) = fragment[search_from..].find(&pattern) {
            let pos = search_from + rel;
            let preceded_ok = fragment[..pos]
                .chars()
                .next_back()
                .map_or(true, |c| c.is_ascii_whitespace());
            let after = &fragment[pos + pattern.len()..];
            if preceded_ok {
                let end = after.find(quote)?;
                return Some(xml_unescape(&after[..end]));
            }
            search_from = pos + pattern.len();
        }
    }
    None
}

fn first_quoted(s: &str) -> Option<String> {
    let start = s.find(['"', '\''])?;
    let quote = s[start..].chars().next()?;
    let rest = &s[start + 1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

/// Unescape standard XML entities.
fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#xD;&#xA;", "\n")
        .replace("&#xA;", "\n")
        .replace("&#xD;", "")
        .replace("&amp;", "&")
}
