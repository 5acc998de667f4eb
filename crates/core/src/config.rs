//! Configuration for a vault2git migration.
//!
//! Loaded from a TOML file, with secrets resolved from environment variables
//! named in the file. Command-line switches are folded in by the binary via
//! [`AppConfig::apply_overrides`].

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::commit_format::VERSION_TRAILER;
use crate::errors::ConfigError;
use crate::mapping::{parse_mappings, BranchMapping};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Complete migration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Vault server connection settings.
    pub vault: VaultConfig,

    /// Target Git repository settings.
    pub git: GitConfig,

    /// Folder mappings and replication switches.
    pub migration: MigrationConfig,

    /// Commit message template.
    #[serde(default)]
    pub commit_format: CommitFormatConfig,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

/// Vault server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Host name of the Vault server.
    pub server: String,

    /// Repository name on the server.
    pub repository: String,

    /// Vault user used for the migration.
    pub user: String,

    /// Environment variable holding the Vault password.
    pub password_env: String,

    /// Path of the Vault command-line client.
    #[serde(default = "default_vault_command")]
    pub command: String,

    /// Per-command timeout in seconds. 0 = no timeout.
    #[serde(default)]
    pub timeout_secs: u64,

    /// Resolved password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub password: Option<String>,
}

impl VaultConfig {
    /// The per-command timeout, if one is configured.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

fn default_vault_command() -> String {
    "vault".into()
}

// ---------------------------------------------------------------------------
// Git
// ---------------------------------------------------------------------------

/// Target Git repository settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    /// Path of the `git` executable (used for housekeeping).
    #[serde(default = "default_git_command")]
    pub command: String,

    /// Working tree of the target repository. Created if missing. Every
    /// version is mirrored into it, so it must not hold anything else.
    pub repo_path: PathBuf,

    /// Email domain appended to Vault user names without an authors entry.
    pub domain_name: String,

    /// Optional TOML file mapping Vault users to Git identities.
    #[serde(default)]
    pub authors_file: Option<PathBuf>,

    /// Run `git gc --auto` after each branch.
    #[serde(default = "default_true")]
    pub gc: bool,
}

fn default_git_command() -> String {
    "git".into()
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

/// Folder mappings and replication switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Mapping string, `folder~branch;folder~branch`.
    pub paths: String,

    /// Do not create commits for versions that change nothing.
    #[serde(default)]
    pub skip_empty_commits: bool,

    /// Do not create tags from Vault labels.
    #[serde(default)]
    pub ignore_labels: bool,

    /// Directory for the checkpoint database and the staging area.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Glob patterns of files never copied into the Git tree.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".vault2git")
}

// ---------------------------------------------------------------------------
// Commit format
// ---------------------------------------------------------------------------

/// Commit message template.
///
/// Placeholders: `{comment}`, `{version}`, `{folder}`, `{author}`, `{date}`,
/// `{txid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitFormatConfig {
    #[serde(default = "default_commit_template")]
    pub template: String,
}

fn default_commit_template() -> String {
    r#"{comment}

Vault-Version: {version}
Vault-Folder: {folder}
Vault-Author: {author}
Vault-Date: {date}"#
        .into()
}

impl Default for CommitFormatConfig {
    fn default() -> Self {
        Self {
            template: default_commit_template(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

/// Command-line switches that override the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub paths: Option<String>,
    pub skip_empty_commits: bool,
    pub ignore_labels: bool,
}

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    pub fn resolve_env_vars(&mut self) {
        self.vault.password = resolve_optional_env(&self.vault.password_env, "vault.password_env");
    }

    /// Fold command-line switches into the configuration.
    ///
    /// Switches can only turn behaviour on; a `--map` value replaces the
    /// configured mapping string.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(paths) = &overrides.paths {
            debug!(paths = %paths, "mapping overridden from command line");
            self.migration.paths = paths.clone();
        }
        self.migration.skip_empty_commits |= overrides.skip_empty_commits;
        self.migration.ignore_labels |= overrides.ignore_labels;
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("vault.server", &self.vault.server),
            ("vault.repository", &self.vault.repository),
            ("vault.user", &self.vault.user),
            ("vault.command", &self.vault.command),
            ("git.command", &self.git.command),
            ("git.domain_name", &self.git.domain_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: "must not be empty".into(),
                });
            }
        }

        for pattern in &self.migration.ignore_patterns {
            if pattern.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "migration.ignore_patterns".into(),
                    detail: "patterns must not be empty".into(),
                });
            }
        }

        check_template(&self.commit_format.template)?;
        self.check_layout()?;
        self.mappings().map(|_| ())
    }

    /// Reject files and directories the work-tree mirror would delete.
    fn check_layout(&self) -> Result<(), ConfigError> {
        if self.git.repo_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "git.repo_path".into(),
                detail: "must not be empty".into(),
            });
        }
        if let Some(authors) = &self.git.authors_file {
            self.ensure_outside_work_tree("git.authors_file", authors)?;
        }

        let invalid_data_dir = |detail: &str| ConfigError::InvalidValue {
            field: "migration.data_dir".into(),
            detail: detail.into(),
        };
        if let Some(relative) = relative_to(&self.migration.data_dir, &self.git.repo_path) {
            let root = relative.components().next().map(|c| c.as_os_str().to_string_lossy());
            match root {
                None => return Err(invalid_data_dir("must not be the repository itself")),
                Some(name) if name == ".git" => {
                    return Err(invalid_data_dir("must not be inside .git"))
                }
                Some(name) if !name.starts_with('.') => {
                    return Err(invalid_data_dir(
                        "inside git.repo_path it must be a top-level dot directory",
                    ))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Fail when `path` lies inside the target working tree.
    pub fn ensure_outside_work_tree(&self, field: &str, path: &Path) -> Result<(), ConfigError> {
        match relative_to(path, &self.git.repo_path) {
            Some(_) => Err(ConfigError::InvalidValue {
                field: field.into(),
                detail: format!(
                    "'{}' is inside git.repo_path and would be removed by replication",
                    path.display()
                ),
            }),
            None => Ok(()),
        }
    }

    /// Root-level work-tree entries replication must leave alone: `.git`,
    /// and the data directory when it lives in the work tree.
    pub fn protected_entries(&self) -> Vec<String> {
        let mut names = vec![".git".to_string()];
        let data_root = relative_to(&self.migration.data_dir, &self.git.repo_path)
            .and_then(|rel| {
                rel.components()
                    .next()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
            });
        if let Some(name) = data_root {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// The parsed mapping table.
    pub fn mappings(&self) -> Result<Vec<BranchMapping>, ConfigError> {
        parse_mappings(&self.migration.paths)
    }

    /// Path of the SQLite checkpoint database.
    pub fn checkpoint_db_path(&self) -> PathBuf {
        self.migration.data_dir.join("checkpoints.db")
    }

    /// Directory Vault exports are staged in before mirroring.
    pub fn staging_dir(&self) -> PathBuf {
        self.migration.data_dir.join("staging")
    }

    /// Convenience: load, resolve, override and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(
        path: P,
        overrides: &Overrides,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars();
        config.apply_overrides(overrides);
        config.validate()?;
        config.ensure_outside_work_tree("configuration file", path)?;
        Ok(config)
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# vault2git configuration

[vault]
server = "vault.example.com"
repository = "Main"
user = "migrator"
password_env = "VAULT2GIT_VAULT_PASSWORD"
command = "vault"
# timeout_secs = 0   # 0 = no timeout

[git]
command = "git"
repo_path = "work"
domain_name = "example.com"
# authors_file = "authors.toml"
gc = true

[migration]
paths = "$/Project/trunk~master;$/Project/branches/dev~dev"
skip_empty_commits = false
ignore_labels = false
data_dir = ".vault2git"
ignore_patterns = ["*.vspscc", "*.vssscc"]

[commit_format]
# template = "{comment}\n\nVault-Version: {version}"
"#
    }
}

/// The template must end its last paragraph with the version trailer, after
/// every `{comment}`, so a comment can never supply the trailer.
fn check_template(template: &str) -> Result<(), ConfigError> {
    let invalid = |detail: String| ConfigError::InvalidValue {
        field: "commit_format.template".into(),
        detail,
    };
    let trailer = format!("{} {{version}}", VERSION_TRAILER);
    let lines: Vec<&str> = template.trim_end().lines().collect();

    let Some(at) = lines.iter().rposition(|l| l.trim() == trailer) else {
        return Err(invalid(format!("template must contain a '{}' line", trailer)));
    };
    if lines[at + 1..].iter().any(|l| l.trim().is_empty()) {
        return Err(invalid(format!("'{}' must be in the last paragraph", trailer)));
    }
    if lines[at + 1..].iter().any(|l| l.contains("{comment}")) {
        return Err(invalid(format!("'{}' must come after {{comment}}", trailer)));
    }
    Ok(())
}

/// Lexically normalized absolute form of `path`.
fn absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().unwrap_or_default().join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// `path` relative to `root` when it lies inside it (or is `root` itself).
fn relative_to(path: &Path, root: &Path) -> Option<PathBuf> {
    absolute(path)
        .strip_prefix(absolute(root))
        .ok()
        .map(Path::to_path_buf)
}

/// Try to read an environment variable by name.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
