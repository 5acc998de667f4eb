//! Asynchronous Vault command-line client.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::parser::{
    attach_file_operations, labels_from_history, parse_history, parse_result,
    parse_version_history,
};
use crate::errors::VaultError;
use crate::source::{SourceLabel, SourceRepository, SourceVersion};

/// Client for a Vault repository, driving the `vault` executable.
#[derive(Debug, Clone)]
pub struct VaultClient {
    command: String,
    host: String,
    repository: String,
    user: String,
    password: String,
    timeout: Option<Duration>,
}

impl VaultClient {
    /// Create a new client for `repository` on `host`.
    pub fn new(
        command: impl Into<String>,
        host: impl Into<String>,
        repository: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let client = Self {
            command: command.into(),
            host: host.into(),
            repository: repository.into(),
            user: user.into(),
            password: password.into(),
            timeout: None,
        };
        info!(host = %client.host, repository = %client.repository, user = %client.user, "created VaultClient");
        client
    }

    /// Bound every command by `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Folder versions numbered above `after`, ascending, at most `max`.
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn version_history(
        &self,
        folder: &str,
        after: i64,
        max: u64,
    ) -> Result<Vec<SourceVersion>, VaultError> {
        let begin = (after + 1).to_string();
        let row_limit = max.min(i32::MAX as u64).to_string();
        let output = self
            .run_vault(
                "versionhistory",
                &["-beginversion", &begin, "-rowlimit", &row_limit, folder],
            )
            .await?;
        let mut versions = parse_version_history(&output)?;
        versions.retain(|v| v.number > after);
        versions.truncate(usize::try_from(max).unwrap_or(usize::MAX));

        if let (Some(first), Some(last)) = (versions.first(), versions.last()) {
            let begin = first.number.to_string();
            let end = last.number.to_string();
            let output = self
                .run_vault(
                    "history",
                    &["-beginversion", &begin, "-endversion", &end, folder],
                )
                .await?;
            attach_file_operations(&mut versions, &parse_history(&output));
        }

        debug!(count = versions.len(), "fetched version history");
        Ok(versions)
    }

    /// Get the tree of `folder` at `version` into `dest`.
    #[instrument(skip(self), fields(host = %self.host, dest = %dest.display()))]
    pub async fn get_version(
        &self,
        folder: &str,
        version: i64,
        dest: &Path,
    ) -> Result<(), VaultError> {
        let version_str = version.to_string();
        let dest_str = dest.to_string_lossy().to_string();
        self.run_vault(
            "getversion",
            &[
                "-backup",
                "no",
                "-merge",
                "overwrite",
                "-makewritable",
                "-setfiletime",
                "checkin",
                &version_str,
                folder,
                &dest_str,
            ],
        )
        .await?;
        info!(version, "vault getversion completed");
        Ok(())
    }

    /// Labels applied to `folder`.
    #[instrument(skip(self), fields(host = %self.host))]
    pub async fn list_labels(&self, folder: &str) -> Result<Vec<SourceLabel>, VaultError> {
        let output = self
            .run_vault("history", &["-includeactions", "label", folder])
            .await?;
        let labels = labels_from_history(&output);
        debug!(count = labels.len(), "listed labels");
        Ok(labels)
    }

    async fn run_vault(&self, subcommand: &str, args: &[&str]) -> Result<String, VaultError> {
        let mut cmd = Command::new(&self.command);
        cmd.arg(subcommand)
            .arg("-host")
            .arg(&self.host)
            .arg("-user")
            .arg(&self.user)
            .arg("-password")
            .arg(&self.password)
            .arg("-repository")
            .arg(&self.repository)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(cmd = ?format!("{} {} {}", self.command, subcommand, args.join(" ")), "running vault command");
        let running = cmd.output();
        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, running)
                .await
                .map_err(|_| VaultError::Timeout {
                    secs: limit.as_secs(),
                })?,
            None => running.await,
        }
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                VaultError::BinaryNotFound(self.command.clone())
            } else {
                VaultError::IoError(e)
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, %stderr, "vault command failed");
            // The client reports most failures inside its XML envelope.
            parse_result(&stdout)?;
            return Err(VaultError::CommandFailed { exit_code, stderr });
        }
        parse_result(&stdout)?;
        Ok(stdout)
    }
}

#[async_trait]
impl SourceRepository for VaultClient {
    async fn history(
        &self,
        folder: &str,
        after: i64,
        max: u64,
    ) -> Result<Vec<SourceVersion>, VaultError> {
        self.version_history(folder, after, max).await
    }

    async fn export(&self, folder: &str, version: i64, dest: &Path) -> Result<(), VaultError> {
        self.get_version(folder, version, dest).await
    }

    async fn labels(&self, folder: &str) -> Result<Vec<SourceLabel>, VaultError> {
        self.list_labels(folder).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_construction() {
        let client = VaultClient::new("vault", "vault.example.com", "Main", "user", "pass")
            .with_timeout(Some(Duration::from_secs(5)));
        assert_eq!(client.host(), "vault.example.com");
        assert_eq!(client.repository(), "Main");
        assert_eq!(client.timeout, Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let client = VaultClient::new(
            "/nonexistent/vault-client",
            "vault.example.com",
            "Main",
            "user",
            "pass",
        );
        let result = client.list_labels("$/trunk").await;
        assert!(matches!(result, Err(VaultError::BinaryNotFound(_))));
    }
}
