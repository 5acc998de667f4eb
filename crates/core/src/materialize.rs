//! Full-tree materialization of one source version into the Git work tree.
//!
//! Each version is exported into a fresh staging directory and then mirrored
//! into the working tree: new and changed files are copied, files absent from
//! the export are removed. Protected root entries (`.git`, plus the data
//! directory when it lives in the work tree) are never touched on either side.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, instrument};

use crate::errors::{GitError, VaultError};
use crate::git::client::is_protected_entry;
use crate::source::SourceRepository;

/// An exported version. The directory is removed on drop.
#[derive(Debug)]
pub struct StagedExport {
    dir: TempDir,
    pub version: i64,
}

impl StagedExport {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Counts from one mirror pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MirrorStats {
    pub copied: usize,
    pub removed: usize,
    pub ignored: usize,
}

/// Exports versions and mirrors them into a working tree.
#[derive(Debug, Clone)]
pub struct Materializer {
    staging_root: PathBuf,
    ignore_patterns: Vec<String>,
    protected: Vec<String>,
}

impl Materializer {
    pub fn new(staging_root: impl Into<PathBuf>, ignore_patterns: Vec<String>) -> Self {
        Self {
            staging_root: staging_root.into(),
            ignore_patterns,
            protected: vec![".git".into()],
        }
    }

    /// Leave the root-level entries named in `names` alone, in addition to
    /// `.git`.
    pub fn with_protected_entries(mut self, names: &[String]) -> Self {
        for name in names {
            if !self.protected.contains(name) {
                self.protected.push(name.clone());
            }
        }
        self
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    /// Export `folder` at `version` into a fresh staging directory.
    #[instrument(skip(self, source))]
    pub async fn export(
        &self,
        source: &dyn SourceRepository,
        folder: &str,
        version: i64,
    ) -> Result<StagedExport, VaultError> {
        std::fs::create_dir_all(&self.staging_root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("v{}-", version))
            .tempdir_in(&self.staging_root)?;
        source.export(folder, version, dir.path()).await?;
        debug!(dir = %dir.path().display(), "version exported");
        Ok(StagedExport { dir, version })
    }

    /// Make `workdir` mirror `export`, minus ignored files.
    #[instrument(skip(self, export), fields(version = export.version))]
    pub fn mirror(&self, export: &StagedExport, workdir: &Path) -> Result<MirrorStats, GitError> {
        let mut stats = MirrorStats::default();
        self.remove_stale(export.path(), workdir, Path::new(""), &mut stats)?;
        self.copy_tree(export.path(), workdir, Path::new(""), &mut stats)?;
        info!(
            copied = stats.copied,
            removed = stats.removed,
            ignored = stats.ignored,
            "working tree mirrored"
        );
        Ok(stats)
    }

    /// Remove everything below the staging root.
    pub fn clear_staging(&self) -> Result<(), std::io::Error> {
        match std::fs::remove_dir_all(&self.staging_root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn is_ignored(&self, relative: &Path) -> bool {
        if self.ignore_patterns.is_empty() {
            return false;
        }
        let path = relative.to_string_lossy().replace('\\', "/");
        let name = relative
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.ignore_patterns
            .iter()
            .any(|p| glob_match::glob_match(p, &path) || glob_match::glob_match(p, &name))
    }

    fn copy_tree(
        &self,
        src: &Path,
        dst: &Path,
        relative: &Path,
        stats: &mut MirrorStats,
    ) -> Result<(), GitError> {
        for entry in std::fs::read_dir(src)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let rel = relative.join(&file_name);

            if is_protected_entry(&rel, &self.protected) {
                debug!(name = %rel.display(), "skipping protected entry in export");
                continue;
            }
            if self.is_ignored(&rel) {
                stats.ignored += 1;
                continue;
            }

            let src_path = entry.path();
            let dst_path = dst.join(&file_name);
            if src_path.is_dir() {
                if dst_path.is_file() {
                    std::fs::remove_file(&dst_path)?;
                }
                std::fs::create_dir_all(&dst_path)?;
                self.copy_tree(&src_path, &dst_path, &rel, stats)?;
            } else {
                if dst_path.is_dir() {
                    std::fs::remove_dir_all(&dst_path)?;
                }
                std::fs::copy(&src_path, &dst_path)?;
                stats.copied += 1;
            }
        }
        Ok(())
    }

    fn remove_stale(
        &self,
        src: &Path,
        dst: &Path,
        relative: &Path,
        stats: &mut MirrorStats,
    ) -> Result<(), GitError> {
        let entries = match std::fs::read_dir(dst) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let rel = relative.join(&file_name);

            if is_protected_entry(&rel, &self.protected) {
                continue;
            }

            let src_path = src.join(&file_name);
            let dst_path = entry.path();
            let wanted = src_path.exists() && !self.is_ignored(&rel);

            if dst_path.is_dir() {
                if wanted && src_path.is_dir() {
                    self.remove_stale(&src_path, &dst_path, &rel, stats)?;
                } else {
                    std::fs::remove_dir_all(&dst_path)?;
                    stats.removed += 1;
                    debug!(path = %rel.display(), "removed stale directory");
                }
            } else if !wanted {
                std::fs::remove_file(&dst_path)?;
                stats.removed += 1;
                debug!(path = %rel.display(), "removed stale file");
            }
        }
        Ok(())
    }
}
