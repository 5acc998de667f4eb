//! Local Git repository operations via `git2`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use chrono::{DateTime, FixedOffset};
use git2::{
    build::CheckoutBuilder, BranchType, ErrorCode, IndexAddOption, IndexMatchedPath, ObjectType,
    Oid, Repository, Signature, Time,
};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::errors::GitError;
use crate::identity::GitIdentity;

/// High-level Git client wrapping a `git2::Repository`.
pub struct GitClient {
    repo: Repository,
    repo_path: PathBuf,
    /// Root-level names that are never staged.
    protected: Vec<String>,
}

/// Information about a single Git commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitCommitInfo {
    pub sha: String,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub author_time: i64,
    pub committer_name: String,
    pub committer_email: String,
}

/// Result of [`GitClient::stage_and_commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A new commit was written to the branch.
    Committed(Oid),
    /// Nothing changed relative to the tip; carries the unchanged tip.
    SkippedEmpty(Option<Oid>),
}

impl GitClient {
    /// Open an existing Git repository at `repo_path`.
    pub fn new<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        info!(path = %path.display(), "opening git repository");
        let repo = Repository::open(path)
            .map_err(|_| GitError::RepositoryNotFound(path.display().to_string()))?;
        Ok(Self::wrap(repo, path))
    }

    /// Open the repository at `repo_path`, initializing it (and the
    /// directory) when none exists yet.
    pub fn open_or_init<P: AsRef<Path>>(repo_path: P) -> Result<Self, GitError> {
        let path = repo_path.as_ref();
        if let Ok(repo) = Repository::open(path) {
            debug!(path = %path.display(), "opened existing git repository");
            return Ok(Self::wrap(repo, path));
        }
        std::fs::create_dir_all(path)?;
        let repo = Repository::init(path)?;
        info!(path = %path.display(), "initialized git repository");
        Ok(Self::wrap(repo, path))
    }

    fn wrap(repo: Repository, path: &Path) -> Self {
        Self {
            repo,
            repo_path: path.to_path_buf(),
            protected: vec![".git".into()],
        }
    }

    /// Never stage the root-level entries named in `names`, in addition to
    /// `.git`.
    pub fn with_protected_entries(mut self, names: &[String]) -> Self {
        for name in names {
            if !self.protected.contains(name) {
                self.protected.push(name.clone());
            }
        }
        self
    }

    pub fn protected_entries(&self) -> &[String] {
        &self.protected
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    /// Working tree root.
    pub fn workdir(&self) -> Result<&Path, GitError> {
        self.repo
            .workdir()
            .ok_or_else(|| GitError::NoWorkingTree(self.repo_path.display().to_string()))
    }

    /// Point `HEAD` at `branch`. The branch may be unborn.
    #[instrument(skip(self))]
    pub fn switch_to_branch(&self, branch: &str) -> Result<(), GitError> {
        self.repo.set_head(&branch_ref(branch))?;
        debug!(branch, "HEAD switched");
        Ok(())
    }

    /// Current tip of `branch`, `None` while the branch is unborn.
    pub fn branch_tip(&self, branch: &str) -> Result<Option<Oid>, GitError> {
        match self.repo.find_branch(branch, BranchType::Local) {
            Ok(b) => Ok(b.get().target()),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Commit at the tip of `branch`.
    pub fn tip_commit(&self, branch: &str) -> Result<Option<GitCommitInfo>, GitError> {
        match self.branch_tip(branch)? {
            Some(oid) => self.commit_info(oid).map(Some),
            None => Ok(None),
        }
    }

    /// Details of the commit `oid`.
    pub fn commit_info(&self, oid: Oid) -> Result<GitCommitInfo, GitError> {
        let commit = self.repo.find_commit(oid)?;
        let author = commit.author();
        let committer = commit.committer();
        let info = GitCommitInfo {
            sha: oid.to_string(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("").to_string(),
            author_email: author.email().unwrap_or("").to_string(),
            author_time: author.when().seconds(),
            committer_name: committer.name().unwrap_or("").to_string(),
            committer_email: committer.email().unwrap_or("").to_string(),
        };
        Ok(info)
    }

    /// Number of commits reachable from `branch`.
    pub fn commit_count(&self, branch: &str) -> Result<usize, GitError> {
        let Some(tip) = self.branch_tip(branch)? else {
            return Ok(0);
        };
        let mut revwalk = self.repo.revwalk()?;
        revwalk.push(tip)?;
        Ok(revwalk.count())
    }

    /// Stage the working tree against the tip of `branch` and commit it.
    ///
    /// Additions, modifications and deletions are all staged, including files
    /// a `.gitignore` would exclude. Protected root entries are never staged.
    /// With `skip_empty`, a tree identical to the tip's (or an empty tree on
    /// an unborn branch) produces no commit.
    #[instrument(skip(self, message, author, committer), fields(author = %author.email))]
    pub fn stage_and_commit(
        &self,
        branch: &str,
        message: &str,
        author: &GitIdentity,
        committer: &GitIdentity,
        when: DateTime<FixedOffset>,
        skip_empty: bool,
    ) -> Result<CommitOutcome, GitError> {
        let parent = match self.branch_tip(branch)? {
            Some(oid) => Some(self.repo.find_commit(oid)?),
            None => None,
        };

        let mut index = self.repo.index()?;
        match &parent {
            Some(commit) => index.read_tree(&commit.tree()?)?,
            None => index.clear()?,
        }
        let protected = &self.protected;
        let mut skip_protected = |path: &Path, _spec: &[u8]| -> i32 {
            if is_protected_entry(path, protected) {
                1
            } else {
                0
            }
        };
        index.add_all(
            ["*"].iter(),
            IndexAddOption::FORCE,
            Some(&mut skip_protected as &mut IndexMatchedPath),
        )?;
        index.update_all(
            ["*"].iter(),
            Some(&mut skip_protected as &mut IndexMatchedPath),
        )?;
        index.write()?;
        let tree_oid = index.write_tree()?;

        let unchanged = match &parent {
            Some(commit) => commit.tree_id() == tree_oid,
            None => index.is_empty(),
        };
        if skip_empty && unchanged {
            debug!(branch, "tree unchanged, skipping commit");
            return Ok(CommitOutcome::SkippedEmpty(parent.map(|c| c.id())));
        }

        let tree = self.repo.find_tree(tree_oid)?;
        let author_sig = signature(author, when)?;
        let committer_sig = signature(committer, when)?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = self.repo.commit(
            Some(&branch_ref(branch)),
            &author_sig,
            &committer_sig,
            message,
            &tree,
            &parents,
        )?;
        info!(branch, sha = %oid, "created commit");
        Ok(CommitOutcome::Committed(oid))
    }

    /// Make the index and working tree match the tip of `branch`.
    #[instrument(skip(self))]
    pub fn reset_to_tip(&self, branch: &str) -> Result<(), GitError> {
        let mut index = self.repo.index()?;
        match self.branch_tip(branch)? {
            Some(oid) => {
                let tree = self.repo.find_commit(oid)?.tree()?;
                index.read_tree(&tree)?;
                index.write()?;
                self.repo
                    .checkout_tree(tree.as_object(), Some(CheckoutBuilder::new().force()))?;
            }
            None => {
                index.clear()?;
                index.write()?;
            }
        }
        debug!(branch, "working tree reset to tip");
        Ok(())
    }

    // -- tags ---------------------------------------------------------------

    /// Commit the tag `name` points at, `None` if no such tag exists.
    pub fn tag_target(&self, name: &str) -> Result<Option<Oid>, GitError> {
        match self.repo.find_reference(&format!("refs/tags/{}", name)) {
            Ok(reference) => Ok(Some(reference.peel_to_commit()?.id())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Create an annotated tag `name` on `target`. Never overwrites.
    #[instrument(skip(self, tagger, message))]
    pub fn create_tag(
        &self,
        name: &str,
        target: Oid,
        tagger: &GitIdentity,
        message: &str,
    ) -> Result<Oid, GitError> {
        let object = self
            .repo
            .find_object(target, Some(ObjectType::Commit))
            .map_err(|_| GitError::RefNotFound(target.to_string()))?;
        let sig = Signature::now(&tagger.name, &tagger.email)?;
        let oid = self.repo.tag(name, &object, &sig, message, false)?;
        info!(name, target = %target, "created tag");
        Ok(oid)
    }

    // -- housekeeping -------------------------------------------------------

    /// Run `git gc --auto` with the given executable.
    #[instrument(skip(self))]
    pub async fn gc(&self, git_command: &str) -> Result<(), GitError> {
        let workdir = self.workdir()?;
        let output = Command::new(git_command)
            .current_dir(workdir)
            .args(["gc", "--auto", "--quiet"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            warn!(%stderr, "git gc failed");
            return Err(GitError::CommandFailed {
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        debug!("git gc completed");
        Ok(())
    }
}

fn branch_ref(branch: &str) -> String {
    format!("refs/heads/{}", branch)
}

/// True when the first component of `relative` is one of `protected`.
pub(crate) fn is_protected_entry(relative: &Path, protected: &[String]) -> bool {
    relative
        .components()
        .next()
        .map(|c| {
            let first = c.as_os_str().to_string_lossy();
            protected.iter().any(|name| name.as_str() == first.as_ref())
        })
        .unwrap_or(false)
}

fn signature(
    identity: &GitIdentity,
    when: DateTime<FixedOffset>,
) -> Result<Signature<'static>, GitError> {
    let offset_minutes = when.offset().local_minus_utc() / 60;
    let time = Time::new(when.timestamp(), offset_minutes);
    Ok(Signature::new(&identity.name, &identity.email, &time)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> GitIdentity {
        GitIdentity {
            name: "Alice".into(),
            email: "alice@example.com".into(),
        }
    }

    fn when() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2008-05-01T10:00:00+02:00").unwrap()
    }

    fn commit(client: &GitClient, branch: &str, msg: &str, skip: bool) -> CommitOutcome {
        client
            .stage_and_commit(branch, msg, &alice(), &alice(), when(), skip)
            .unwrap()
    }

    #[test]
    fn test_open_or_init_creates_repository() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target");
        let client = GitClient::open_or_init(&path).unwrap();
        assert_eq!(client.workdir().unwrap().canonicalize().unwrap(), path.canonicalize().unwrap());
        assert!(GitClient::open_or_init(&path).is_ok());
    }

    #[test]
    fn test_commit_carries_source_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let client = GitClient::open_or_init(dir.path()).unwrap();
        client.switch_to_branch("master").unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello").unwrap();

        let CommitOutcome::Committed(oid) = commit(&client, "master", "first\n", false) else {
            panic!("expected a commit");
        };
        assert_eq!(client.branch_tip("master").unwrap(), Some(oid));
        let info = client.commit_info(oid).unwrap();
        assert_eq!(info.author_name, "Alice");
        assert_eq!(info.committer_email, "alice@example.com");
        assert_eq!(info.author_time, when().timestamp());
        assert_eq!(info.message, "first\n");
    }

    #[test]
    fn test_deletions_are_staged() {
        let dir = tempfile::tempdir().unwrap();
        let client = GitClient::open_or_init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        commit(&client, "master", "two files", false);

        std::fs::remove_file(dir.path().join("b.txt")).unwrap();
        let CommitOutcome::Committed(oid) = commit(&client, "master", "drop b", false) else {
            panic!("expected a commit");
        };
        let tree = client.repo().find_commit(oid).unwrap().tree().unwrap();
        assert!(tree.get_name("a.txt").is_some());
        assert!(tree.get_name("b.txt").is_none());
    }

    #[test]
    fn test_skip_empty() {
        let dir = tempfile::tempdir().unwrap();
        let client = GitClient::open_or_init(dir.path()).unwrap();

        // Unborn branch with an empty tree.
        assert_eq!(commit(&client, "master", "nothing", true), CommitOutcome::SkippedEmpty(None));

        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let CommitOutcome::Committed(tip) = commit(&client, "master", "add", true) else {
            panic!("expected a commit");
        };
        assert_eq!(commit(&client, "master", "same", true), CommitOutcome::SkippedEmpty(Some(tip)));
        assert_eq!(client.commit_count("master").unwrap(), 1);

        // Without skipping an identical tree still commits.
        assert!(matches!(commit(&client, "master", "same", false), CommitOutcome::Committed(_)));
        assert_eq!(client.commit_count("master").unwrap(), 2);
    }

    #[test]
    fn test_protected_entries_are_not_staged() {
        let dir = tempfile::tempdir().unwrap();
        let client = GitClient::open_or_init(dir.path())
            .unwrap()
            .with_protected_entries(&[".vault2git".to_string()]);
        std::fs::create_dir_all(dir.path().join(".vault2git")).unwrap();
        std::fs::write(dir.path().join(".vault2git/checkpoints.db"), "x").unwrap();
        std::fs::write(dir.path().join(".editorconfig"), "root = true").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/.keep"), "").unwrap();

        let CommitOutcome::Committed(oid) = commit(&client, "master", "init", false) else {
            panic!("expected a commit");
        };
        let tree = client.repo().find_commit(oid).unwrap().tree().unwrap();
        assert!(tree.get_name(".vault2git").is_none());
        assert!(tree.get_name(".git").is_none());
        assert!(tree.get_name(".editorconfig").is_some());
        assert!(tree.get_path(Path::new("src/.keep")).is_ok());
    }

    #[test]
    fn test_gitignored_files_are_staged() {
        let dir = tempfile::tempdir().unwrap();
        let client = GitClient::open_or_init(dir.path()).unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/.gitignore"), "*.log\n").unwrap();
        std::fs::write(dir.path().join("sub/build.log"), "output").unwrap();
        std::fs::write(dir.path().join(".gitignore"), "/top.tmp\n").unwrap();
        std::fs::write(dir.path().join("top.tmp"), "kept").unwrap();

        let CommitOutcome::Committed(oid) = commit(&client, "master", "all files", false) else {
            panic!("expected a commit");
        };
        let tree = client.repo().find_commit(oid).unwrap().tree().unwrap();
        assert!(tree.get_path(Path::new("sub/build.log")).is_ok());
        assert!(tree.get_path(Path::new("sub/.gitignore")).is_ok());
        assert!(tree.get_name("top.tmp").is_some());

        // Deleting an ignored file is staged as well.
        std::fs::remove_file(dir.path().join("sub/build.log")).unwrap();
        let CommitOutcome::Committed(oid) = commit(&client, "master", "drop log", false) else {
            panic!("expected a commit");
        };
        let tree = client.repo().find_commit(oid).unwrap().tree().unwrap();
        assert!(tree.get_path(Path::new("sub/build.log")).is_err());
    }

    #[test]
    fn test_branches_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let client = GitClient::open_or_init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        commit(&client, "master", "on master", false);

        client.switch_to_branch("dev").unwrap();
        assert_eq!(client.branch_tip("dev").unwrap(), None);
        commit(&client, "dev", "on dev", false);
        assert_eq!(client.commit_count("dev").unwrap(), 1);
        assert_eq!(client.commit_count("master").unwrap(), 1);
    }

    #[test]
    fn test_reset_to_tip_restores_files() {
        let dir = tempfile::tempdir().unwrap();
        let client = GitClient::open_or_init(dir.path()).unwrap();
        client.switch_to_branch("master").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        commit(&client, "master", "add", false);

        std::fs::write(dir.path().join("a.txt"), "changed").unwrap();
        client.reset_to_tip("master").unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "a");
    }

    #[test]
    fn test_tags() {
        let dir = tempfile::tempdir().unwrap();
        let client = GitClient::open_or_init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let CommitOutcome::Committed(oid) = commit(&client, "master", "add", false) else {
            panic!("expected a commit");
        };

        assert_eq!(client.tag_target("v1").unwrap(), None);
        client.create_tag("v1", oid, &alice(), "release 1").unwrap();
        assert_eq!(client.tag_target("v1").unwrap(), Some(oid));
        assert!(client.create_tag("v1", oid, &alice(), "again").is_err());
    }

    #[test]
    fn test_repo_not_found() {
        assert!(matches!(
            GitClient::new("/nonexistent"),
            Err(GitError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn test_is_protected_entry() {
        let protected = vec![".git".to_string(), "state".to_string()];
        assert!(is_protected_entry(Path::new(".git"), &protected));
        assert!(is_protected_entry(Path::new("state/checkpoints.db"), &protected));
        assert!(!is_protected_entry(Path::new(".gitignore"), &protected));
        assert!(!is_protected_entry(Path::new("src/state"), &protected));
        assert!(!is_protected_entry(Path::new("a.txt"), &protected));
    }
}
