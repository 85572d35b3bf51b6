//! Host-injection points around file replacement
//!
//! A host (typically the git integration) can observe a target before the
//! sync engine replaces it and react after the replacement committed. The
//! engine depends only on this capability; it never issues git commands of
//! its own.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::error::{ErrorKind, SyncError};
use crate::logging::*;

/// Opaque value handed from [`SyncHooks::pre_sync_probe`] to
/// [`SyncHooks::post_sync_commit`]; the engine never inspects it.
#[derive(Debug, Clone, Default)]
pub struct HookToken(Option<String>);

impl HookToken {
	pub fn new(state: impl Into<String>) -> HookToken {
		HookToken(Some(state.into()))
	}

	pub fn empty() -> HookToken {
		HookToken(None)
	}

	pub fn state(&self) -> Option<&str> {
		self.0.as_deref()
	}
}

/// What happened to the probed target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
	/// The target was replaced with new content
	Committed,

	/// Nothing was written
	Skipped,

	/// The operation failed before commit
	Failed,
}

/// Capability interface for pre/post sync participation.
///
/// Hook failures are reported as warnings by the orchestrator; they never
/// abort the file operation itself.
#[async_trait]
pub trait SyncHooks: Send + Sync {
	/// Observe `path` before the engine may replace it
	async fn pre_sync_probe(&self, path: &Path) -> Result<HookToken, SyncError>;

	/// React after the engine finished with `path`
	async fn post_sync_commit(
		&self,
		path: &Path,
		token: HookToken,
		outcome: HookOutcome,
	) -> Result<(), SyncError>;
}

/// Default hooks that do nothing
pub struct NoHooks;

#[async_trait]
impl SyncHooks for NoHooks {
	async fn pre_sync_probe(&self, _path: &Path) -> Result<HookToken, SyncError> {
		Ok(HookToken::empty())
	}

	async fn post_sync_commit(
		&self,
		_path: &Path,
		_token: HookToken,
		_outcome: HookOutcome,
	) -> Result<(), SyncError> {
		Ok(())
	}
}

/// Stages files written inside a git working tree, so a later commit of the
/// rendezvous repository picks up synced content.
pub struct GitStagingHooks {
	repo_root: PathBuf,
}

impl GitStagingHooks {
	pub fn new(repo_root: impl Into<PathBuf>) -> GitStagingHooks {
		GitStagingHooks { repo_root: repo_root.into() }
	}

	fn covers(&self, path: &Path) -> bool {
		path.starts_with(&self.repo_root)
	}
}

#[async_trait]
impl SyncHooks for GitStagingHooks {
	async fn pre_sync_probe(&self, path: &Path) -> Result<HookToken, SyncError> {
		if !self.covers(path) {
			return Ok(HookToken::empty());
		}
		// Remember whether the path was already dirty in the index
		let output = Command::new("git")
			.args(["status", "--porcelain", "--"])
			.arg(path)
			.current_dir(&self.repo_root)
			.output()
			.await
			.map_err(|e| {
				SyncError::new(ErrorKind::GitOperation, "status")
					.with_path(path)
					.with_message(e.to_string())
			})?;
		Ok(HookToken::new(String::from_utf8_lossy(&output.stdout).trim().to_string()))
	}

	async fn post_sync_commit(
		&self,
		path: &Path,
		token: HookToken,
		outcome: HookOutcome,
	) -> Result<(), SyncError> {
		if outcome != HookOutcome::Committed || !self.covers(path) {
			return Ok(());
		}
		if let Some(state) = token.state() {
			if !state.is_empty() {
				debug!("{} was already modified before sync: {}", path.display(), state);
			}
		}
		let output = Command::new("git")
			.args(["add", "--"])
			.arg(path)
			.current_dir(&self.repo_root)
			.output()
			.await
			.map_err(|e| {
				SyncError::new(ErrorKind::GitOperation, "stage")
					.with_path(path)
					.with_message(e.to_string())
			})?;
		if output.status.success() {
			Ok(())
		} else {
			Err(SyncError::new(ErrorKind::GitOperation, "stage")
				.with_path(path)
				.with_message(String::from_utf8_lossy(&output.stderr).into_owned()))
		}
	}
}


// vim: ts=4
