//! Git-notes backend for the shared file-metadata document
//!
//! In git mode the metadata document is attached to `HEAD` of the
//! rendezvous repository as a note instead of living in a file, so every
//! metadata revision travels with the repository history. All git work is
//! delegated to the `git` binary.

use std::path::Path;
use tokio::process::Command;

use crate::error::{ErrorKind, SyncError};
use crate::logging::*;

/// Notes ref carrying the shared file-metadata document
pub const METADATA_NOTES_REF: &str = "syncstation/file-metadata";

/// Read a note from `HEAD`. Returns `None` when no note (or no commit)
/// exists yet.
pub async fn load_notes(repo_root: &Path, notes_ref: &str) -> Result<Option<String>, SyncError> {
	let output = Command::new("git")
		.args(["notes", "--ref", notes_ref, "show", "HEAD"])
		.current_dir(repo_root)
		.output()
		.await
		.map_err(|e| git_error("notes-show", repo_root, e.to_string()))?;

	if output.status.success() {
		let content = String::from_utf8(output.stdout)
			.map_err(|e| git_error("notes-show", repo_root, e.to_string()))?;
		Ok(Some(content))
	} else {
		// No note yet, or the repository has no HEAD; both mean "empty"
		Ok(None)
	}
}

/// Attach `content` as a note on `HEAD`, replacing any existing note.
///
/// When the repository has no commits yet, an empty bootstrap commit is
/// created first so the note has something to hang on.
pub async fn save_notes(repo_root: &Path, notes_ref: &str, content: &str) -> Result<(), SyncError> {
	let output = run_notes_add(repo_root, notes_ref, content).await?;
	if output.status.success() {
		return Ok(());
	}

	let stderr = String::from_utf8_lossy(&output.stderr);
	if !stderr.contains("bad revision") && !stderr.contains("bad default revision") {
		return Err(git_error("notes-add", repo_root, stderr.into_owned()));
	}

	// Empty repository: bootstrap a commit, then retry once
	debug!("no HEAD in {}, creating bootstrap commit", repo_root.display());
	let commit = Command::new("git")
		.args(["commit", "--allow-empty", "-m", "Initialize syncstation metadata"])
		.current_dir(repo_root)
		.output()
		.await
		.map_err(|e| git_error("bootstrap-commit", repo_root, e.to_string()))?;
	if !commit.status.success() {
		return Err(git_error(
			"bootstrap-commit",
			repo_root,
			String::from_utf8_lossy(&commit.stderr).into_owned(),
		));
	}

	let retry = run_notes_add(repo_root, notes_ref, content).await?;
	if retry.status.success() {
		Ok(())
	} else {
		Err(git_error("notes-add", repo_root, String::from_utf8_lossy(&retry.stderr).into_owned()))
	}
}

async fn run_notes_add(
	repo_root: &Path,
	notes_ref: &str,
	content: &str,
) -> Result<std::process::Output, SyncError> {
	Command::new("git")
		.args(["notes", "--ref", notes_ref, "add", "-f", "-m", content, "HEAD"])
		.current_dir(repo_root)
		.output()
		.await
		.map_err(|e| git_error("notes-add", repo_root, e.to_string()))
}

fn git_error(op: &str, repo_root: &Path, detail: String) -> SyncError {
	SyncError::new(ErrorKind::GitOperation, op).with_path(repo_root).with_message(detail)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	async fn init_repo() -> Option<TempDir> {
		let tmp = TempDir::new().unwrap();
		let status = Command::new("git")
			.args(["init", "-q"])
			.current_dir(tmp.path())
			.status()
			.await
			.ok()?;
		if !status.success() {
			return None;
		}
		for (key, value) in
			[("user.email", "test@example.invalid"), ("user.name", "Test"), ("commit.gpgsign", "false")]
		{
			Command::new("git")
				.args(["config", key, value])
				.current_dir(tmp.path())
				.status()
				.await
				.ok()?;
		}
		Some(tmp)
	}

	#[tokio::test]
	async fn test_notes_round_trip_with_bootstrap() {
		// Skipped silently when git is unavailable in the environment
		let Some(repo) = init_repo().await else { return };

		assert_eq!(load_notes(repo.path(), METADATA_NOTES_REF).await.unwrap(), None);

		// Repository has no commits; save must bootstrap HEAD first
		save_notes(repo.path(), METADATA_NOTES_REF, "{\"metadata\":{}}").await.unwrap();
		let loaded = load_notes(repo.path(), METADATA_NOTES_REF).await.unwrap().unwrap();
		assert!(loaded.contains("metadata"));

		// Overwrite is forced, not appended
		save_notes(repo.path(), METADATA_NOTES_REF, "v2").await.unwrap();
		let loaded = load_notes(repo.path(), METADATA_NOTES_REF).await.unwrap().unwrap();
		assert!(loaded.starts_with("v2"));
	}
}

// vim: ts=4
