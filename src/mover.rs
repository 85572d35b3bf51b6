//! File movement between local paths and the rendezvous
//!
//! All writes go through the atomic writer with the source's mode bits
//! preserved. After every successful file write the metadata store is
//! updated so the three-way equality (local state, shared record, actual
//! content) holds again. Directory copies are recursive, create missing
//! parents with mode 0755 and honor the item's exclude patterns.

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::atomic;
use crate::backup::BackupManager;
use crate::cache::HashCache;
use crate::engine::collect_leaves;
use crate::error::{ErrorKind, SyncError};
use crate::hooks::{HookOutcome, SyncHooks};
use crate::logging::*;
use crate::metadata::{MetadataStore, SyncItem};
use crate::probe::Presence;
use crate::validation::ExcludeSet;

/// What a mover call actually did
#[derive(Debug, Clone, Default)]
pub struct MoveOutcome {
	/// Number of files written
	pub files_copied: usize,

	/// Digest of the transferred file, for single-file moves
	pub hash: Option<String>,

	/// Non-fatal warnings (metadata save, hooks)
	pub warnings: Vec<String>,
}

/// Executes push/pull transfers for one item at a time
pub struct FileMover {
	cache: Arc<HashCache>,
	hooks: Arc<dyn SyncHooks>,
	backups: Option<Arc<BackupManager>>,
}

impl FileMover {
	pub fn new(cache: Arc<HashCache>, hooks: Arc<dyn SyncHooks>) -> FileMover {
		FileMover { cache, hooks, backups: None }
	}

	/// Take a content-addressed backup of any file about to be overwritten
	pub fn with_backups(mut self, backups: Arc<BackupManager>) -> Self {
		self.backups = Some(backups);
		self
	}

	/// Copy one local file into the rendezvous and record the sync
	pub async fn push_file(
		&self,
		item: &SyncItem,
		local: &Path,
		cloud: &Path,
		store: &MetadataStore,
	) -> Result<MoveOutcome, SyncError> {
		self.transfer_file(item, local, cloud, local, cloud, store, "push").await
	}

	/// Copy one rendezvous file to the local path and record the sync
	pub async fn pull_file(
		&self,
		item: &SyncItem,
		local: &Path,
		cloud: &Path,
		store: &MetadataStore,
	) -> Result<MoveOutcome, SyncError> {
		self.transfer_file(item, cloud, local, local, cloud, store, "pull").await
	}

	#[allow(clippy::too_many_arguments)]
	async fn transfer_file(
		&self,
		item: &SyncItem,
		src: &Path,
		dst: &Path,
		local: &Path,
		cloud: &Path,
		store: &MetadataStore,
		op: &str,
	) -> Result<MoveOutcome, SyncError> {
		let mut outcome = MoveOutcome::default();

		// Content about to be replaced stays recoverable
		if let Some(backups) = &self.backups {
			if dst.is_file() {
				if let Err(e) =
					backups.backup_file(&item.name, dst, "pre_sync", &["auto".to_string()])
				{
					outcome.warnings.push(format!("pre-sync backup failed: {}", e));
				}
			}
		}

		let token = match self.hooks.pre_sync_probe(dst).await {
			Ok(token) => token,
			Err(e) => {
				outcome.warnings.push(format!("pre-sync hook: {}", e));
				crate::hooks::HookToken::empty()
			}
		};

		let copy_result = atomic::copy_file_atomic(src, dst)
			.map_err(|e| e.with_item(&item.name));
		let hook_outcome = if copy_result.is_ok() {
			HookOutcome::Committed
		} else {
			HookOutcome::Failed
		};
		if let Err(e) = self.hooks.post_sync_commit(dst, token, hook_outcome).await {
			outcome.warnings.push(format!("post-sync hook: {}", e));
		}
		copy_result?;

		// The destination just changed under any cached digest
		self.cache.remove(dst);
		let hash = self
			.cache
			.get_or_calculate(local)
			.map_err(|e| e.with_item(&item.name))?;

		let (local_mtime, local_size) = stat_for_record(local, op, &item.name)?;
		let (cloud_mtime, _) = stat_for_record(cloud, op, &item.name)?;

		if let Err(e) = store
			.record_file_sync(&item.name, local, &hash, local_mtime, local_size, cloud_mtime)
			.await
		{
			// The transfer itself succeeded; a failed metadata save is a
			// warning carried in the result, not a rollback.
			warn!("{}: metadata update failed for {}: {}", op, item.name, e);
			outcome.warnings.push(format!("metadata update failed: {}", e));
		}

		debug!("{} {}: {} -> {}", op, item.name, src.display(), dst.display());
		outcome.files_copied = 1;
		outcome.hash = Some(hash);
		Ok(outcome)
	}

	/// Mirror a local tree into the rendezvous
	pub async fn push_tree(
		&self,
		item: &SyncItem,
		local: &Path,
		cloud: &Path,
		cancel: &CancellationToken,
	) -> Result<MoveOutcome, SyncError> {
		self.copy_tree(item, local, cloud, cancel, "push").await
	}

	/// Mirror a rendezvous tree onto the local path
	pub async fn pull_tree(
		&self,
		item: &SyncItem,
		local: &Path,
		cloud: &Path,
		cancel: &CancellationToken,
	) -> Result<MoveOutcome, SyncError> {
		self.copy_tree(item, cloud, local, cancel, "pull").await
	}

	async fn copy_tree(
		&self,
		item: &SyncItem,
		src_root: &Path,
		dst_root: &Path,
		cancel: &CancellationToken,
		op: &str,
	) -> Result<MoveOutcome, SyncError> {
		let excludes = ExcludeSet::new(&item.exclude_patterns)
			.map_err(|e| SyncError::from(e).with_item(&item.name))?;
		let leaves = collect_leaves(src_root, &excludes)
			.map_err(|e| e.with_item(&item.name))?;

		std::fs::create_dir_all(dst_root)
			.map_err(|e| SyncError::from_io(op, dst_root, e).with_item(&item.name))?;

		let mut outcome = MoveOutcome::default();
		for leaf in leaves {
			if cancel.is_cancelled() {
				return Err(SyncError::new(ErrorKind::Internal, op)
					.with_item(&item.name)
					.with_message("stopped before commit: operation cancelled"));
			}
			let src = src_root.join(&leaf);
			let dst = dst_root.join(&leaf);
			if let Some(parent) = dst.parent() {
				create_parents(parent, op, &item.name)?;
			}
			if skip_identical(&self.cache, &src, &dst) {
				continue;
			}
			atomic::copy_file_atomic(&src, &dst).map_err(|e| e.with_item(&item.name))?;
			outcome.files_copied += 1;
		}

		debug!(
			"{} {}: {} file(s) {} -> {}",
			op,
			item.name,
			outcome.files_copied,
			src_root.display(),
			dst_root.display()
		);
		Ok(outcome)
	}

	/// Mirror-delete for explicit one-way modes: the present side is gone,
	/// so remove the counterpart and forget the file's records.
	pub async fn mirror_delete(
		&self,
		item: &SyncItem,
		target: &Path,
		local: &Path,
		store: &MetadataStore,
		op: &str,
	) -> Result<MoveOutcome, SyncError> {
		match Presence::stat(target) {
			Presence::Absent => return Ok(MoveOutcome::default()),
			Presence::Inaccessible { why } => {
				return Err(SyncError::new(ErrorKind::PermissionDenied, op)
					.with_item(&item.name)
					.with_path(target)
					.with_message(why));
			}
			Presence::Present { is_dir, .. } => {
				if !is_dir {
					if let Some(backups) = &self.backups {
						if let Err(e) = backups.backup_file(
							&item.name,
							target,
							"pre_delete",
							&["auto".to_string()],
						) {
							warn!("pre-delete backup of {} failed: {}", target.display(), e);
						}
					}
				}
				let result = if is_dir {
					std::fs::remove_dir_all(target)
				} else {
					std::fs::remove_file(target)
				};
				result.map_err(|e| SyncError::from_io(op, target, e).with_item(&item.name))?;
			}
		}

		self.cache.remove(target);
		let mut outcome = MoveOutcome { files_copied: 1, ..Default::default() };
		if let Err(e) = store.forget_file(&item.name, local).await {
			outcome.warnings.push(format!("metadata update failed: {}", e));
		}
		info!("{} {}: removed {}", op, item.name, target.display());
		Ok(outcome)
	}
}

fn stat_for_record(
	path: &Path,
	op: &str,
	item: &str,
) -> Result<(DateTime<Utc>, u64), SyncError> {
	match Presence::stat(path) {
		Presence::Present { mtime, size, .. } => Ok((mtime, size)),
		Presence::Absent => Err(SyncError::new(ErrorKind::FileNotFound, op)
			.with_item(item)
			.with_path(path)
			.with_message("file vanished after copy")),
		Presence::Inaccessible { why } => Err(SyncError::new(ErrorKind::PermissionDenied, op)
			.with_item(item)
			.with_path(path)
			.with_message(why)),
	}
}

fn create_parents(parent: &Path, op: &str, item: &str) -> Result<(), SyncError> {
	#[cfg(unix)]
	{
		use std::os::unix::fs::DirBuilderExt;
		std::fs::DirBuilder::new()
			.recursive(true)
			.mode(0o755)
			.create(parent)
			.map_err(|e| SyncError::from_io(op, parent, e).with_item(item))
	}
	#[cfg(not(unix))]
	{
		std::fs::create_dir_all(parent)
			.map_err(|e| SyncError::from_io(op, parent, e).with_item(item))
	}
}

/// Cheap equality check before rewriting a tree leaf
fn skip_identical(cache: &HashCache, src: &Path, dst: &Path) -> bool {
	if !dst.is_file() {
		return false;
	}
	match (cache.get_or_calculate(src), cache.get_or_calculate(dst)) {
		(Ok(a), Ok(b)) => a == b,
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::LocalConfig;
	use crate::hooks::NoHooks;
	use crate::types::ItemKind;
	use std::collections::BTreeMap;
	use std::fs;
	use tempfile::TempDir;

	fn fixture(cloud: &TempDir, state: &TempDir) -> (FileMover, MetadataStore) {
		let cache = Arc::new(HashCache::new(std::time::Duration::from_secs(3600)));
		let mover = FileMover::new(cache, Arc::new(NoHooks));
		let config = LocalConfig {
			cloud_sync_dir: cloud.path().to_path_buf(),
			current_computer: "laptop".to_string(),
			..Default::default()
		};
		let store = MetadataStore::new(config, state.path());
		(mover, store)
	}

	fn file_item(name: &str, local: &Path) -> SyncItem {
		let mut paths = BTreeMap::new();
		paths.insert("laptop".to_string(), local.to_string_lossy().into_owned());
		SyncItem {
			name: name.to_string(),
			kind: ItemKind::File,
			paths,
			exclude_patterns: Vec::new(),
		}
	}

	#[tokio::test]
	async fn test_push_file_records_metadata() {
		let cloud = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		let work = TempDir::new().unwrap();
		let (mover, store) = fixture(&cloud, &state);

		let local = work.path().join("vimrc");
		fs::write(&local, b"set ts=4\n").unwrap();
		let item = file_item("Vim", &local);
		let cloud_path = item.cloud_path(&cloud.path().join("configs"));

		let outcome = mover.push_file(&item, &local, &cloud_path, &store).await.unwrap();
		assert_eq!(outcome.files_copied, 1);
		assert!(outcome.warnings.is_empty());
		assert_eq!(fs::read(&cloud_path).unwrap(), b"set ts=4\n");

		let hash = outcome.hash.unwrap();
		let states = store.load_states().await.unwrap();
		assert_eq!(states.get("Vim", &local.to_string_lossy()).unwrap().local_hash, hash);

		let metadata = store.load_metadata().await.unwrap();
		let entry = metadata.get("Vim", &local.to_string_lossy()).unwrap();
		assert_eq!(entry.last_cloud_hash(), Some(hash.as_str()));
		assert_eq!(entry.computers["laptop"].hash, hash);
	}

	#[tokio::test]
	async fn test_pull_file_creates_local() {
		let cloud = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		let work = TempDir::new().unwrap();
		let (mover, store) = fixture(&cloud, &state);

		let local = work.path().join("nested/dir/vimrc");
		let item = file_item("Vim", &local);
		let cloud_path = item.cloud_path(&cloud.path().join("configs"));
		fs::create_dir_all(cloud_path.parent().unwrap()).unwrap();
		fs::write(&cloud_path, b"set ts=4\n").unwrap();

		let outcome = mover.pull_file(&item, &local, &cloud_path, &store).await.unwrap();
		assert_eq!(outcome.files_copied, 1);
		assert_eq!(fs::read(&local).unwrap(), b"set ts=4\n");
	}

	#[tokio::test]
	async fn test_push_missing_source_fails() {
		let cloud = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		let work = TempDir::new().unwrap();
		let (mover, store) = fixture(&cloud, &state);

		let local = work.path().join("absent");
		let item = file_item("Vim", &local);
		let cloud_path = item.cloud_path(&cloud.path().join("configs"));

		let err = mover.push_file(&item, &local, &cloud_path, &store).await.unwrap_err();
		assert_eq!(err.kind, ErrorKind::FileNotFound);
		assert!(!cloud_path.exists());
	}

	#[tokio::test]
	async fn test_tree_copy_respects_excludes() {
		let cloud = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		let work = TempDir::new().unwrap();
		let (mover, _store) = fixture(&cloud, &state);

		let src = work.path().join("conf");
		fs::create_dir_all(src.join("sub")).unwrap();
		fs::write(src.join("keep.conf"), b"keep").unwrap();
		fs::write(src.join("sub/nested.conf"), b"nested").unwrap();
		fs::write(src.join("skip.swp"), b"swap").unwrap();

		let mut item = file_item("App", &src);
		item.kind = ItemKind::Folder;
		item.exclude_patterns.push("*.swp".to_string());

		let dst = cloud.path().join("configs/App");
		let cancel = CancellationToken::new();
		let outcome = mover.push_tree(&item, &src, &dst, &cancel).await.unwrap();

		assert_eq!(outcome.files_copied, 2);
		assert!(dst.join("keep.conf").exists());
		assert!(dst.join("sub/nested.conf").exists());
		assert!(!dst.join("skip.swp").exists());
	}

	#[tokio::test]
	async fn test_tree_copy_skips_unchanged_leaves() {
		let cloud = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		let work = TempDir::new().unwrap();
		let (mover, _store) = fixture(&cloud, &state);

		let src = work.path().join("conf");
		fs::create_dir_all(&src).unwrap();
		fs::write(src.join("a.conf"), b"one").unwrap();

		let mut item = file_item("App", &src);
		item.kind = ItemKind::Folder;
		let dst = cloud.path().join("configs/App");
		let cancel = CancellationToken::new();

		assert_eq!(mover.push_tree(&item, &src, &dst, &cancel).await.unwrap().files_copied, 1);
		// Second run copies nothing
		assert_eq!(mover.push_tree(&item, &src, &dst, &cancel).await.unwrap().files_copied, 0);
	}

	#[tokio::test]
	async fn test_cancelled_tree_copy_stops() {
		let cloud = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		let work = TempDir::new().unwrap();
		let (mover, _store) = fixture(&cloud, &state);

		let src = work.path().join("conf");
		fs::create_dir_all(&src).unwrap();
		fs::write(src.join("a.conf"), b"one").unwrap();

		let mut item = file_item("App", &src);
		item.kind = ItemKind::Folder;
		let cancel = CancellationToken::new();
		cancel.cancel();

		let err = mover
			.push_tree(&item, &src, &cloud.path().join("configs/App"), &cancel)
			.await
			.unwrap_err();
		assert!(err.to_string().contains("cancelled"));
	}

	#[tokio::test]
	async fn test_mirror_delete_removes_and_forgets() {
		let cloud = TempDir::new().unwrap();
		let state = TempDir::new().unwrap();
		let work = TempDir::new().unwrap();
		let (mover, store) = fixture(&cloud, &state);

		let local = work.path().join("vimrc");
		fs::write(&local, b"set ts=4\n").unwrap();
		let item = file_item("Vim", &local);
		let cloud_path = item.cloud_path(&cloud.path().join("configs"));
		mover.push_file(&item, &local, &cloud_path, &store).await.unwrap();

		// Local vanished; push mirrors the delete to the cloud
		fs::remove_file(&local).unwrap();
		let outcome =
			mover.mirror_delete(&item, &cloud_path, &local, &store, "push").await.unwrap();
		assert_eq!(outcome.files_copied, 1);
		assert!(!cloud_path.exists());
		assert!(store.load_metadata().await.unwrap().metadata.is_empty());
	}
}

// vim: ts=4
