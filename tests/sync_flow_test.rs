//! End-to-end sync scenarios across two simulated computers
//!
//! Each "host" gets its own state directory and computer id but shares one
//! rendezvous directory, mirroring two machines behind a cloud mount.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::TempDir;

use syncstation::cache::hash_bytes;
use syncstation::config::LocalConfig;
use syncstation::metadata::SyncItem;
use syncstation::sync::SyncEngine;
use syncstation::types::{ItemKind, SyncOperation};

struct Host {
	engine: SyncEngine,
	computer: String,
	_state: TempDir,
}

fn host(cloud: &Path, computer: &str) -> Host {
	let state = TempDir::new().unwrap();
	let config = LocalConfig {
		cloud_sync_dir: cloud.to_path_buf(),
		current_computer: computer.to_string(),
		..Default::default()
	};
	Host {
		engine: SyncEngine::new(config, state.path()),
		computer: computer.to_string(),
		_state: state,
	}
}

fn file_item(name: &str, computer: &str, local: &Path) -> SyncItem {
	let mut paths = BTreeMap::new();
	paths.insert(computer.to_string(), local.to_string_lossy().into_owned());
	SyncItem { name: name.to_string(), kind: ItemKind::File, paths, exclude_patterns: Vec::new() }
}

fn set_mtime(path: &Path, time: SystemTime) {
	let file = fs::File::options().write(true).open(path).unwrap();
	file.set_modified(time).unwrap();
}

/// First push: cloud absent, local content lands in the rendezvous and all
/// three records agree on the hash.
#[tokio::test]
async fn test_first_push() {
	let cloud = TempDir::new().unwrap();
	let work = TempDir::new().unwrap();
	let h1 = host(cloud.path(), "h1");

	let vimrc = work.path().join("vimrc");
	fs::write(&vimrc, b"set ts=4\n").unwrap();
	let expected_hash = hash_bytes(b"set ts=4\n");

	h1.engine.store().add_item(file_item("Vim", &h1.computer, &vimrc)).await.unwrap();
	let result = h1.engine.sync(SyncOperation::Push, Some("Vim"), false).await.unwrap();

	assert!(result.success, "push failed: {:?}", result.errors);
	assert_eq!(result.changed, 1);
	assert_eq!(result.skipped, 0);
	assert_eq!(result.errored, 0);

	let cloud_copy = cloud.path().join("configs/Vim");
	assert_eq!(fs::read(&cloud_copy).unwrap(), b"set ts=4\n");

	let states = h1.engine.store().load_states().await.unwrap();
	let state = states.get("Vim", &vimrc.to_string_lossy()).unwrap();
	assert_eq!(state.local_hash, expected_hash);

	let metadata = h1.engine.store().load_metadata().await.unwrap();
	let entry = metadata.get("Vim", &vimrc.to_string_lossy()).unwrap();
	assert_eq!(entry.last_cloud_hash(), Some(expected_hash.as_str()));
	assert_eq!(entry.computers["h1"].hash, expected_hash);
	assert_eq!(entry.updated_by, "h1");
}

/// Identical content is skipped, not rewritten, and the state record's
/// last-checked timestamp moves forward.
#[tokio::test]
async fn test_skip_on_identical_content() {
	let cloud = TempDir::new().unwrap();
	let work = TempDir::new().unwrap();
	let h1 = host(cloud.path(), "h1");

	let vimrc = work.path().join("vimrc");
	fs::write(&vimrc, b"set ts=4\n").unwrap();
	h1.engine.store().add_item(file_item("Vim", &h1.computer, &vimrc)).await.unwrap();
	h1.engine.sync(SyncOperation::Push, Some("Vim"), false).await.unwrap();

	let before = h1
		.engine
		.store()
		.load_states()
		.await
		.unwrap()
		.get("Vim", &vimrc.to_string_lossy())
		.unwrap()
		.clone();
	let cloud_mtime_before = fs::metadata(cloud.path().join("configs/Vim")).unwrap().modified().unwrap();

	let result = h1.engine.sync(SyncOperation::Smart, Some("Vim"), false).await.unwrap();
	assert_eq!(result.changed, 0);
	assert_eq!(result.skipped, 1);
	assert_eq!(result.errored, 0);

	// No cloud write happened
	let cloud_mtime_after = fs::metadata(cloud.path().join("configs/Vim")).unwrap().modified().unwrap();
	assert_eq!(cloud_mtime_before, cloud_mtime_after);

	// State refreshed, hash unchanged
	let after = h1
		.engine
		.store()
		.load_states()
		.await
		.unwrap()
		.get("Vim", &vimrc.to_string_lossy())
		.unwrap()
		.clone();
	assert_eq!(after.local_hash, before.local_hash);
	assert!(after.last_checked >= before.last_checked);
}

/// A second host with the same shared documents pulls the pushed content,
/// and the three-way equality holds on both hosts.
#[tokio::test]
async fn test_pull_on_second_host_round_trip() {
	let cloud = TempDir::new().unwrap();
	let work1 = TempDir::new().unwrap();
	let work2 = TempDir::new().unwrap();
	let h1 = host(cloud.path(), "h1");
	let h2 = host(cloud.path(), "h2");

	let vimrc1 = work1.path().join("vimrc");
	fs::write(&vimrc1, b"set ts=4\n").unwrap();
	h1.engine.store().add_item(file_item("Vim", &h1.computer, &vimrc1)).await.unwrap();
	h1.engine.sync(SyncOperation::Push, Some("Vim"), false).await.unwrap();

	// The registry is shared: h2 only adds its own path
	let vimrc2 = work2.path().join("vimrc");
	h2.engine.store().add_item(file_item("Vim", &h2.computer, &vimrc2)).await.unwrap();

	let result = h2.engine.sync(SyncOperation::Pull, Some("Vim"), false).await.unwrap();
	assert!(result.success, "pull failed: {:?}", result.errors);
	assert_eq!(result.changed, 1);
	assert_eq!(fs::read(&vimrc2).unwrap(), b"set ts=4\n");

	let expected_hash = hash_bytes(b"set ts=4\n");
	for (host, path) in [(&h1, &vimrc1), (&h2, &vimrc2)] {
		let states = host.engine.store().load_states().await.unwrap();
		let state = states.get("Vim", &path.to_string_lossy()).unwrap();
		assert_eq!(state.local_hash, expected_hash, "host {}", host.computer);

		let metadata = host.engine.store().load_metadata().await.unwrap();
		let entry = metadata.get("Vim", &path.to_string_lossy()).unwrap();
		assert_eq!(entry.last_cloud_hash(), Some(expected_hash.as_str()));
	}
}

/// Both sides edited since the last sync: the engine reports a conflict and
/// touches neither file; explicit push refuses without --force.
#[tokio::test]
async fn test_conflict_detection_both_modified() {
	let cloud = TempDir::new().unwrap();
	let work = TempDir::new().unwrap();
	let h1 = host(cloud.path(), "h1");

	let vimrc = work.path().join("vimrc");
	fs::write(&vimrc, b"set ts=4\n").unwrap();
	h1.engine.store().add_item(file_item("Vim", &h1.computer, &vimrc)).await.unwrap();
	h1.engine.sync(SyncOperation::Push, Some("Vim"), false).await.unwrap();

	// h1 edits the local copy; independently the cloud copy changes too
	// (another host pushed), with the same mtime on both sides
	let cloud_copy = cloud.path().join("configs/Vim");
	fs::write(&vimrc, b"set ts=8\n").unwrap();
	fs::write(&cloud_copy, b"set ts=2\n").unwrap();
	let stamp = SystemTime::now();
	set_mtime(&vimrc, stamp);
	set_mtime(&cloud_copy, stamp);

	let result = h1.engine.sync(SyncOperation::Smart, Some("Vim"), false).await.unwrap();
	assert!(!result.success);
	assert_eq!(result.errored, 1);
	assert_eq!(result.changed, 0);
	let message = result.errors[0].to_string();
	assert!(message.contains("both modified"), "unexpected error: {}", message);

	// Neither side was touched
	assert_eq!(fs::read(&vimrc).unwrap(), b"set ts=8\n");
	assert_eq!(fs::read(&cloud_copy).unwrap(), b"set ts=2\n");

	// Explicit push is gated on the same conflict
	let gated = h1.engine.sync(SyncOperation::Push, Some("Vim"), false).await.unwrap();
	assert!(!gated.success);
	assert_eq!(gated.changed, 0);
	assert!(gated.message.contains("--force"));
	assert_eq!(fs::read(&cloud_copy).unwrap(), b"set ts=2\n");

	// --force bypasses the gate and mirrors local over cloud
	let forced = h1.engine.sync(SyncOperation::Push, Some("Vim"), true).await.unwrap();
	assert!(forced.success, "forced push failed: {:?}", forced.errors);
	assert_eq!(fs::read(&cloud_copy).unwrap(), b"set ts=8\n");
}

/// A writer that died between write and rename leaves the target intact;
/// the next sync sweeps its temp file away.
#[tokio::test]
async fn test_interrupted_write_leaves_target_and_no_temp() {
	let cloud = TempDir::new().unwrap();
	let work = TempDir::new().unwrap();
	let h1 = host(cloud.path(), "h1");

	let vimrc = work.path().join("vimrc");
	fs::write(&vimrc, b"set ts=4\n").unwrap();
	h1.engine.store().add_item(file_item("Vim", &h1.computer, &vimrc)).await.unwrap();
	h1.engine.sync(SyncOperation::Push, Some("Vim"), false).await.unwrap();

	// Simulate a killed writer: a partial temp file next to the target
	let configs = cloud.path().join("configs");
	let stray = configs.join(".Vim.tmp.deadbeef");
	fs::write(&stray, b"new\n").unwrap();

	let cloud_copy = configs.join("Vim");
	assert_eq!(fs::read(&cloud_copy).unwrap(), b"set ts=4\n");

	let result = h1.engine.sync(SyncOperation::Smart, Some("Vim"), false).await.unwrap();
	assert!(result.success);
	assert_eq!(fs::read(&cloud_copy).unwrap(), b"set ts=4\n");
	assert!(!stray.exists(), "stale temp file should have been cleaned");
}

/// Pulling into a host with no cloud copy and no local copy skips cleanly.
#[tokio::test]
async fn test_nothing_to_do() {
	let cloud = TempDir::new().unwrap();
	let work = TempDir::new().unwrap();
	let h1 = host(cloud.path(), "h1");

	let missing = work.path().join("nope.conf");
	// add requires an existing path, so register the item directly
	h1.engine
		.store()
		.save_items(&syncstation::metadata::SyncItemsData {
			sync_items: vec![file_item("Ghost", &h1.computer, &missing)],
		})
		.await
		.unwrap();

	let result = h1.engine.sync(SyncOperation::Smart, None, false).await.unwrap();
	assert!(result.success);
	assert_eq!(result.changed, 0);
	assert_eq!(result.skipped, 1);
}

/// Unknown item names fail before any work happens.
#[tokio::test]
async fn test_unknown_item_is_an_error() {
	let cloud = TempDir::new().unwrap();
	let h1 = host(cloud.path(), "h1");
	let err = h1.engine.sync(SyncOperation::Smart, Some("Nope"), false).await.unwrap_err();
	assert!(err.to_string().contains("no such sync item"));
}

/// Folder items mirror their tree, honoring exclude patterns, and a
/// re-push copies nothing.
#[tokio::test]
async fn test_folder_push_and_status() {
	let cloud = TempDir::new().unwrap();
	let work = TempDir::new().unwrap();
	let h1 = host(cloud.path(), "h1");

	let tree = work.path().join("nvim");
	fs::create_dir_all(tree.join("lua")).unwrap();
	fs::write(tree.join("init.lua"), b"-- init\n").unwrap();
	fs::write(tree.join("lua/opts.lua"), b"-- opts\n").unwrap();
	fs::write(tree.join("init.lua.swp"), b"swap").unwrap();

	let mut item = file_item("Neovim", &h1.computer, &tree);
	item.kind = ItemKind::Folder;
	item.exclude_patterns.push("*.swp".to_string());
	h1.engine.store().add_item(item).await.unwrap();

	let result = h1.engine.sync(SyncOperation::Push, Some("Neovim"), false).await.unwrap();
	assert!(result.success, "push failed: {:?}", result.errors);
	assert_eq!(result.changed, 2);

	let mirror = cloud.path().join("configs/Neovim");
	assert!(mirror.join("init.lua").exists());
	assert!(mirror.join("lua/opts.lua").exists());
	assert!(!mirror.join("init.lua.swp").exists());

	let again = h1.engine.sync(SyncOperation::Push, Some("Neovim"), false).await.unwrap();
	assert_eq!(again.changed, 0);

	let status = h1.engine.status(Some("Neovim")).await.unwrap();
	assert_eq!(status.len(), 1);
	assert_eq!(status[0].cloud_path, PathBuf::from(mirror));
}

/// Overwritten content is recoverable: a forced pull over a locally edited
/// file first lands the edit in the backup manager.
#[tokio::test]
async fn test_overwrite_takes_pre_sync_backup() {
	let cloud = TempDir::new().unwrap();
	let work = TempDir::new().unwrap();
	let h1 = host(cloud.path(), "h1");

	let vimrc = work.path().join("vimrc");
	fs::write(&vimrc, b"set ts=4\n").unwrap();
	h1.engine.store().add_item(file_item("Vim", &h1.computer, &vimrc)).await.unwrap();
	h1.engine.sync(SyncOperation::Push, Some("Vim"), false).await.unwrap();

	// Local edit, then a forced pull discards it from the working copy
	fs::write(&vimrc, b"set ts=8, precious local edit\n").unwrap();
	let result = h1.engine.sync(SyncOperation::Pull, Some("Vim"), true).await.unwrap();
	assert!(result.success, "pull failed: {:?}", result.errors);
	assert_eq!(fs::read(&vimrc).unwrap(), b"set ts=4\n");

	// The discarded edit is in the backup manager
	let backups = h1.engine.backups().list_backups(Some("Vim")).unwrap();
	assert!(!backups.is_empty());
	let newest = &backups[0];
	assert_eq!(newest.reason, "pre_sync");
	let recovered = work.path().join("recovered");
	h1.engine.backups().restore_file(&newest.id, &recovered).unwrap();
	assert_eq!(fs::read(&recovered).unwrap(), b"set ts=8, precious local edit\n");
}

/// Explicit push mirrors deletions: a vanished local file removes the
/// cloud copy and the shared records.
#[tokio::test]
async fn test_push_mirrors_deletion() {
	let cloud = TempDir::new().unwrap();
	let work = TempDir::new().unwrap();
	let h1 = host(cloud.path(), "h1");

	let vimrc = work.path().join("vimrc");
	fs::write(&vimrc, b"set ts=4\n").unwrap();
	h1.engine.store().add_item(file_item("Vim", &h1.computer, &vimrc)).await.unwrap();
	h1.engine.sync(SyncOperation::Push, Some("Vim"), false).await.unwrap();

	fs::remove_file(&vimrc).unwrap();
	let result = h1.engine.sync(SyncOperation::Push, Some("Vim"), false).await.unwrap();
	assert!(result.success, "push failed: {:?}", result.errors);
	assert_eq!(result.changed, 1);

	assert!(!cloud.path().join("configs/Vim").exists());
	let metadata = h1.engine.store().load_metadata().await.unwrap();
	assert!(metadata.get("Vim", &vimrc.to_string_lossy()).is_none());
}

// vim: ts=4
