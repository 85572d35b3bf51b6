//! Document store: lazy loads, atomic saves, git-aware metadata
//!
//! Documents are held in memory only for the duration of one
//! read-modify-write, then persisted through the atomic writer. Within one
//! process a single async mutex serializes those cycles; across processes
//! on different computers the shared documents are last-writer-wins (the
//! backup manager is the recovery path).

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use super::git_notes;
use super::{FileMetadataData, FileStatesData, SyncItem, SyncItemsData};
use crate::atomic;
use crate::config::LocalConfig;
use crate::error::{ErrorKind, SyncError};
use crate::logging::*;
use crate::validation;

/// What `remove` should do with an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveMode {
	/// Drop only this computer's path; keep the item for other computers
	LocalOnly,

	/// Drop the item from the registry, keep the cloud mirror
	Global,

	/// Drop the item, its cloud mirror and its shared metadata
	DeleteCloud,
}

/// Access point for all three document families
pub struct MetadataStore {
	config: LocalConfig,
	file_states_path: PathBuf,
	write_lock: Mutex<()>,
}

impl MetadataStore {
	/// `state_dir` is the per-computer directory holding local-only
	/// documents; shared documents resolve through `config`.
	pub fn new(config: LocalConfig, state_dir: &Path) -> MetadataStore {
		MetadataStore {
			config,
			file_states_path: state_dir.join("file-states.json"),
			write_lock: Mutex::new(()),
		}
	}

	pub fn config(&self) -> &LocalConfig {
		&self.config
	}

	fn git_repo(&self) -> Option<&Path> {
		if self.config.git_mode {
			self.config.git_repo_root.as_deref()
		} else {
			None
		}
	}

	// ---- registry -------------------------------------------------------

	pub async fn load_items(&self) -> Result<SyncItemsData, SyncError> {
		load_document(&self.config.sync_items_path(), "sync-items").await
	}

	pub async fn save_items(&self, items: &SyncItemsData) -> Result<(), SyncError> {
		save_document(&self.config.sync_items_path(), "sync-items", items)
	}

	/// Validate and register a new item, or extend an existing item with
	/// this computer's path.
	pub async fn add_item(&self, item: SyncItem) -> Result<(), SyncError> {
		validation::validate_item_name(&item.name)
			.map_err(|e| SyncError::from(e).with_item(&item.name))?;
		validation::validate_exclude_patterns(&item.exclude_patterns)
			.map_err(|e| SyncError::from(e).with_item(&item.name))?;
		for (computer_id, path) in &item.paths {
			validation::validate_computer_id(computer_id)
				.map_err(|e| SyncError::from(e).with_item(&item.name))?;
			validation::validate_local_path(path)
				.map_err(|e| SyncError::from(e).with_item(&item.name))?;
		}

		let _guard = self.write_lock.lock().await;
		let mut items = self.load_items().await?;

		if items.slug_collides(&item.name) {
			return Err(SyncError::new(ErrorKind::Validation, "add")
				.with_item(&item.name)
				.with_message("another item maps to the same cloud directory name"));
		}

		match items.find_mut(&item.name) {
			Some(existing) => {
				// Same item registered from another computer: merge paths
				for (computer_id, path) in item.paths {
					existing.paths.insert(computer_id, path);
				}
			}
			None => items.sync_items.push(item),
		}

		self.save_items(&items).await
	}

	/// Apply one of the three remove semantics. Returns the removed or
	/// modified item definition.
	pub async fn remove_item(
		&self,
		name: &str,
		computer_id: &str,
		mode: RemoveMode,
	) -> Result<SyncItem, SyncError> {
		let _guard = self.write_lock.lock().await;
		let mut items = self.load_items().await?;

		let Some(existing) = items.find(name).cloned() else {
			return Err(SyncError::new(ErrorKind::FileNotFound, "remove")
				.with_item(name)
				.with_message("no such sync item"));
		};

		match mode {
			RemoveMode::LocalOnly => {
				let item = items.find_mut(name).expect("item just found");
				item.paths.remove(computer_id);
				let updated = item.clone();
				self.save_items(&items).await?;
				Ok(updated)
			}
			RemoveMode::Global => {
				items.remove(name);
				self.save_items(&items).await?;
				Ok(existing)
			}
			RemoveMode::DeleteCloud => {
				items.remove(name);
				self.save_items(&items).await?;

				let cloud_path = existing.cloud_path(&self.config.cloud_configs_path());
				remove_cloud_entry(&cloud_path).await?;

				let mut metadata = self.load_metadata_locked().await?;
				metadata.remove_item(name);
				self.save_metadata_locked(&metadata).await?;

				let mut states = self.load_states().await?;
				states.remove_item(name);
				self.save_states(&states)?;

				Ok(existing)
			}
		}
	}

	// ---- local file states ----------------------------------------------

	pub async fn load_states(&self) -> Result<FileStatesData, SyncError> {
		load_document(&self.file_states_path, "file-states").await
	}

	pub fn save_states(&self, states: &FileStatesData) -> Result<(), SyncError> {
		save_document(&self.file_states_path, "file-states", states)
	}

	// ---- shared file metadata -------------------------------------------

	pub async fn load_metadata(&self) -> Result<FileMetadataData, SyncError> {
		self.load_metadata_locked().await
	}

	async fn load_metadata_locked(&self) -> Result<FileMetadataData, SyncError> {
		if let Some(repo) = self.git_repo() {
			let content = git_notes::load_notes(repo, git_notes::METADATA_NOTES_REF).await?;
			return match content {
				None => Ok(FileMetadataData::default()),
				Some(text) => serde_json::from_str(&text).map_err(|e| {
					SyncError::new(ErrorKind::ConfigLoad, "load-file-metadata")
						.with_path(repo)
						.with_source(e)
				}),
			};
		}
		load_document(&self.config.file_metadata_path(), "file-metadata").await
	}

	pub async fn save_metadata(&self, metadata: &FileMetadataData) -> Result<(), SyncError> {
		self.save_metadata_locked(metadata).await
	}

	async fn save_metadata_locked(&self, metadata: &FileMetadataData) -> Result<(), SyncError> {
		if let Some(repo) = self.git_repo() {
			let json = serde_json::to_string_pretty(metadata).map_err(|e| {
				SyncError::new(ErrorKind::ConfigSave, "save-file-metadata")
					.with_path(repo)
					.with_source(e)
			})?;
			return git_notes::save_notes(repo, git_notes::METADATA_NOTES_REF, &json).await;
		}
		save_document(&self.config.file_metadata_path(), "file-metadata", metadata)
	}

	// ---- combined read-modify-write cycles ------------------------------

	/// Record a completed file transfer: local state plus the shared
	/// record (this computer's observation and the rendezvous digest).
	/// Both documents key the file by this computer's local path.
	#[allow(clippy::too_many_arguments)]
	pub async fn record_file_sync(
		&self,
		item: &str,
		local_path: &Path,
		hash: &str,
		local_mtime: DateTime<Utc>,
		local_size: u64,
		cloud_mtime: DateTime<Utc>,
	) -> Result<(), SyncError> {
		let _guard = self.write_lock.lock().await;
		let file_key = local_path.to_string_lossy();
		let file_key = file_key.as_ref();

		let mut states = self.load_states().await?;
		states.update(item, file_key, hash.to_string(), local_mtime, local_size);
		self.save_states(&states)?;

		let computer = &self.config.current_computer;
		let mut metadata = self.load_metadata_locked().await?;
		metadata.update_computer(item, file_key, computer, hash.to_string(), local_mtime);
		metadata.update_cloud(item, file_key, computer, hash.to_string(), cloud_mtime);
		self.save_metadata_locked(&metadata).await
	}

	/// Confirm an already-in-sync file (refreshes `last_checked`, and seeds
	/// the state entry when this computer has never recorded one).
	pub async fn confirm_in_sync(
		&self,
		item: &str,
		local_path: &Path,
		hash: &str,
		local_mtime: DateTime<Utc>,
		local_size: u64,
	) -> Result<(), SyncError> {
		let _guard = self.write_lock.lock().await;
		let mut states = self.load_states().await?;
		let key = local_path.to_string_lossy();
		match states.get(item, &key) {
			Some(state) if state.local_hash == hash => states.touch(item, &key),
			_ => states.update(item, &key, hash.to_string(), local_mtime, local_size),
		}
		self.save_states(&states)
	}

	/// Forget one file everywhere after a mirror delete
	pub async fn forget_file(&self, item: &str, local_path: &Path) -> Result<(), SyncError> {
		let _guard = self.write_lock.lock().await;
		let file_key = local_path.to_string_lossy();

		let mut states = self.load_states().await?;
		states.remove_file(item, &file_key);
		self.save_states(&states)?;

		let mut metadata = self.load_metadata_locked().await?;
		metadata.remove_file(item, &file_key);
		self.save_metadata_locked(&metadata).await
	}

	/// Seed the shared documents on first initialization
	pub async fn seed_shared_documents(&self) -> Result<(), SyncError> {
		let _guard = self.write_lock.lock().await;
		let items_path = self.config.sync_items_path();
		if !items_path.exists() {
			info!("seeding {}", items_path.display());
			save_document(&items_path, "sync-items", &SyncItemsData::default())?;
		}
		if self.git_repo().is_none() {
			let metadata_path = self.config.file_metadata_path();
			if !metadata_path.exists() {
				info!("seeding {}", metadata_path.display());
				save_document(&metadata_path, "file-metadata", &FileMetadataData::default())?;
			}
		}
		Ok(())
	}
}

async fn remove_cloud_entry(path: &Path) -> Result<(), SyncError> {
	match tokio::fs::metadata(path).await {
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
		Err(e) => Err(SyncError::from_io("remove", path, e)),
		Ok(metadata) if metadata.is_dir() => tokio::fs::remove_dir_all(path)
			.await
			.map_err(|e| SyncError::from_io("remove", path, e)),
		Ok(_) => {
			tokio::fs::remove_file(path).await.map_err(|e| SyncError::from_io("remove", path, e))
		}
	}
}

/// Load a JSON document, treating a missing file as the empty document
async fn load_document<T: serde::de::DeserializeOwned + Default>(
	path: &Path,
	what: &str,
) -> Result<T, SyncError> {
	let contents = match tokio::fs::read_to_string(path).await {
		Ok(contents) => contents,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
		Err(e) => {
			return Err(SyncError::new(ErrorKind::ConfigLoad, format!("load-{}", what))
				.with_path(path)
				.with_source(e));
		}
	};
	serde_json::from_str(&contents).map_err(|e| {
		SyncError::new(ErrorKind::ConfigLoad, format!("load-{}", what))
			.with_path(path)
			.with_source(e)
	})
}

/// Persist a JSON document through the atomic writer, pretty-printed
fn save_document<T: serde::Serialize>(path: &Path, what: &str, doc: &T) -> Result<(), SyncError> {
	let json = serde_json::to_vec_pretty(doc).map_err(|e| {
		SyncError::new(ErrorKind::ConfigSave, format!("save-{}", what))
			.with_path(path)
			.with_source(e)
	})?;
	atomic::write_file_atomic(path, &json, None)
}


// vim: ts=4
