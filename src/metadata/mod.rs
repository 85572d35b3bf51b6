//! Shared and local metadata documents
//!
//! Three independent document families, all keyed by (item name, file path):
//!
//! - the sync-item registry (`sync-items.json`, shared),
//! - per-computer file states (`file-states.json`, local only),
//! - file metadata (`file-metadata.json`, shared; git notes in git mode).
//!
//! There are no cross-document references; "the other side" of a key is
//! always found by looking the same key up in another document. The shared
//! metadata is written by every computer but keyed by each computer's own
//! local path, so the recorded `cloudHash` means "the rendezvous content at
//! *this* computer's last sync" and one computer's update never clobbers
//! another's anchor.

mod git_notes;
mod store;

pub use git_notes::{load_notes, save_notes, METADATA_NOTES_REF};
pub use store::{MetadataStore, RemoveMode};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::paths;
use crate::types::ItemKind;

/// A named configuration (file or folder) participating in synchronization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncItem {
	/// Unique, validator-checked identifier
	pub name: String,

	/// File or folder
	#[serde(rename = "type")]
	pub kind: ItemKind,

	/// Computer id -> local path (may contain `~` and `$VAR`)
	pub paths: BTreeMap<String, String>,

	/// Glob patterns excluded from tree synchronization, in order
	#[serde(default)]
	pub exclude_patterns: Vec<String>,
}

impl SyncItem {
	/// Expanded local path for `computer_id`, when one is registered
	pub fn local_path(&self, computer_id: &str) -> Option<PathBuf> {
		self.paths.get(computer_id).map(|p| paths::expand_path(p))
	}

	/// Rendezvous mirror path for this item
	pub fn cloud_path(&self, configs_root: &Path) -> PathBuf {
		paths::item_cloud_path(configs_root, &self.name)
	}
}

/// The shared sync-item registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncItemsData {
	pub sync_items: Vec<SyncItem>,
}

impl SyncItemsData {
	pub fn find(&self, name: &str) -> Option<&SyncItem> {
		self.sync_items.iter().find(|item| item.name == name)
	}

	pub fn find_mut(&mut self, name: &str) -> Option<&mut SyncItem> {
		self.sync_items.iter_mut().find(|item| item.name == name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.find(name).is_some()
	}

	/// True when some existing item's cloud slug collides with `name`'s
	pub fn slug_collides(&self, name: &str) -> bool {
		let slug = paths::slug(name);
		self.sync_items.iter().any(|item| item.name != name && paths::slug(&item.name) == slug)
	}

	/// Remove an item entirely; returns it when present
	pub fn remove(&mut self, name: &str) -> Option<SyncItem> {
		let idx = self.sync_items.iter().position(|item| item.name == name)?;
		Some(self.sync_items.remove(idx))
	}
}

/// Last observed committed local state of one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
	/// `sha256:`-prefixed digest of the local file
	pub local_hash: String,

	/// Local mtime, RFC-3339
	pub mod_time: String,

	/// Size in bytes
	pub size: u64,

	/// When this state was last confirmed, RFC-3339
	pub last_checked: String,
}

/// Local file-state cache: item name -> local path -> state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileStatesData {
	pub states: BTreeMap<String, BTreeMap<String, FileState>>,
}

impl FileStatesData {
	pub fn get(&self, item: &str, file_path: &str) -> Option<&FileState> {
		self.states.get(item)?.get(file_path)
	}

	pub fn update(
		&mut self,
		item: &str,
		file_path: &str,
		hash: String,
		mod_time: DateTime<Utc>,
		size: u64,
	) {
		self.states.entry(item.to_string()).or_default().insert(
			file_path.to_string(),
			FileState {
				local_hash: hash,
				mod_time: mod_time.to_rfc3339(),
				size,
				last_checked: Utc::now().to_rfc3339(),
			},
		);
	}

	/// Confirm an unchanged state, refreshing only `last_checked`
	pub fn touch(&mut self, item: &str, file_path: &str) {
		if let Some(state) = self.states.get_mut(item).and_then(|m| m.get_mut(file_path)) {
			state.last_checked = Utc::now().to_rfc3339();
		}
	}

	pub fn remove_file(&mut self, item: &str, file_path: &str) {
		if let Some(files) = self.states.get_mut(item) {
			files.remove(file_path);
			if files.is_empty() {
				self.states.remove(item);
			}
		}
	}

	pub fn remove_item(&mut self, item: &str) {
		self.states.remove(item);
	}
}

/// One computer's last observation of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputerFileInfo {
	pub hash: String,

	/// RFC-3339
	pub mod_time: String,
}

/// Shared metadata for one file of one item
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileMetadata {
	/// Computer id -> last observed local hash and mtime on that computer
	pub computers: BTreeMap<String, ComputerFileInfo>,

	/// Digest observed in the rendezvous at the last successful sync;
	/// empty until a first push completes
	pub cloud_hash: String,

	/// Rendezvous mtime at the last successful sync, RFC-3339
	pub cloud_mod_time: String,

	/// When any computer last updated this record, RFC-3339
	pub last_updated: String,

	/// Computer id that performed the last update
	pub updated_by: String,
}

impl FileMetadata {
	/// The anchor hash for three-way decisions, when one was recorded
	pub fn last_cloud_hash(&self) -> Option<&str> {
		if self.cloud_hash.is_empty() {
			None
		} else {
			Some(&self.cloud_hash)
		}
	}
}

/// Shared document: item name -> file path -> metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FileMetadataData {
	pub metadata: BTreeMap<String, BTreeMap<String, FileMetadata>>,
}

impl FileMetadataData {
	pub fn get(&self, item: &str, file_key: &str) -> Option<&FileMetadata> {
		self.metadata.get(item)?.get(file_key)
	}

	fn entry(&mut self, item: &str, file_key: &str) -> &mut FileMetadata {
		self.metadata.entry(item.to_string()).or_default().entry(file_key.to_string()).or_default()
	}

	/// Record one computer's observation of its local copy
	pub fn update_computer(
		&mut self,
		item: &str,
		file_key: &str,
		computer_id: &str,
		hash: String,
		mod_time: DateTime<Utc>,
	) {
		let entry = self.entry(item, file_key);
		entry
			.computers
			.insert(computer_id.to_string(), ComputerFileInfo { hash, mod_time: mod_time.to_rfc3339() });
		entry.last_updated = Utc::now().to_rfc3339();
		entry.updated_by = computer_id.to_string();
	}

	/// Record the rendezvous-side digest after a completed push or pull
	pub fn update_cloud(
		&mut self,
		item: &str,
		file_key: &str,
		computer_id: &str,
		cloud_hash: String,
		cloud_mod_time: DateTime<Utc>,
	) {
		let entry = self.entry(item, file_key);
		entry.cloud_hash = cloud_hash;
		entry.cloud_mod_time = cloud_mod_time.to_rfc3339();
		entry.last_updated = Utc::now().to_rfc3339();
		entry.updated_by = computer_id.to_string();
	}

	pub fn remove_file(&mut self, item: &str, file_key: &str) {
		if let Some(files) = self.metadata.get_mut(item) {
			files.remove(file_key);
			if files.is_empty() {
				self.metadata.remove(item);
			}
		}
	}

	pub fn remove_item(&mut self, item: &str) {
		self.metadata.remove(item);
	}
}


// vim: ts=4
