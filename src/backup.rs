//! Content-addressed backups with rollback
//!
//! Payloads live under `{backup_dir}/files/{id}` and are indexed by a JSON
//! manifest. Backups are content-addressed per item: re-backing-up
//! identical bytes refreshes the existing entry instead of storing a second
//! copy. Every insert is followed by an eviction pass dropping entries past
//! the per-item count limit or older than the age limit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::atomic;
use crate::cache;
use crate::error::{ErrorKind, SyncError};
use crate::logging::*;

const MANIFEST_VERSION: &str = "1.0";
const DEFAULT_MAX_BACKUPS: usize = 50;
const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// One stored backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
	pub id: String,
	pub item_name: String,
	pub original_path: PathBuf,
	pub backup_path: PathBuf,
	pub hash: String,
	pub size: u64,
	pub created_at: DateTime<Utc>,
	pub created_by: String,
	pub reason: String,
	#[serde(default)]
	pub tags: Vec<String>,
}

/// The manifest indexing all payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupManifest {
	pub version: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub entries: Vec<BackupEntry>,
}

impl Default for BackupManifest {
	fn default() -> Self {
		let now = Utc::now();
		BackupManifest {
			version: MANIFEST_VERSION.to_string(),
			created_at: now,
			updated_at: now,
			entries: Vec::new(),
		}
	}
}

/// Aggregate backup statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
	pub total_backups: usize,
	pub item_counts: BTreeMap<String, usize>,
	pub total_size: u64,
	pub oldest_backup: Option<DateTime<Utc>>,
	pub newest_backup: Option<DateTime<Utc>>,
}

/// Progress of one rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackStatus {
	Pending,
	Success,
	Failed,
}

/// Record of a rollback attempt, including the safety backup taken first
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOperation {
	pub id: String,
	pub item_name: String,
	pub backup_id: String,
	pub target_path: PathBuf,
	pub executed_at: DateTime<Utc>,
	pub executed_by: String,
	pub status: RollbackStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub pre_rollback: Option<BackupEntry>,
}

/// Manages the backup directory. Single writer per process; concurrent
/// processes on one backup directory are not supported.
pub struct BackupManager {
	backup_dir: PathBuf,
	manifest_path: PathBuf,
	max_backups: usize,
	max_age: Duration,
	created_by: String,
}

impl BackupManager {
	pub fn new(backup_dir: impl Into<PathBuf>, created_by: impl Into<String>) -> BackupManager {
		let backup_dir = backup_dir.into();
		BackupManager {
			manifest_path: backup_dir.join("manifest.json"),
			backup_dir,
			max_backups: DEFAULT_MAX_BACKUPS,
			max_age: DEFAULT_MAX_AGE,
			created_by: created_by.into(),
		}
	}

	pub fn with_max_backups(mut self, max: usize) -> Self {
		self.max_backups = max;
		self
	}

	pub fn with_max_age(mut self, age: Duration) -> Self {
		self.max_age = age;
		self
	}

	/// Back up one file. Identical content for the same item refreshes the
	/// existing entry (timestamp, reason, tags) and stores no second copy.
	pub fn backup_file(
		&self,
		item_name: &str,
		file_path: &Path,
		reason: &str,
		tags: &[String],
	) -> Result<BackupEntry, SyncError> {
		let metadata = std::fs::metadata(file_path)
			.map_err(|e| SyncError::from_io("backup", file_path, e).with_item(item_name))?;
		let hash = cache::hash_file(file_path).map_err(|e| e.with_item(item_name))?;

		let mut manifest = self.load_manifest()?;

		if let Some(entry) = manifest
			.entries
			.iter_mut()
			.find(|e| e.item_name == item_name && e.hash == hash)
		{
			entry.created_at = Utc::now();
			entry.reason = reason.to_string();
			entry.tags = tags.to_vec();
			entry.original_path = file_path.to_path_buf();
			let refreshed = entry.clone();
			manifest.updated_at = Utc::now();
			self.save_manifest(&manifest)?;
			debug!("backup of {} deduplicated onto {}", file_path.display(), refreshed.id);
			return Ok(refreshed);
		}

		let id = self.generate_backup_id(item_name, &hash);
		let backup_path = self.backup_dir.join("files").join(&id);
		atomic::copy_file_atomic(file_path, &backup_path)
			.map_err(|e| e.with_item(item_name))?;

		let entry = BackupEntry {
			id,
			item_name: item_name.to_string(),
			original_path: file_path.to_path_buf(),
			backup_path,
			hash,
			size: metadata.len(),
			created_at: Utc::now(),
			created_by: self.created_by.clone(),
			reason: reason.to_string(),
			tags: tags.to_vec(),
		};
		manifest.entries.push(entry.clone());
		manifest.updated_at = Utc::now();

		self.evict_for_item(&mut manifest, item_name);
		self.save_manifest(&manifest)?;
		Ok(entry)
	}

	/// Copy a stored backup over `target`
	pub fn restore_file(&self, backup_id: &str, target: &Path) -> Result<(), SyncError> {
		let manifest = self.load_manifest()?;
		let entry = manifest.entries.iter().find(|e| e.id == backup_id).ok_or_else(|| {
			SyncError::new(ErrorKind::FileNotFound, "restore")
				.with_path(target)
				.with_message(format!("backup '{}' not found", backup_id))
		})?;

		if !entry.backup_path.exists() {
			return Err(SyncError::new(ErrorKind::FileNotFound, "restore")
				.with_item(&entry.item_name)
				.with_path(&entry.backup_path)
				.with_message("backup payload is missing"));
		}

		atomic::copy_file_atomic(&entry.backup_path, target)
			.map_err(|e| e.with_item(&entry.item_name))?;
		info!("restored {} from backup {}", target.display(), backup_id);
		Ok(())
	}

	/// Restore with a safety net: the current target content is backed up
	/// first (tagged `rollback`), so a bad restore can itself be undone.
	pub fn execute_rollback(
		&self,
		item_name: &str,
		backup_id: &str,
		target: &Path,
	) -> Result<RollbackOperation, SyncError> {
		let pre_rollback = if target.exists() {
			Some(self.backup_file(
				item_name,
				target,
				"pre_rollback",
				&["rollback".to_string()],
			)?)
		} else {
			None
		};

		let mut operation = RollbackOperation {
			id: format!("rollback_{}", Utc::now().format("%Y%m%d_%H%M%S_%f")),
			item_name: item_name.to_string(),
			backup_id: backup_id.to_string(),
			target_path: target.to_path_buf(),
			executed_at: Utc::now(),
			executed_by: self.created_by.clone(),
			status: RollbackStatus::Pending,
			error: None,
			pre_rollback,
		};

		match self.restore_file(backup_id, target) {
			Ok(()) => {
				operation.status = RollbackStatus::Success;
				Ok(operation)
			}
			Err(e) => {
				// The pre-rollback backup remains as the recovery path
				operation.status = RollbackStatus::Failed;
				operation.error = Some(e.to_string());
				error!("rollback of {} failed: {}", item_name, e);
				Err(e)
			}
		}
	}

	/// Backups for one item, or all items, newest first
	pub fn list_backups(&self, item_name: Option<&str>) -> Result<Vec<BackupEntry>, SyncError> {
		let manifest = self.load_manifest()?;
		let mut entries: Vec<BackupEntry> = manifest
			.entries
			.into_iter()
			.filter(|e| item_name.map_or(true, |name| e.item_name == name))
			.collect();
		entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		Ok(entries)
	}

	/// Delete one backup and its payload
	pub fn delete_backup(&self, backup_id: &str) -> Result<(), SyncError> {
		let mut manifest = self.load_manifest()?;
		let idx = manifest.entries.iter().position(|e| e.id == backup_id).ok_or_else(|| {
			SyncError::new(ErrorKind::FileNotFound, "delete-backup")
				.with_message(format!("backup '{}' not found", backup_id))
		})?;

		let entry = manifest.entries.remove(idx);
		if entry.backup_path.exists() {
			std::fs::remove_file(&entry.backup_path)
				.map_err(|e| SyncError::from_io("delete-backup", &entry.backup_path, e))?;
		}
		manifest.updated_at = Utc::now();
		self.save_manifest(&manifest)
	}

	/// Manifest-wide eviction pass over every item
	pub fn cleanup(&self) -> Result<usize, SyncError> {
		let mut manifest = self.load_manifest()?;
		let items: Vec<String> =
			manifest.entries.iter().map(|e| e.item_name.clone()).collect();
		let before = manifest.entries.len();
		for item in items {
			self.evict_for_item(&mut manifest, &item);
		}
		let removed = before - manifest.entries.len();
		if removed > 0 {
			manifest.updated_at = Utc::now();
			self.save_manifest(&manifest)?;
		}
		Ok(removed)
	}

	pub fn stats(&self) -> Result<BackupStats, SyncError> {
		let manifest = self.load_manifest()?;
		let mut stats = BackupStats {
			total_backups: manifest.entries.len(),
			item_counts: BTreeMap::new(),
			total_size: 0,
			oldest_backup: None,
			newest_backup: None,
		};
		for entry in &manifest.entries {
			*stats.item_counts.entry(entry.item_name.clone()).or_insert(0) += 1;
			stats.total_size += entry.size;
			if stats.oldest_backup.map_or(true, |t| entry.created_at < t) {
				stats.oldest_backup = Some(entry.created_at);
			}
			if stats.newest_backup.map_or(true, |t| entry.created_at > t) {
				stats.newest_backup = Some(entry.created_at);
			}
		}
		Ok(stats)
	}

	/// Keep an item's newest entries: drop those beyond the count limit or
	/// older than the age limit, payloads included.
	fn evict_for_item(&self, manifest: &mut BackupManifest, item_name: &str) {
		let mut item_entries: Vec<(usize, DateTime<Utc>, String)> = manifest
			.entries
			.iter()
			.enumerate()
			.filter(|(_, e)| e.item_name == item_name)
			.map(|(i, e)| (i, e.created_at, e.id.clone()))
			.collect();
		item_entries.sort_by(|a, b| b.1.cmp(&a.1));

		let now = Utc::now();
		let max_age = chrono::Duration::from_std(self.max_age)
			.unwrap_or_else(|_| chrono::Duration::days(30));

		let mut doomed: Vec<String> = Vec::new();
		for (rank, (_, created_at, id)) in item_entries.iter().enumerate() {
			if rank >= self.max_backups || now - *created_at > max_age {
				doomed.push(id.clone());
			}
		}

		for id in doomed {
			if let Some(idx) = manifest.entries.iter().position(|e| e.id == id) {
				let entry = manifest.entries.remove(idx);
				if entry.backup_path.exists() {
					if let Err(e) = std::fs::remove_file(&entry.backup_path) {
						warn!("failed to delete evicted backup payload {}: {}", entry.id, e);
					}
				}
				debug!("evicted backup {} of {}", entry.id, item_name);
			}
		}
	}

	fn load_manifest(&self) -> Result<BackupManifest, SyncError> {
		let contents = match std::fs::read_to_string(&self.manifest_path) {
			Ok(contents) => contents,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Ok(BackupManifest::default());
			}
			Err(e) => {
				return Err(SyncError::new(ErrorKind::ConfigLoad, "load-backup-manifest")
					.with_path(&self.manifest_path)
					.with_source(e));
			}
		};
		serde_json::from_str(&contents).map_err(|e| {
			SyncError::new(ErrorKind::ConfigLoad, "load-backup-manifest")
				.with_path(&self.manifest_path)
				.with_source(e)
		})
	}

	fn save_manifest(&self, manifest: &BackupManifest) -> Result<(), SyncError> {
		let json = serde_json::to_vec_pretty(manifest).map_err(|e| {
			SyncError::new(ErrorKind::ConfigSave, "save-backup-manifest")
				.with_path(&self.manifest_path)
				.with_source(e)
		})?;
		atomic::write_file_atomic(&self.manifest_path, &json, None)
	}

	/// `{safe item name}_{timestamp}_{hash prefix}`
	fn generate_backup_id(&self, item_name: &str, hash: &str) -> String {
		let safe_name = item_name.replace([' ', '/'], "_");
		let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%f");
		let digest = hash.strip_prefix("sha256:").unwrap_or(hash);
		let prefix = &digest[..digest.len().min(8)];
		format!("{}_{}_{}", safe_name, timestamp, prefix)
	}
}


// vim: ts=4
