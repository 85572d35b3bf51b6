//! Local per-computer configuration
//!
//! Each participating computer keeps a small `config.json` under its
//! platform configuration directory. The shared documents (registry and
//! file metadata) live in the rendezvous directory instead; see
//! [`crate::metadata`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::atomic;
use crate::error::{ErrorKind, SyncError};

/// Name of the local configuration file inside the config directory
pub const CONFIG_FILE: &str = "config.json";

/// Local configuration stored on each computer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalConfig {
	/// Absolute path to the rendezvous root; empty means uninitialized
	pub cloud_sync_dir: PathBuf,

	/// Identifier of this computer (DNS-hostname shaped)
	pub current_computer: String,

	/// Item name -> RFC-3339 timestamp of the last successful sync
	pub last_sync_times: BTreeMap<String, String>,

	/// Whether the rendezvous directory is a git working tree
	pub git_mode: bool,

	/// Root of the git repository; required iff `git_mode`
	pub git_repo_root: Option<PathBuf>,
}

impl LocalConfig {
	/// True once `init` has recorded a rendezvous directory
	pub fn is_initialized(&self) -> bool {
		!self.cloud_sync_dir.as_os_str().is_empty()
	}

	/// Path of the shared sync-item registry
	pub fn sync_items_path(&self) -> PathBuf {
		self.cloud_sync_dir.join("sync-items.json")
	}

	/// Path of the shared file-metadata document (unused in git mode)
	pub fn file_metadata_path(&self) -> PathBuf {
		self.cloud_sync_dir.join("file-metadata.json")
	}

	/// Root of the per-item mirrors inside the rendezvous
	pub fn cloud_configs_path(&self) -> PathBuf {
		self.cloud_sync_dir.join("configs")
	}

	/// Load the configuration from `path`; a missing file yields defaults
	pub async fn load(path: &Path) -> Result<LocalConfig, SyncError> {
		let contents = match tokio::fs::read_to_string(path).await {
			Ok(contents) => contents,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Ok(LocalConfig::default());
			}
			Err(e) => {
				return Err(SyncError::new(ErrorKind::ConfigLoad, "load-config")
					.with_path(path)
					.with_source(e));
			}
		};

		serde_json::from_str(&contents).map_err(|e| {
			SyncError::new(ErrorKind::ConfigLoad, "load-config").with_path(path).with_source(e)
		})
	}

	/// Persist the configuration atomically
	pub async fn save(&self, path: &Path) -> Result<(), SyncError> {
		let json = serde_json::to_vec_pretty(self).map_err(|e| {
			SyncError::new(ErrorKind::ConfigSave, "save-config").with_path(path).with_source(e)
		})?;
		atomic::write_file_atomic(path, &json, None)
			.map_err(|e| e.with_message("failed to save local config"))
	}
}

/// Platform configuration directory for syncstation.
///
/// `$XDG_CONFIG_HOME/syncstation`, `%APPDATA%\syncstation` or
/// `$HOME/.config/syncstation`, in that order.
pub fn config_dir() -> PathBuf {
	if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
		if !xdg.is_empty() {
			return PathBuf::from(xdg).join("syncstation");
		}
	}
	if let Ok(appdata) = env::var("APPDATA") {
		if !appdata.is_empty() {
			return PathBuf::from(appdata).join("syncstation");
		}
	}
	let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
	PathBuf::from(home).join(".config").join("syncstation")
}

/// Best-effort default computer id from the environment, falling back to
/// the kernel hostname on Linux.
pub fn default_computer_id() -> String {
	if let Ok(name) = env::var("HOSTNAME") {
		if !name.is_empty() {
			return name;
		}
	}
	if let Ok(name) = env::var("COMPUTERNAME") {
		if !name.is_empty() {
			return name;
		}
	}
	if let Ok(contents) = std::fs::read_to_string("/etc/hostname") {
		let name = contents.trim();
		if !name.is_empty() {
			return name.to_string();
		}
	}
	"localhost".to_string()
}


// vim: ts=4
