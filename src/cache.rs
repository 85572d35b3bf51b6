//! Hash cache for incremental change detection
//!
//! Stores SHA-256 digests keyed by absolute path and validates entries
//! against the file's current (size, mtime) plus a maximum age, so repeated
//! sync decisions avoid re-reading unchanged files. A corrupt persistence
//! file fails closed: the cache starts empty.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::atomic;
use crate::error::SyncError;
use crate::logging::*;

const HASH_BUF_SIZE: usize = 64 * 1024;

/// Compute the SHA-256 of a file's raw bytes, streamed.
///
/// Returns a lowercase hex digest prefixed with `sha256:`. Line endings are
/// not normalized.
pub fn hash_file(path: &Path) -> Result<String, SyncError> {
	let mut file = fs::File::open(path).map_err(|e| SyncError::from_io("hash", path, e))?;
	let mut hasher = Sha256::new();
	let mut buf = vec![0u8; HASH_BUF_SIZE];
	loop {
		let n = file.read(&mut buf).map_err(|e| SyncError::from_io("hash", path, e))?;
		if n == 0 {
			break;
		}
		hasher.update(&buf[..n]);
	}
	Ok(format!("sha256:{:x}", hasher.finalize()))
}

/// Hash of an in-memory buffer, same encoding as [`hash_file`]
pub fn hash_bytes(data: &[u8]) -> String {
	format!("sha256:{:x}", Sha256::digest(data))
}

/// One cached digest with its validity snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashCacheEntry {
	pub hash: String,
	pub size: u64,
	pub mod_time: DateTime<Utc>,
	pub cached_at: DateTime<Utc>,
}

/// Aggregate cache statistics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
	pub total_entries: usize,
	pub expired_entries: usize,
	pub oldest_entry: Option<DateTime<Utc>>,
	pub newest_entry: Option<DateTime<Utc>>,
}

/// Thread-safe cache of file digests with (size, mtime, age) validation.
///
/// Readers share the lock; writers are exclusive.
pub struct HashCache {
	entries: RwLock<HashMap<PathBuf, HashCacheEntry>>,
	max_age: Duration,
}

impl HashCache {
	/// Create a cache whose entries expire after `max_age`
	pub fn new(max_age: std::time::Duration) -> HashCache {
		HashCache {
			entries: RwLock::new(HashMap::new()),
			max_age: Duration::from_std(max_age).unwrap_or_else(|_| Duration::hours(1)),
		}
	}

	/// Cached hash for `path`, iff the entry is fresh and the file's size
	/// and mtime still match the snapshot.
	pub fn get(&self, path: &Path) -> Option<String> {
		let entries = self.entries.read().expect("hash cache lock poisoned");
		let entry = entries.get(path)?;

		if Utc::now() - entry.cached_at > self.max_age {
			return None;
		}
		let metadata = fs::metadata(path).ok()?;
		if metadata.len() != entry.size || mtime_of(&metadata)? != entry.mod_time {
			return None;
		}
		Some(entry.hash.clone())
	}

	/// Store a digest with its validity snapshot
	pub fn set(&self, path: &Path, hash: String, size: u64, mod_time: DateTime<Utc>) {
		let mut entries = self.entries.write().expect("hash cache lock poisoned");
		entries.insert(
			path.to_path_buf(),
			HashCacheEntry { hash, size, mod_time, cached_at: Utc::now() },
		);
	}

	/// Cached hash, or compute, store and return it
	pub fn get_or_calculate(&self, path: &Path) -> Result<String, SyncError> {
		if let Some(hash) = self.get(path) {
			return Ok(hash);
		}

		let hash = hash_file(path)?;
		let metadata = fs::metadata(path).map_err(|e| SyncError::from_io("hash", path, e))?;
		if let Some(mod_time) = mtime_of(&metadata) {
			self.set(path, hash.clone(), metadata.len(), mod_time);
		}
		Ok(hash)
	}

	/// Drop entries whose file no longer matches the snapshot.
	/// Returns the number removed.
	pub fn invalidate(&self, paths: &[PathBuf]) -> usize {
		let mut entries = self.entries.write().expect("hash cache lock poisoned");
		let mut removed = 0;
		for path in paths {
			let stale = match entries.get(path) {
				Some(entry) => match fs::metadata(path) {
					Ok(metadata) => {
						metadata.len() != entry.size
							|| mtime_of(&metadata) != Some(entry.mod_time)
					}
					Err(_) => true,
				},
				None => continue,
			};
			if stale {
				entries.remove(path);
				removed += 1;
			}
		}
		removed
	}

	/// Drop entries older than the maximum age. Returns the number removed.
	pub fn clean_expired(&self) -> usize {
		let now = Utc::now();
		let mut entries = self.entries.write().expect("hash cache lock poisoned");
		let before = entries.len();
		entries.retain(|_, entry| now - entry.cached_at <= self.max_age);
		before - entries.len()
	}

	pub fn remove(&self, path: &Path) {
		self.entries.write().expect("hash cache lock poisoned").remove(path);
	}

	pub fn clear(&self) {
		self.entries.write().expect("hash cache lock poisoned").clear();
	}

	pub fn len(&self) -> usize {
		self.entries.read().expect("hash cache lock poisoned").len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn keys(&self) -> Vec<PathBuf> {
		self.entries.read().expect("hash cache lock poisoned").keys().cloned().collect()
	}

	pub fn stats(&self) -> CacheStats {
		let entries = self.entries.read().expect("hash cache lock poisoned");
		let now = Utc::now();
		let mut stats = CacheStats {
			total_entries: entries.len(),
			expired_entries: 0,
			oldest_entry: None,
			newest_entry: None,
		};
		for entry in entries.values() {
			if now - entry.cached_at > self.max_age {
				stats.expired_entries += 1;
			}
			if stats.oldest_entry.map_or(true, |t| entry.cached_at < t) {
				stats.oldest_entry = Some(entry.cached_at);
			}
			if stats.newest_entry.map_or(true, |t| entry.cached_at > t) {
				stats.newest_entry = Some(entry.cached_at);
			}
		}
		stats
	}

	/// Persist all entries to a single JSON file
	pub fn save_to_file(&self, path: &Path) -> Result<(), SyncError> {
		let snapshot = {
			let entries = self.entries.read().expect("hash cache lock poisoned");
			entries.clone()
		};
		let json = serde_json::to_vec_pretty(&snapshot)?;
		atomic::write_file_atomic(path, &json, None)
	}

	/// Load entries from a JSON file. Missing or corrupt files are treated
	/// as an empty cache.
	pub fn load_from_file(&self, path: &Path) {
		let contents = match fs::read_to_string(path) {
			Ok(contents) => contents,
			Err(_) => return,
		};
		match serde_json::from_str::<HashMap<PathBuf, HashCacheEntry>>(&contents) {
			Ok(loaded) => {
				let mut entries = self.entries.write().expect("hash cache lock poisoned");
				*entries = loaded;
			}
			Err(e) => {
				warn!("hash cache at {} is corrupt, starting empty: {}", path.display(), e);
			}
		}
	}
}

/// File mtime as UTC, `None` on platforms without one
pub fn mtime_of(metadata: &fs::Metadata) -> Option<DateTime<Utc>> {
	metadata.modified().ok().map(DateTime::<Utc>::from)
}


// vim: ts=4
