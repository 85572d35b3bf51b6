//! File presence and content-equality probing
//!
//! Presence is an explicit tri-state rather than an error: an expected
//! absence is data, not an exception, and an unreadable path is reported
//! with its reason instead of being conflated with "missing".

use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;

use crate::atomic;
use crate::cache::{mtime_of, HashCache};
use crate::error::SyncError;
use crate::types::SyncStatus;

/// What `stat` said about one path
#[derive(Debug, Clone, PartialEq)]
pub enum Presence {
	Present {
		size: u64,
		mtime: DateTime<Utc>,
		/// Unix permission bits; `None` on platforms without them
		mode: Option<u32>,
		is_dir: bool,
	},
	Absent,
	Inaccessible {
		why: String,
	},
}

impl Presence {
	/// Classify a path, distinguishing ENOENT from permission failures
	pub fn stat(path: &Path) -> Presence {
		match std::fs::metadata(path) {
			Ok(metadata) => {
				let mtime = match mtime_of(&metadata) {
					Some(mtime) => mtime,
					None => {
						return Presence::Inaccessible { why: "no modification time".to_string() }
					}
				};
				Presence::Present {
					size: metadata.len(),
					mtime,
					mode: atomic::mode_of(&metadata),
					is_dir: metadata.is_dir(),
				}
			}
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Presence::Absent,
			Err(e) => Presence::Inaccessible { why: e.to_string() },
		}
	}

	pub fn is_present(&self) -> bool {
		matches!(self, Presence::Present { .. })
	}

	pub fn is_absent(&self) -> bool {
		matches!(self, Presence::Absent)
	}

	pub fn mtime(&self) -> Option<DateTime<Utc>> {
		match self {
			Presence::Present { mtime, .. } => Some(*mtime),
			_ => None,
		}
	}

	pub fn mode(&self) -> Option<u32> {
		match self {
			Presence::Present { mode, .. } => *mode,
			_ => None,
		}
	}
}

/// Probe result for one (local, cloud) path pair
#[derive(Debug, Clone)]
pub struct FileProbe {
	pub local: Presence,
	pub cloud: Presence,

	/// Digest of the local file, when present and readable
	pub local_hash: Option<String>,

	/// Digest of the cloud file, when present and readable
	pub cloud_hash: Option<String>,

	/// Hash equality; `None` unless both sides are present files
	pub content_equal: Option<bool>,
}

impl FileProbe {
	/// Status summary for display; never consumed by the decision engine
	pub fn status(&self) -> SyncStatus {
		match (&self.local, &self.cloud) {
			(Presence::Absent, Presence::Absent) => SyncStatus::Missing,
			(Presence::Present { .. }, Presence::Absent) => SyncStatus::LocalOnly,
			(Presence::Absent, Presence::Present { .. }) => SyncStatus::CloudOnly,
			(
				Presence::Present { mtime: local, .. },
				Presence::Present { mtime: cloud, .. },
			) => match self.content_equal {
				Some(true) => SyncStatus::InSync,
				_ => {
					if local > cloud {
						SyncStatus::LocalNewer
					} else if cloud > local {
						SyncStatus::CloudNewer
					} else {
						SyncStatus::Conflict
					}
				}
			},
			_ => SyncStatus::Conflict,
		}
	}
}

/// Probes path pairs, computing content equality through the hash cache
/// rather than byte comparison.
pub struct DiffProbe {
	cache: Arc<HashCache>,
}

impl DiffProbe {
	pub fn new(cache: Arc<HashCache>) -> DiffProbe {
		DiffProbe { cache }
	}

	pub fn cache(&self) -> &Arc<HashCache> {
		&self.cache
	}

	/// Probe a file pair. Directories get presence and mtimes only.
	pub fn probe_file(&self, local: &Path, cloud: &Path) -> Result<FileProbe, SyncError> {
		let local_presence = Presence::stat(local);
		let cloud_presence = Presence::stat(cloud);

		let local_hash = match &local_presence {
			Presence::Present { is_dir: false, .. } => {
				Some(self.cache.get_or_calculate(local)?)
			}
			_ => None,
		};
		let cloud_hash = match &cloud_presence {
			Presence::Present { is_dir: false, .. } => {
				Some(self.cache.get_or_calculate(cloud)?)
			}
			_ => None,
		};

		let content_equal = match (&local_hash, &cloud_hash) {
			(Some(l), Some(c)) => Some(l == c),
			_ => None,
		};

		Ok(FileProbe {
			local: local_presence,
			cloud: cloud_presence,
			local_hash,
			cloud_hash,
			content_equal,
		})
	}
}


// vim: ts=4
