//! The sync decision engine
//!
//! [`decide_file`] is a pure, total function over the observed facts of one
//! file pair; it never touches the filesystem or mutates state. Rules apply
//! in order, first match wins:
//!
//! 1. neither side exists            -> Skip
//! 2. local only                     -> Push
//! 3. cloud only                     -> Pull
//! 4. identical content              -> Skip
//! 5. anchor matches cloud           -> Push  (cloud unchanged since last sync)
//! 6. anchor differs from cloud      -> Pull iff cloud strictly newer, else Conflict
//! 7. no anchor                      -> newer side wins; tie -> Conflict
//!
//! The anchor is the cloud-side hash recorded at the last successful sync.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::cache::HashCache;
use crate::error::SyncError;
use crate::probe::{DiffProbe, FileProbe, Presence};
use crate::validation::ExcludeSet;

/// Why the engine refused to pick a side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
	/// Cloud changed since the last sync and local is not older
	BothModified,

	/// No sync history and both sides carry the same timestamp with
	/// different content
	SameTimestamp,

	/// Directory trees share an mtime but their contents differ
	DirectoryDrift,
}

impl fmt::Display for ConflictReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConflictReason::BothModified => write!(f, "both modified"),
			ConflictReason::SameTimestamp => {
				write!(f, "same timestamp, different content")
			}
			ConflictReason::DirectoryDrift => write!(f, "directory drift - manual check"),
		}
	}
}

/// Outcome of the decision engine for one sync item file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	Skip,
	PushLocalToCloud,
	PullCloudToLocal,
	Conflict(ConflictReason),
}

impl Decision {
	pub fn is_conflict(&self) -> bool {
		matches!(self, Decision::Conflict(_))
	}
}

/// Observed facts about one file pair
#[derive(Debug, Clone, Default)]
pub struct FileFacts<'a> {
	pub local_hash: Option<&'a str>,
	pub cloud_hash: Option<&'a str>,
	pub local_mtime: Option<DateTime<Utc>>,
	pub cloud_mtime: Option<DateTime<Utc>>,

	/// Cloud hash recorded at the last successful sync, if any
	pub last_cloud_hash: Option<&'a str>,
}

/// Decide what to do with one file. Pure and total.
pub fn decide_file(facts: &FileFacts<'_>) -> Decision {
	match (facts.local_hash, facts.cloud_hash) {
		(None, None) => Decision::Skip,
		(Some(_), None) => Decision::PushLocalToCloud,
		(None, Some(_)) => Decision::PullCloudToLocal,
		(Some(local), Some(cloud)) if local == cloud => Decision::Skip,
		(Some(_), Some(cloud)) => {
			match facts.last_cloud_hash {
				Some(anchor) if anchor == cloud => {
					// Cloud unchanged since our last sync; the local edit
					// is the only change
					Decision::PushLocalToCloud
				}
				Some(_) => {
					// Cloud changed under us. Only a strictly newer cloud
					// wins; otherwise both sides moved.
					match (facts.local_mtime, facts.cloud_mtime) {
						(Some(local), Some(cloud_time)) if cloud_time > local => {
							Decision::PullCloudToLocal
						}
						_ => Decision::Conflict(ConflictReason::BothModified),
					}
				}
				None => {
					// No history: timestamps are all we have
					match (facts.local_mtime, facts.cloud_mtime) {
						(Some(local), Some(cloud_time)) if local > cloud_time => {
							Decision::PushLocalToCloud
						}
						(Some(local), Some(cloud_time)) if cloud_time > local => {
							Decision::PullCloudToLocal
						}
						_ => Decision::Conflict(ConflictReason::SameTimestamp),
					}
				}
			}
		}
	}
}

/// Builds [`FileFacts`] from probes and decides whole items, including the
/// directory case.
pub struct DecisionEngine {
	probe: DiffProbe,
}

impl DecisionEngine {
	pub fn new(cache: std::sync::Arc<HashCache>) -> DecisionEngine {
		DecisionEngine { probe: DiffProbe::new(cache) }
	}

	pub fn probe(&self) -> &DiffProbe {
		&self.probe
	}

	/// Decide a single file, combining a fresh probe with the recorded
	/// anchor hash.
	pub fn decide_file_pair(
		&self,
		local: &Path,
		cloud: &Path,
		last_cloud_hash: Option<&str>,
	) -> Result<(Decision, FileProbe), SyncError> {
		let probe = self.probe.probe_file(local, cloud)?;
		let facts = FileFacts {
			local_hash: probe.local_hash.as_deref(),
			cloud_hash: probe.cloud_hash.as_deref(),
			local_mtime: probe.local.mtime(),
			cloud_mtime: probe.cloud.mtime(),
			last_cloud_hash,
		};
		Ok((decide_file(&facts), probe))
	}

	/// Decide a directory pair by tree mtime. Equal mtimes fall back to a
	/// leaf walk distinguishing "in sync" from drift.
	pub fn decide_tree(
		&self,
		local: &Path,
		cloud: &Path,
		excludes: &ExcludeSet,
	) -> Result<Decision, SyncError> {
		let local_presence = Presence::stat(local);
		let cloud_presence = Presence::stat(cloud);

		match (&local_presence, &cloud_presence) {
			(Presence::Absent, Presence::Absent) => Ok(Decision::Skip),
			(Presence::Present { .. }, Presence::Absent) => Ok(Decision::PushLocalToCloud),
			(Presence::Absent, Presence::Present { .. }) => Ok(Decision::PullCloudToLocal),
			(
				Presence::Present { mtime: local_mtime, .. },
				Presence::Present { mtime: cloud_mtime, .. },
			) => {
				if local_mtime > cloud_mtime {
					Ok(Decision::PushLocalToCloud)
				} else if cloud_mtime > local_mtime {
					Ok(Decision::PullCloudToLocal)
				} else if self.trees_equal(local, cloud, excludes)? {
					Ok(Decision::Skip)
				} else {
					Ok(Decision::Conflict(ConflictReason::DirectoryDrift))
				}
			}
			(Presence::Inaccessible { why }, _) | (_, Presence::Inaccessible { why }) => {
				Err(SyncError::new(crate::error::ErrorKind::PermissionDenied, "probe")
					.with_path(local)
					.with_message(why.clone()))
			}
		}
	}

	/// Same leaf set with identical hashes on both sides?
	fn trees_equal(
		&self,
		local: &Path,
		cloud: &Path,
		excludes: &ExcludeSet,
	) -> Result<bool, SyncError> {
		let local_leaves = collect_leaves(local, excludes)?;
		let cloud_leaves = collect_leaves(cloud, excludes)?;
		if local_leaves != cloud_leaves {
			return Ok(false);
		}
		for leaf in &local_leaves {
			let local_hash = self.probe.cache().get_or_calculate(&local.join(leaf))?;
			let cloud_hash = self.probe.cache().get_or_calculate(&cloud.join(leaf))?;
			if local_hash != cloud_hash {
				return Ok(false);
			}
		}
		Ok(true)
	}
}

/// Relative paths of all non-excluded files under `root`
pub fn collect_leaves(root: &Path, excludes: &ExcludeSet) -> Result<BTreeSet<PathBuf>, SyncError> {
	let mut leaves = BTreeSet::new();
	let mut pending = vec![root.to_path_buf()];
	while let Some(dir) = pending.pop() {
		let entries =
			std::fs::read_dir(&dir).map_err(|e| SyncError::from_io("walk", &dir, e))?;
		for entry in entries {
			let entry = entry.map_err(|e| SyncError::from_io("walk", &dir, e))?;
			let path = entry.path();
			let relative = path.strip_prefix(root).expect("walked path under root").to_path_buf();
			if excludes.is_excluded(&relative) {
				continue;
			}
			let file_type =
				entry.file_type().map_err(|e| SyncError::from_io("walk", &path, e))?;
			if file_type.is_dir() {
				pending.push(path);
			} else if file_type.is_file() {
				leaves.insert(relative);
			}
			// Symlinks and special files are not synchronized
		}
	}
	Ok(leaves)
}


// vim: ts=4
