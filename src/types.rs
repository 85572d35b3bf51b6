//! Shared types for sync operations

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::SyncError;

/// Direction of a sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncOperation {
	/// Local -> cloud, mirroring deletes
	Push,

	/// Cloud -> local, mirroring deletes
	Pull,

	/// Bidirectional sync driven by the decision engine
	Smart,
}

impl fmt::Display for SyncOperation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncOperation::Push => write!(f, "push"),
			SyncOperation::Pull => write!(f, "pull"),
			SyncOperation::Smart => write!(f, "sync"),
		}
	}
}

/// Whether a sync item is a single file or a directory tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
	File,
	Folder,
}

impl fmt::Display for ItemKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ItemKind::File => write!(f, "file"),
			ItemKind::Folder => write!(f, "folder"),
		}
	}
}

/// Per-item status as seen from the current computer.
///
/// Serialization is one-way: status values are reported, never parsed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
	/// Both sides exist with identical content
	InSync,

	/// Both sides exist, local modification time is strictly newer
	LocalNewer,

	/// Both sides exist, cloud modification time is strictly newer
	CloudNewer,

	/// Both sides differ without a clear winner
	Conflict,

	/// Only the local copy exists
	LocalOnly,

	/// Only the cloud copy exists
	CloudOnly,

	/// Neither side exists
	Missing,
}

impl fmt::Display for SyncStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SyncStatus::InSync => write!(f, "in sync"),
			SyncStatus::LocalNewer => write!(f, "local newer"),
			SyncStatus::CloudNewer => write!(f, "cloud newer"),
			SyncStatus::Conflict => write!(f, "conflict"),
			SyncStatus::LocalOnly => write!(f, "local only"),
			SyncStatus::CloudOnly => write!(f, "cloud only"),
			SyncStatus::Missing => write!(f, "missing"),
		}
	}
}

/// Aggregated outcome of one sync invocation
#[derive(Debug)]
pub struct SyncResult {
	/// Operation that produced this result
	pub operation: SyncOperation,

	/// True iff no file errored
	pub success: bool,

	/// Number of files written
	pub changed: usize,

	/// Number of files already up to date
	pub skipped: usize,

	/// Number of files that failed
	pub errored: usize,

	/// Structured per-file errors, in completion order
	pub errors: Vec<SyncError>,

	/// Task ids that did not complete before the batch deadline
	pub timed_out: Vec<String>,

	/// Human-readable summary
	pub message: String,
}

impl SyncResult {
	pub fn new(operation: SyncOperation) -> Self {
		SyncResult {
			operation,
			success: true,
			changed: 0,
			skipped: 0,
			errored: 0,
			errors: Vec::new(),
			timed_out: Vec::new(),
			message: String::new(),
		}
	}

	/// Record a failed file, keeping the success flag consistent
	pub fn record_error(&mut self, err: SyncError) {
		self.errored += 1;
		self.success = false;
		self.errors.push(err);
	}

	/// Fold another result into this one
	pub fn merge(&mut self, other: SyncResult) {
		self.changed += other.changed;
		self.skipped += other.skipped;
		self.errored += other.errored;
		self.errors.extend(other.errors);
		self.timed_out.extend(other.timed_out);
		if !other.success {
			self.success = false;
		}
	}

	/// Refresh the summary line from the counters
	pub fn finalize(&mut self) {
		self.success = self.errored == 0 && self.timed_out.is_empty();
		self.message = format!(
			"{} complete: {} changed, {} skipped, {} errors",
			self.operation, self.changed, self.skipped, self.errored
		);
		if !self.timed_out.is_empty() {
			self.message.push_str(&format!(", {} timed out", self.timed_out.len()));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::error::ErrorKind;

	#[test]
	fn test_item_kind_serde() {
		assert_eq!(serde_json::to_string(&ItemKind::File).unwrap(), "\"file\"");
		assert_eq!(serde_json::to_string(&ItemKind::Folder).unwrap(), "\"folder\"");
		let kind: ItemKind = serde_json::from_str("\"folder\"").unwrap();
		assert_eq!(kind, ItemKind::Folder);
	}

	#[test]
	fn test_result_merge_and_finalize() {
		let mut total = SyncResult::new(SyncOperation::Smart);
		let mut one = SyncResult::new(SyncOperation::Smart);
		one.changed = 1;
		let mut two = SyncResult::new(SyncOperation::Smart);
		two.record_error(SyncError::new(ErrorKind::Io, "push"));
		total.merge(one);
		total.merge(two);
		total.finalize();
		assert_eq!(total.changed, 1);
		assert_eq!(total.errored, 1);
		assert!(!total.success);
		assert!(total.message.contains("1 changed"));
		assert!(total.message.contains("1 errors"));
	}

	#[test]
	fn test_status_is_write_only() {
		let json = serde_json::to_string(&SyncStatus::LocalNewer).unwrap();
		assert_eq!(json, "\"local_newer\"");
	}
}

// vim: ts=4
