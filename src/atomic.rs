//! Atomic file operations
//!
//! A committed target is always observed either at its prior state or at the
//! new state, never in between. Writes go to a sibling temp file named
//! `.{basename}.tmp.{random}` in the same directory (so the final rename
//! stays on one filesystem), are fsynced, then renamed over the target.
//!
//! [`Transaction`] groups several operations; the first failure rolls back
//! the already-executed ones in reverse order, collecting (not swallowing)
//! rollback errors.

use async_trait::async_trait;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, SyncError};
use crate::logging::*;

/// Atomic single-file writer: write to a sibling temp file, then rename.
pub struct FileWriter {
	target: PathBuf,
	temp: Option<tempfile::NamedTempFile>,
	committed: bool,
	mode: Option<u32>,
}

impl FileWriter {
	/// Create a writer for `target`, creating missing parent directories.
	///
	/// `mode` are the unix permission bits to apply at commit time; `None`
	/// keeps the temp file's default (0644 minus umask).
	pub fn create(target: &Path, mode: Option<u32>) -> Result<FileWriter, SyncError> {
		let dir = target.parent().unwrap_or(Path::new("."));
		fs::create_dir_all(dir).map_err(|e| SyncError::from_io("atomic-write", target, e))?;

		let basename = target
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.ok_or_else(|| {
				SyncError::new(ErrorKind::InvalidPath, "atomic-write")
					.with_path(target)
					.with_message("target has no file name")
			})?;

		let temp = tempfile::Builder::new()
			.prefix(&format!(".{}.tmp.", basename))
			.tempfile_in(dir)
			.map_err(|e| SyncError::from_io("atomic-write", target, e))?;

		Ok(FileWriter { target: target.to_path_buf(), temp: Some(temp), committed: false, mode })
	}

	/// Write a chunk to the temp file
	pub fn write_all(&mut self, data: &[u8]) -> Result<(), SyncError> {
		let target = self.target.clone();
		let temp = self.temp_mut("atomic-write")?;
		temp.write_all(data).map_err(|e| SyncError::from_io("atomic-write", &target, e))
	}

	/// Stream a reader into the temp file, returning the byte count
	pub fn copy_from<R: Read>(&mut self, src: &mut R) -> Result<u64, SyncError> {
		let target = self.target.clone();
		let temp = self.temp_mut("atomic-copy")?;
		std::io::copy(src, temp).map_err(|e| SyncError::from_io("atomic-copy", &target, e))
	}

	/// Fsync, close and rename the temp file over the target
	pub fn commit(&mut self) -> Result<(), SyncError> {
		if self.committed {
			return Err(SyncError::new(ErrorKind::Internal, "atomic-write")
				.with_path(&self.target)
				.with_message("file already committed"));
		}
		let temp = self.temp.take().ok_or_else(|| {
			SyncError::new(ErrorKind::Io, "atomic-write")
				.with_path(&self.target)
				.with_message("file writer is closed")
		})?;

		if let Some(mode) = self.mode {
			set_mode(temp.path(), mode)
				.map_err(|e| SyncError::from_io("atomic-write", &self.target, e))?;
		}

		temp.as_file()
			.sync_all()
			.map_err(|e| SyncError::from_io("atomic-write", &self.target, e))?;

		temp.persist(&self.target)
			.map_err(|e| SyncError::from_io("atomic-write", &self.target, e.error))?;

		self.committed = true;
		Ok(())
	}

	/// Discard the temp file without touching the target
	pub fn rollback(&mut self) {
		// NamedTempFile unlinks on drop
		self.temp = None;
	}

	fn temp_mut(&mut self, op: &str) -> Result<&mut tempfile::NamedTempFile, SyncError> {
		if self.committed {
			return Err(SyncError::new(ErrorKind::Io, op)
				.with_path(&self.target)
				.with_message("file writer is closed"));
		}
		match self.temp.as_mut() {
			Some(temp) => Ok(temp),
			None => Err(SyncError::new(ErrorKind::Io, op)
				.with_path(&self.target)
				.with_message("file writer is closed")),
		}
	}
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
	use std::os::unix::fs::PermissionsExt;
	fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
	Ok(())
}

/// Permission bits of a file, or `None` where the platform has none
#[cfg(unix)]
pub fn mode_of(metadata: &fs::Metadata) -> Option<u32> {
	use std::os::unix::fs::PermissionsExt;
	Some(metadata.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
pub fn mode_of(_metadata: &fs::Metadata) -> Option<u32> {
	None
}

/// Write `data` to `target` atomically
pub fn write_file_atomic(target: &Path, data: &[u8], mode: Option<u32>) -> Result<(), SyncError> {
	let mut writer = FileWriter::create(target, mode)?;
	writer.write_all(data)?;
	writer.commit()
}

/// Copy `src` to `dst` atomically, preserving the source's permission bits
pub fn copy_file_atomic(src: &Path, dst: &Path) -> Result<u64, SyncError> {
	let mut file = fs::File::open(src).map_err(|e| SyncError::from_io("atomic-copy", src, e))?;
	let metadata = file.metadata().map_err(|e| SyncError::from_io("atomic-copy", src, e))?;

	let mut writer = FileWriter::create(dst, mode_of(&metadata))?;
	let written = writer.copy_from(&mut file)?;
	writer.commit()?;
	Ok(written)
}

/// Remove leftover `.{name}.tmp.{random}` files in `dir` from writers that
/// died between write and rename. Returns the number removed.
pub fn clean_stale_temps(dir: &Path) -> usize {
	let entries = match fs::read_dir(dir) {
		Ok(entries) => entries,
		Err(_) => return 0,
	};
	let mut removed = 0;
	for entry in entries.flatten() {
		let name = entry.file_name();
		let name = name.to_string_lossy();
		if name.starts_with('.') && name.contains(".tmp.") {
			if fs::remove_file(entry.path()).is_ok() {
				removed += 1;
			}
		}
	}
	removed
}

/// One step of a multi-operation transaction
#[async_trait]
pub trait AtomicOp: Send + Sync {
	async fn execute(&mut self) -> Result<(), SyncError>;
	async fn rollback(&mut self) -> Result<(), SyncError>;
	fn is_executed(&self) -> bool;

	/// Release resources held for a possible rollback (e.g. overwrite
	/// backups) once the whole transaction has committed.
	async fn cleanup(&mut self) {}
}

/// Ordered group of atomic operations with reverse-order rollback
pub struct Transaction {
	operations: Vec<Box<dyn AtomicOp>>,
	committed: bool,
}

impl Transaction {
	pub fn new() -> Transaction {
		Transaction { operations: Vec::new(), committed: false }
	}

	pub fn add(&mut self, op: Box<dyn AtomicOp>) {
		self.operations.push(op);
	}

	/// Execute all operations. On the first failure, roll back the already
	/// executed ones in reverse order; rollback errors are reported in the
	/// returned error's message but never mask the original failure.
	pub async fn commit(&mut self) -> Result<(), SyncError> {
		if self.committed {
			return Err(SyncError::new(ErrorKind::Internal, "transaction")
				.with_message("transaction already committed"));
		}

		for i in 0..self.operations.len() {
			if let Err(err) = self.operations[i].execute().await {
				let rollback_errors = self.rollback_range(i).await;
				let mut failure = err;
				if !rollback_errors.is_empty() {
					let detail: Vec<String> =
						rollback_errors.iter().map(|e| e.to_string()).collect();
					let combined = match failure.message.take() {
						Some(original) => {
							format!("{}; rollback also failed: {}", original, detail.join("; "))
						}
						None => format!("rollback also failed: {}", detail.join("; ")),
					};
					failure = failure.with_message(combined);
				}
				return Err(failure);
			}
		}

		for op in self.operations.iter_mut() {
			op.cleanup().await;
		}
		self.committed = true;
		Ok(())
	}

	/// Roll back every executed operation, newest first
	pub async fn rollback(&mut self) -> Vec<SyncError> {
		let len = self.operations.len();
		self.rollback_range(len).await
	}

	async fn rollback_range(&mut self, upto: usize) -> Vec<SyncError> {
		let mut errors = Vec::new();
		for op in self.operations[..upto].iter_mut().rev() {
			if op.is_executed() {
				if let Err(e) = op.rollback().await {
					warn!("rollback step failed: {}", e);
					errors.push(e);
				}
			}
		}
		errors
	}
}

impl Default for Transaction {
	fn default() -> Self {
		Transaction::new()
	}
}

/// Atomic copy with overwrite backup: the prior target content is parked at
/// a sibling path, restored on rollback and deleted on cleanup.
pub struct CopyOperation {
	src: PathBuf,
	dst: PathBuf,
	backup: Option<PathBuf>,
	executed: bool,
}

impl CopyOperation {
	pub fn new(src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> CopyOperation {
		CopyOperation { src: src.into(), dst: dst.into(), backup: None, executed: false }
	}
}

#[async_trait]
impl AtomicOp for CopyOperation {
	async fn execute(&mut self) -> Result<(), SyncError> {
		if self.dst.exists() {
			let backup = park_path(&self.dst);
			fs::rename(&self.dst, &backup)
				.map_err(|e| SyncError::from_io("atomic-copy", &self.dst, e))?;
			self.backup = Some(backup);
		}
		copy_file_atomic(&self.src, &self.dst)?;
		self.executed = true;
		Ok(())
	}

	async fn rollback(&mut self) -> Result<(), SyncError> {
		if !self.executed {
			return Ok(());
		}
		if let Err(e) = fs::remove_file(&self.dst) {
			if e.kind() != std::io::ErrorKind::NotFound {
				return Err(SyncError::from_io("atomic-copy-rollback", &self.dst, e));
			}
		}
		if let Some(backup) = self.backup.take() {
			fs::rename(&backup, &self.dst)
				.map_err(|e| SyncError::from_io("atomic-copy-rollback", &self.dst, e))?;
		}
		self.executed = false;
		Ok(())
	}

	fn is_executed(&self) -> bool {
		self.executed
	}

	async fn cleanup(&mut self) {
		if let Some(backup) = self.backup.take() {
			let _ = fs::remove_file(backup);
		}
	}
}

/// Atomic move: rename when possible, otherwise copy + delete. The prior
/// target content is parked like in [`CopyOperation`].
pub struct MoveOperation {
	src: PathBuf,
	dst: PathBuf,
	backup: Option<PathBuf>,
	executed: bool,
}

impl MoveOperation {
	pub fn new(src: impl Into<PathBuf>, dst: impl Into<PathBuf>) -> MoveOperation {
		MoveOperation { src: src.into(), dst: dst.into(), backup: None, executed: false }
	}
}

#[async_trait]
impl AtomicOp for MoveOperation {
	async fn execute(&mut self) -> Result<(), SyncError> {
		if self.dst.exists() {
			let backup = park_path(&self.dst);
			fs::rename(&self.dst, &backup)
				.map_err(|e| SyncError::from_io("atomic-move", &self.dst, e))?;
			self.backup = Some(backup);
		}
		if fs::rename(&self.src, &self.dst).is_err() {
			// Cross-filesystem move
			copy_file_atomic(&self.src, &self.dst)?;
			fs::remove_file(&self.src)
				.map_err(|e| SyncError::from_io("atomic-move", &self.src, e))?;
		}
		self.executed = true;
		Ok(())
	}

	async fn rollback(&mut self) -> Result<(), SyncError> {
		if !self.executed {
			return Ok(());
		}
		fs::rename(&self.dst, &self.src)
			.map_err(|e| SyncError::from_io("atomic-move-rollback", &self.dst, e))?;
		if let Some(backup) = self.backup.take() {
			fs::rename(&backup, &self.dst)
				.map_err(|e| SyncError::from_io("atomic-move-rollback", &self.dst, e))?;
		}
		self.executed = false;
		Ok(())
	}

	fn is_executed(&self) -> bool {
		self.executed
	}

	async fn cleanup(&mut self) {
		if let Some(backup) = self.backup.take() {
			let _ = fs::remove_file(backup);
		}
	}
}

fn park_path(target: &Path) -> PathBuf {
	use std::sync::atomic::{AtomicU64, Ordering};
	static SEQ: AtomicU64 = AtomicU64::new(0);

	let name = target.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
	let unique = format!(
		".{}.tmp.bak{}-{}",
		name,
		std::process::id(),
		SEQ.fetch_add(1, Ordering::Relaxed)
	);
	target.with_file_name(unique)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_write_creates_parents() {
		let tmp = TempDir::new().unwrap();
		let target = tmp.path().join("a/b/c.json");
		write_file_atomic(&target, b"{}", None).unwrap();
		assert_eq!(fs::read(&target).unwrap(), b"{}");
	}

	#[test]
	fn test_overwrite_is_all_or_nothing() {
		let tmp = TempDir::new().unwrap();
		let target = tmp.path().join("file.txt");
		write_file_atomic(&target, b"old content", None).unwrap();

		// A rolled-back writer leaves the prior bytes untouched
		let mut writer = FileWriter::create(&target, None).unwrap();
		writer.write_all(b"new ").unwrap();
		writer.rollback();
		assert_eq!(fs::read(&target).unwrap(), b"old content");

		// A committed writer replaces them entirely
		write_file_atomic(&target, b"new content", None).unwrap();
		assert_eq!(fs::read(&target).unwrap(), b"new content");
	}

	#[test]
	fn test_double_commit_rejected() {
		let tmp = TempDir::new().unwrap();
		let target = tmp.path().join("file.txt");
		let mut writer = FileWriter::create(&target, None).unwrap();
		writer.write_all(b"x").unwrap();
		writer.commit().unwrap();

		let err = writer.commit().unwrap_err();
		assert_eq!(err.kind, ErrorKind::Internal);
		assert!(err.to_string().contains("already committed"));
	}

	#[test]
	fn test_write_after_commit_rejected() {
		let tmp = TempDir::new().unwrap();
		let target = tmp.path().join("file.txt");
		let mut writer = FileWriter::create(&target, None).unwrap();
		writer.commit().unwrap();
		let err = writer.write_all(b"late").unwrap_err();
		assert!(err.to_string().contains("closed"));
	}

	#[cfg(unix)]
	#[test]
	fn test_copy_preserves_mode() {
		use std::os::unix::fs::PermissionsExt;

		let tmp = TempDir::new().unwrap();
		let src = tmp.path().join("src.sh");
		fs::write(&src, b"#!/bin/sh\n").unwrap();
		fs::set_permissions(&src, fs::Permissions::from_mode(0o755)).unwrap();

		let dst = tmp.path().join("dst.sh");
		copy_file_atomic(&src, &dst).unwrap();
		let mode = fs::metadata(&dst).unwrap().permissions().mode() & 0o7777;
		assert_eq!(mode, 0o755);
	}

	#[test]
	fn test_clean_stale_temps() {
		let tmp = TempDir::new().unwrap();
		fs::write(tmp.path().join(".conf.tmp.abc123"), b"partial").unwrap();
		fs::write(tmp.path().join("conf"), b"real").unwrap();

		assert_eq!(clean_stale_temps(tmp.path()), 1);
		assert!(tmp.path().join("conf").exists());
		assert!(!tmp.path().join(".conf.tmp.abc123").exists());
	}

	#[tokio::test]
	async fn test_transaction_commit() {
		let tmp = TempDir::new().unwrap();
		let src1 = tmp.path().join("s1");
		let src2 = tmp.path().join("s2");
		fs::write(&src1, b"one").unwrap();
		fs::write(&src2, b"two").unwrap();

		let mut tx = Transaction::new();
		tx.add(Box::new(CopyOperation::new(&src1, tmp.path().join("d1"))));
		tx.add(Box::new(CopyOperation::new(&src2, tmp.path().join("d2"))));
		tx.commit().await.unwrap();

		assert_eq!(fs::read(tmp.path().join("d1")).unwrap(), b"one");
		assert_eq!(fs::read(tmp.path().join("d2")).unwrap(), b"two");
	}

	#[tokio::test]
	async fn test_transaction_rolls_back_on_failure() {
		let tmp = TempDir::new().unwrap();
		let src = tmp.path().join("src");
		fs::write(&src, b"new").unwrap();
		let dst = tmp.path().join("dst");
		fs::write(&dst, b"previous").unwrap();

		let mut tx = Transaction::new();
		tx.add(Box::new(CopyOperation::new(&src, &dst)));
		// Second op fails: source does not exist
		tx.add(Box::new(CopyOperation::new(tmp.path().join("missing"), tmp.path().join("d2"))));

		let err = tx.commit().await.unwrap_err();
		assert_eq!(err.kind, ErrorKind::FileNotFound);

		// First op was rolled back: dst restored to its prior bytes
		assert_eq!(fs::read(&dst).unwrap(), b"previous");
		assert!(!tmp.path().join("d2").exists());
	}

	#[tokio::test]
	async fn test_transaction_double_commit_rejected() {
		let mut tx = Transaction::new();
		tx.commit().await.unwrap();
		let err = tx.commit().await.unwrap_err();
		assert_eq!(err.kind, ErrorKind::Internal);
	}

	#[tokio::test]
	async fn test_move_operation_rollback() {
		let tmp = TempDir::new().unwrap();
		let src = tmp.path().join("src");
		fs::write(&src, b"moved").unwrap();
		let dst = tmp.path().join("dst");
		fs::write(&dst, b"old").unwrap();

		let mut op = MoveOperation::new(&src, &dst);
		op.execute().await.unwrap();
		assert!(!src.exists());
		assert_eq!(fs::read(&dst).unwrap(), b"moved");

		op.rollback().await.unwrap();
		assert_eq!(fs::read(&src).unwrap(), b"moved");
		assert_eq!(fs::read(&dst).unwrap(), b"old");
	}
}

// vim: ts=4
