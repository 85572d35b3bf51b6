//! Error types for syncstation operations
//!
//! Every failing operation surfaces a [`SyncError`]: a structured record
//! carrying the error category, the operation that failed, and (when known)
//! the sync item and path involved. The category drives both user-facing
//! messages and the CLI exit code.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Category of a sync error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// File, directory, backup or sync item does not exist
	FileNotFound,

	/// Read or write access denied
	PermissionDenied,

	/// Content digest did not match the expected value
	HashMismatch,

	/// The decision engine refused to pick a side
	Conflict,

	/// Path failed validation or points outside the allowed area
	InvalidPath,

	/// A git subprocess failed (notes read/write, bootstrap commit)
	GitOperation,

	/// A configuration document could not be loaded or parsed
	ConfigLoad,

	/// A configuration document could not be persisted
	ConfigSave,

	/// Rendezvous directory unreachable
	Network,

	/// Any other filesystem error
	Io,

	/// Input rejected before any side effect
	Validation,

	/// Invariant violation; "impossible" branch
	Internal,
}

impl ErrorKind {
	/// Stable machine-readable code, used in log output
	pub fn code(&self) -> &'static str {
		match self {
			ErrorKind::FileNotFound => "FILE_NOT_FOUND",
			ErrorKind::PermissionDenied => "PERMISSION_DENIED",
			ErrorKind::HashMismatch => "HASH_MISMATCH",
			ErrorKind::Conflict => "CONFLICT",
			ErrorKind::InvalidPath => "INVALID_PATH",
			ErrorKind::GitOperation => "GIT_OPERATION",
			ErrorKind::ConfigLoad => "CONFIG_LOAD",
			ErrorKind::ConfigSave => "CONFIG_SAVE",
			ErrorKind::Network => "NETWORK_ERROR",
			ErrorKind::Io => "IO_ERROR",
			ErrorKind::Validation => "VALIDATION",
			ErrorKind::Internal => "INTERNAL",
		}
	}

	/// Short human phrase for the category
	pub fn phrase(&self) -> &'static str {
		match self {
			ErrorKind::FileNotFound => "not found",
			ErrorKind::PermissionDenied => "permission denied",
			ErrorKind::HashMismatch => "hash mismatch",
			ErrorKind::Conflict => "conflict",
			ErrorKind::InvalidPath => "invalid path",
			ErrorKind::GitOperation => "git operation failed",
			ErrorKind::ConfigLoad => "failed to load configuration",
			ErrorKind::ConfigSave => "failed to save configuration",
			ErrorKind::Network => "rendezvous unreachable",
			ErrorKind::Io => "I/O error",
			ErrorKind::Validation => "validation failed",
			ErrorKind::Internal => "internal error",
		}
	}
}

impl fmt::Display for ErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.code())
	}
}

/// Structured error record for a failed sync operation
#[derive(Debug)]
pub struct SyncError {
	/// Error category
	pub kind: ErrorKind,

	/// Operation that failed ("push", "pull", "backup", ...)
	pub op: String,

	/// Sync item involved, when known
	pub item: Option<String>,

	/// Offending path, when known
	pub path: Option<PathBuf>,

	/// Extra human-readable detail
	pub message: Option<String>,

	/// Underlying cause
	pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl SyncError {
	pub fn new(kind: ErrorKind, op: impl Into<String>) -> Self {
		SyncError { kind, op: op.into(), item: None, path: None, message: None, source: None }
	}

	pub fn with_item(mut self, item: impl Into<String>) -> Self {
		self.item = Some(item.into());
		self
	}

	pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
		self.path = Some(path.into());
		self
	}

	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());
		self
	}

	pub fn with_source(mut self, source: impl Error + Send + Sync + 'static) -> Self {
		self.source = Some(Box::new(source));
		self
	}

	/// Classify an I/O error, distinguishing ENOENT from permission failures
	pub fn from_io(op: impl Into<String>, path: &Path, err: io::Error) -> Self {
		let kind = match err.kind() {
			io::ErrorKind::NotFound => ErrorKind::FileNotFound,
			io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
			_ => ErrorKind::Io,
		};
		SyncError::new(kind, op).with_path(path).with_source(err)
	}

	/// True when a batch should continue past this error
	pub fn is_recoverable(&self) -> bool {
		!matches!(self.kind, ErrorKind::Internal)
	}
}

impl fmt::Display for SyncError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "sync error [{}]: {}", self.kind.code(), self.op)?;
		if let Some(item) = &self.item {
			write!(f, ", item '{}'", item)?;
		}
		if let Some(path) = &self.path {
			write!(f, ", path {}", path.display())?;
		}
		if let Some(message) = &self.message {
			write!(f, ": {}", message)?;
		} else {
			write!(f, ": {}", self.kind.phrase())?;
		}
		if let Some(source) = &self.source {
			write!(f, " ({})", source)?;
		}
		Ok(())
	}
}

impl Error for SyncError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		self.source.as_deref().map(|e| e as &(dyn Error + 'static))
	}
}

impl From<io::Error> for SyncError {
	fn from(e: io::Error) -> Self {
		let kind = match e.kind() {
			io::ErrorKind::NotFound => ErrorKind::FileNotFound,
			io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
			_ => ErrorKind::Io,
		};
		SyncError::new(kind, "io").with_source(e)
	}
}

impl From<serde_json::Error> for SyncError {
	fn from(e: serde_json::Error) -> Self {
		SyncError::new(ErrorKind::ConfigLoad, "parse").with_source(e)
	}
}

/// Collects non-fatal errors during a batch, preserving order
#[derive(Debug, Default)]
pub struct ErrorCollector {
	errors: Vec<SyncError>,
}

impl ErrorCollector {
	pub fn new() -> Self {
		ErrorCollector { errors: Vec::new() }
	}

	pub fn push(&mut self, err: SyncError) {
		self.errors.push(err);
	}

	pub fn has_errors(&self) -> bool {
		!self.errors.is_empty()
	}

	pub fn len(&self) -> usize {
		self.errors.len()
	}

	pub fn is_empty(&self) -> bool {
		self.errors.is_empty()
	}

	pub fn into_errors(self) -> Vec<SyncError> {
		self.errors
	}
}

impl fmt::Display for ErrorCollector {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self.errors.len() {
			0 => write!(f, "no errors"),
			1 => write!(f, "{}", self.errors[0]),
			n => {
				write!(f, "multiple errors ({})", n)?;
				for (i, e) in self.errors.iter().enumerate() {
					write!(f, "; {}: {}", i + 1, e)?;
				}
				Ok(())
			}
		}
	}
}


// vim: ts=4
