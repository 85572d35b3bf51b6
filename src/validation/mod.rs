//! Input validation and sanitization
//!
//! Validators run before any mutation: item names, local paths, exclude
//! patterns and computer ids are all rejected up front rather than failing
//! somewhere inside a sync. Split by input class:
//! - name validation (item names, computer ids)
//! - path validation (traversal, NUL bytes, blocked/allowed roots)
//! - exclude-pattern validation (glob syntax, overly-broad patterns)

use std::error::Error;
use std::fmt;

pub mod name;
pub mod path;
pub mod pattern;

pub use name::{validate_computer_id, validate_item_name};
pub use path::{validate_local_path, PathValidator};
pub use pattern::{validate_exclude_pattern, validate_exclude_patterns, ExcludeSet};

use crate::error::{ErrorKind, SyncError};

/// Validation failure, by input class
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
	/// Invalid sync item name
	Name(String),

	/// Invalid or unsafe path
	Path(String),

	/// Invalid exclude pattern
	Pattern(String),

	/// Invalid computer identifier
	ComputerId(String),
}

impl fmt::Display for ValidationError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ValidationError::Name(msg) => write!(f, "invalid name: {}", msg),
			ValidationError::Path(msg) => write!(f, "invalid path: {}", msg),
			ValidationError::Pattern(msg) => write!(f, "invalid exclude pattern: {}", msg),
			ValidationError::ComputerId(msg) => write!(f, "invalid computer id: {}", msg),
		}
	}
}

impl Error for ValidationError {}

impl From<ValidationError> for SyncError {
	fn from(e: ValidationError) -> Self {
		let kind = match &e {
			ValidationError::Path(_) => ErrorKind::InvalidPath,
			_ => ErrorKind::Validation,
		};
		SyncError::new(kind, "validate").with_message(e.to_string())
	}
}

/// Options for [`sanitize`]
#[derive(Debug, Clone)]
pub struct SanitizerOptions {
	/// Strip control characters, keeping `\t`, `\r` and `\n`
	pub remove_control_chars: bool,

	/// Trim leading and trailing whitespace
	pub trim_whitespace: bool,

	/// Clamp to at most this many characters; 0 disables clamping
	pub max_length: usize,
}

impl Default for SanitizerOptions {
	fn default() -> Self {
		SanitizerOptions { remove_control_chars: true, trim_whitespace: true, max_length: 1000 }
	}
}

/// Sanitize a user-supplied string before it reaches validators or logs
pub fn sanitize(input: &str, options: &SanitizerOptions) -> String {
	let mut result: String = if options.remove_control_chars {
		input
			.chars()
			.filter(|c| !c.is_control() || matches!(c, '\t' | '\r' | '\n'))
			.collect()
	} else {
		input.to_string()
	};

	if options.trim_whitespace {
		result = result.trim().to_string();
	}

	if options.max_length > 0 && result.chars().count() > options.max_length {
		result = result.chars().take(options.max_length).collect();
	}

	result
}


// vim: ts=4
