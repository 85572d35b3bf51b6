//! Exclude-pattern validation and matching

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;

use super::ValidationError;

/// Patterns that would exclude everything
const OVERLY_BROAD: &[&str] = &["*", "**", "/", "/*", "/**"];

/// Validate one exclude pattern: non-empty, not overly broad, no
/// traversal, valid glob syntax.
pub fn validate_exclude_pattern(pattern: &str) -> Result<(), ValidationError> {
	if pattern.is_empty() {
		return Err(ValidationError::Pattern("pattern cannot be empty".to_string()));
	}
	if OVERLY_BROAD.contains(&pattern) {
		return Err(ValidationError::Pattern(format!(
			"pattern '{}' is too broad and would exclude everything",
			pattern
		)));
	}
	if pattern.contains("..") {
		return Err(ValidationError::Pattern(
			"path traversal not allowed in exclude patterns".to_string(),
		));
	}
	Glob::new(pattern)
		.map(|_| ())
		.map_err(|e| ValidationError::Pattern(format!("{}: {}", pattern, e)))
}

/// Validate an ordered pattern list, reporting the offending index
pub fn validate_exclude_patterns(patterns: &[String]) -> Result<(), ValidationError> {
	for (i, pattern) in patterns.iter().enumerate() {
		validate_exclude_pattern(pattern).map_err(|e| {
			ValidationError::Pattern(format!("pattern at index {}: {}", i, e))
		})?;
	}
	Ok(())
}

/// Compiled exclude patterns, matched against item-relative paths
#[derive(Debug, Clone)]
pub struct ExcludeSet {
	set: GlobSet,
}

impl ExcludeSet {
	/// Validate and compile; an empty list matches nothing
	pub fn new(patterns: &[String]) -> Result<ExcludeSet, ValidationError> {
		validate_exclude_patterns(patterns)?;
		let mut builder = GlobSetBuilder::new();
		for pattern in patterns {
			builder.add(
				Glob::new(pattern)
					.map_err(|e| ValidationError::Pattern(format!("{}: {}", pattern, e)))?,
			);
		}
		let set = builder
			.build()
			.map_err(|e| ValidationError::Pattern(format!("failed to build pattern set: {}", e)))?;
		Ok(ExcludeSet { set })
	}

	pub fn is_excluded(&self, relative_path: &Path) -> bool {
		self.set.is_match(relative_path)
	}

	pub fn is_empty(&self) -> bool {
		self.set.is_empty()
	}
}


// vim: ts=4
