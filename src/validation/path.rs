//! Path validation
//!
//! Refuses paths that could escape the sync area or touch sensitive files
//! before any filesystem side effect happens.

use std::path::{Component, Path, PathBuf};

use super::ValidationError;

const MAX_PATH_LENGTH: usize = 4096;

/// Configurable path validator.
///
/// The default refuses traversal, NUL bytes, a small list of credential
/// files, hidden components and symlink components; allowed roots are
/// unrestricted until set.
#[derive(Debug, Clone)]
pub struct PathValidator {
	allowed_roots: Vec<PathBuf>,
	blocked_paths: Vec<PathBuf>,
	max_path_length: usize,
	allow_symlinks: bool,
	allow_hidden: bool,
}

impl Default for PathValidator {
	fn default() -> Self {
		PathValidator {
			allowed_roots: Vec::new(),
			blocked_paths: vec![
				PathBuf::from("/etc/passwd"),
				PathBuf::from("/etc/shadow"),
				PathBuf::from("/etc/hosts"),
			],
			max_path_length: MAX_PATH_LENGTH,
			allow_symlinks: false,
			allow_hidden: true,
		}
	}
}

impl PathValidator {
	pub fn new() -> PathValidator {
		PathValidator::default()
	}

	pub fn with_allowed_roots(mut self, roots: Vec<PathBuf>) -> Self {
		self.allowed_roots = roots;
		self
	}

	pub fn with_blocked_paths(mut self, paths: Vec<PathBuf>) -> Self {
		self.blocked_paths = paths;
		self
	}

	pub fn with_max_path_length(mut self, length: usize) -> Self {
		self.max_path_length = length;
		self
	}

	pub fn with_allow_symlinks(mut self, allow: bool) -> Self {
		self.allow_symlinks = allow;
		self
	}

	pub fn with_allow_hidden(mut self, allow: bool) -> Self {
		self.allow_hidden = allow;
		self
	}

	/// Validate a path string before it is stored or used
	pub fn validate(&self, path: &str) -> Result<(), ValidationError> {
		if path.is_empty() {
			return Err(ValidationError::Path("path cannot be empty".to_string()));
		}
		if path.len() > self.max_path_length {
			return Err(ValidationError::Path(format!(
				"path length exceeds maximum of {} characters",
				self.max_path_length
			)));
		}
		if path.contains('\0') {
			return Err(ValidationError::Path("NUL bytes not allowed in path".to_string()));
		}

		let as_path = Path::new(path);
		if as_path.components().any(|c| matches!(c, Component::ParentDir)) {
			return Err(ValidationError::Path("path traversal detected".to_string()));
		}

		let expanded = crate::paths::expand_path(path);
		for blocked in &self.blocked_paths {
			if expanded == *blocked || expanded.starts_with(blocked) {
				return Err(ValidationError::Path("access to this path is blocked".to_string()));
			}
		}

		if !self.allowed_roots.is_empty()
			&& !self.allowed_roots.iter().any(|root| expanded.starts_with(root))
		{
			return Err(ValidationError::Path("path is outside allowed directories".to_string()));
		}

		if !self.allow_hidden {
			let hidden = expanded.components().any(|c| match c {
				Component::Normal(part) => part.to_string_lossy().starts_with('.'),
				_ => false,
			});
			if hidden {
				return Err(ValidationError::Path("hidden files are not allowed".to_string()));
			}
		}

		if !self.allow_symlinks {
			self.check_symlinks(&expanded)?;
		}

		Ok(())
	}

	/// Walk up the (existing prefix of the) path looking for symlink
	/// components. Nonexistent components are fine: they cannot be links.
	fn check_symlinks(&self, path: &Path) -> Result<(), ValidationError> {
		let mut current = path.to_path_buf();
		loop {
			match std::fs::symlink_metadata(&current) {
				Ok(metadata) if metadata.file_type().is_symlink() => {
					return Err(ValidationError::Path(format!(
						"symlink component not allowed: {}",
						current.display()
					)));
				}
				_ => {}
			}
			if !current.pop() || current.as_os_str().is_empty() {
				return Ok(());
			}
		}
	}
}

/// Validate a registry path with the default policy.
///
/// Hidden components stay allowed here: dotfiles are the common case for
/// synced configuration.
pub fn validate_local_path(path: &str) -> Result<(), ValidationError> {
	PathValidator::new().validate(path)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_accepts_ordinary_paths() {
		assert!(validate_local_path("/home/user/.vimrc").is_ok());
		assert!(validate_local_path("~/.config/app/settings.json").is_ok());
	}

	#[test]
	fn test_rejects_empty_and_oversized() {
		assert!(validate_local_path("").is_err());
		let long = format!("/{}", "x".repeat(4096));
		assert!(validate_local_path(&long).is_err());
	}

	#[test]
	fn test_rejects_traversal_and_nul() {
		assert!(validate_local_path("/home/../etc/passwd").is_err());
		assert!(validate_local_path("../up").is_err());
		assert!(validate_local_path("/tmp/bad\0name").is_err());
	}

	#[test]
	fn test_rejects_blocked_paths() {
		assert!(validate_local_path("/etc/passwd").is_err());
		assert!(validate_local_path("/etc/shadow").is_err());
	}

	#[test]
	fn test_allowed_roots() {
		let validator =
			PathValidator::new().with_allowed_roots(vec![PathBuf::from("/home/user")]);
		assert!(validator.validate("/home/user/.vimrc").is_ok());
		assert!(validator.validate("/var/lib/app.conf").is_err());
	}

	#[test]
	fn test_hidden_components_policy() {
		let strict = PathValidator::new().with_allow_hidden(false);
		assert!(strict.validate("/home/user/.vimrc").is_err());
		assert!(strict.validate("/home/user/plain.conf").is_ok());
	}

	#[cfg(unix)]
	#[test]
	fn test_symlink_component_rejected() {
		let tmp = TempDir::new().unwrap();
		let real = tmp.path().join("real");
		std::fs::create_dir(&real).unwrap();
		let link = tmp.path().join("link");
		std::os::unix::fs::symlink(&real, &link).unwrap();

		let target = link.join("file.conf");
		let err = validate_local_path(target.to_str().unwrap()).unwrap_err();
		assert!(err.to_string().contains("symlink"));

		let permissive = PathValidator::new().with_allow_symlinks(true);
		assert!(permissive.validate(target.to_str().unwrap()).is_ok());
	}
}

