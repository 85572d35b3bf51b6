//! Path expansion and rendezvous path mapping
//!
//! Local paths stored in the registry may contain `~/` and environment
//! variables so the same entry works across computers. Cloud-side paths are
//! derived from the item name through a purely syntactic slug.

use std::env;
use std::path::{Path, PathBuf};

/// Expand `~/` and `$VAR` / `${VAR}` references in a stored path.
///
/// Unknown variables expand to the empty string; a `~` without a known home
/// directory is kept as-is.
pub fn expand_path(path: &str) -> PathBuf {
	let expanded = expand_env(path);
	if let Some(rest) = expanded.strip_prefix("~/") {
		if let Ok(home) = env::var("HOME") {
			return PathBuf::from(home).join(rest);
		}
	}
	PathBuf::from(expanded)
}

fn expand_env(input: &str) -> String {
	let mut out = String::with_capacity(input.len());
	let mut chars = input.char_indices().peekable();

	while let Some((_, c)) = chars.next() {
		if c != '$' {
			out.push(c);
			continue;
		}
		match chars.peek() {
			Some((_, '{')) => {
				chars.next();
				let mut name = String::new();
				let mut closed = false;
				for (_, c) in chars.by_ref() {
					if c == '}' {
						closed = true;
						break;
					}
					name.push(c);
				}
				if closed {
					out.push_str(&env::var(&name).unwrap_or_default());
				} else {
					// Unterminated ${: keep the literal text
					out.push_str("${");
					out.push_str(&name);
				}
			}
			Some((_, c)) if c.is_ascii_alphanumeric() || *c == '_' => {
				let mut name = String::new();
				while let Some((_, c)) = chars.peek() {
					if c.is_ascii_alphanumeric() || *c == '_' {
						name.push(*c);
						chars.next();
					} else {
						break;
					}
				}
				out.push_str(&env::var(&name).unwrap_or_default());
			}
			_ => out.push('$'),
		}
	}
	out
}

/// Map a sync item name to its rendezvous subdirectory name.
///
/// Replaces ASCII space and `/` with `-`; nothing else is normalized, so
/// the mapping stays readable in the cloud directory listing. Injectivity
/// over valid names is enforced at registration time.
pub fn slug(name: &str) -> String {
	name.replace([' ', '/'], "-")
}

/// Cloud-side path for an item: `{configs_root}/{slug(name)}`
pub fn item_cloud_path(configs_root: &Path, name: &str) -> PathBuf {
	configs_root.join(slug(name))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_slug_replaces_space_and_slash() {
		assert_eq!(slug("Vim"), "Vim");
		assert_eq!(slug("My App"), "My-App");
		assert_eq!(slug("conf/app"), "conf-app");
		assert_eq!(slug("a b/c"), "a-b-c");
	}

	#[test]
	fn test_slug_collisions_exist_on_raw_names() {
		// "a b" and "a-b" collide; the registry rejects such additions.
		assert_eq!(slug("a b"), slug("a-b"));
	}

	#[test]
	fn test_expand_tilde() {
		std::env::set_var("HOME", "/home/tester");
		assert_eq!(expand_path("~/x/y"), PathBuf::from("/home/tester/x/y"));
	}

	#[test]
	fn test_expand_env_vars() {
		std::env::set_var("SYNCSTATION_TEST_VAR", "/opt/conf");
		assert_eq!(expand_path("$SYNCSTATION_TEST_VAR/app"), PathBuf::from("/opt/conf/app"));
		assert_eq!(expand_path("${SYNCSTATION_TEST_VAR}/app"), PathBuf::from("/opt/conf/app"));
	}

	#[test]
	fn test_expand_unknown_var_is_empty() {
		std::env::remove_var("SYNCSTATION_NO_SUCH_VAR");
		assert_eq!(expand_path("/a/$SYNCSTATION_NO_SUCH_VAR/b"), PathBuf::from("/a//b"));
	}

	#[test]
	fn test_plain_paths_untouched() {
		assert_eq!(expand_path("/etc/app.conf"), PathBuf::from("/etc/app.conf"));
		assert_eq!(expand_path("relative/path"), PathBuf::from("relative/path"));
	}

	#[test]
	fn test_item_cloud_path() {
		let root = Path::new("/cloud/configs");
		assert_eq!(item_cloud_path(root, "My App"), PathBuf::from("/cloud/configs/My-App"));
	}
}

// vim: ts=4
