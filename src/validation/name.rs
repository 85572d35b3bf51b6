//! Item-name and computer-id validation

use super::ValidationError;

const MAX_NAME_LENGTH: usize = 100;
const MAX_COMPUTER_ID_LENGTH: usize = 63;

/// Windows device names that would shadow real files on some filesystems
const RESERVED_NAMES: &[&str] = &[
	"CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
	"COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Validate a sync item name.
///
/// Allowed: letters, digits, single spaces, `.`, `_` and `-`; at most 100
/// characters; no leading/trailing whitespace; no reserved device names.
pub fn validate_item_name(name: &str) -> Result<(), ValidationError> {
	if name.is_empty() {
		return Err(ValidationError::Name("name cannot be empty".to_string()));
	}
	if name.len() > MAX_NAME_LENGTH {
		return Err(ValidationError::Name(format!(
			"name length exceeds maximum of {} characters",
			MAX_NAME_LENGTH
		)));
	}
	if !name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-')) {
		return Err(ValidationError::Name(
			"only letters, numbers, spaces, hyphens, underscores and dots are allowed".to_string(),
		));
	}
	if name.trim() != name {
		return Err(ValidationError::Name(
			"name cannot have leading or trailing whitespace".to_string(),
		));
	}
	if name.contains("  ") {
		return Err(ValidationError::Name("name cannot contain consecutive spaces".to_string()));
	}

	let upper = name.to_ascii_uppercase();
	if RESERVED_NAMES.contains(&upper.as_str()) {
		return Err(ValidationError::Name(format!("'{}' is a reserved name", name)));
	}

	Ok(())
}

/// Validate a computer id against DNS hostname grammar:
/// `[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?`, at most 63 characters.
pub fn validate_computer_id(computer_id: &str) -> Result<(), ValidationError> {
	if computer_id.is_empty() {
		return Err(ValidationError::ComputerId("computer id cannot be empty".to_string()));
	}
	if computer_id.len() > MAX_COMPUTER_ID_LENGTH {
		return Err(ValidationError::ComputerId(format!(
			"computer id cannot exceed {} characters",
			MAX_COMPUTER_ID_LENGTH
		)));
	}

	let bytes = computer_id.as_bytes();
	let edge_ok = |b: u8| b.is_ascii_alphanumeric();
	let inner_ok = |b: u8| b.is_ascii_alphanumeric() || b == b'-';

	let valid = edge_ok(bytes[0])
		&& edge_ok(bytes[bytes.len() - 1])
		&& bytes.iter().all(|&b| inner_ok(b));
	if !valid {
		return Err(ValidationError::ComputerId(
			"must be a valid hostname (letters, numbers, hyphens, no leading/trailing hyphens)"
				.to_string(),
		));
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_valid_names() {
		let longest = "n".repeat(100);
		for name in ["Vim", "My App", "app.conf", "a_b-c.d", "X", longest.as_str()] {
			assert!(validate_item_name(name).is_ok(), "should accept {:?}", name);
		}
	}

	#[test]
	fn test_invalid_names() {
		assert!(validate_item_name("").is_err());
		assert!(validate_item_name(&"n".repeat(101)).is_err());
		assert!(validate_item_name("bad\tname").is_err());
		assert!(validate_item_name("bad/name").is_err());
		assert!(validate_item_name(" padded").is_err());
		assert!(validate_item_name("padded ").is_err());
		assert!(validate_item_name("two  spaces").is_err());
		assert!(validate_item_name("emoji🦀").is_err());
	}

	#[test]
	fn test_reserved_names_case_insensitive() {
		for name in ["CON", "con", "Nul", "COM3", "lpt9"] {
			assert!(validate_item_name(name).is_err(), "should reject {:?}", name);
		}
		// Reserved only as full names
		assert!(validate_item_name("console").is_ok());
		assert!(validate_item_name("COM10").is_ok());
	}

	#[test]
	fn test_valid_computer_ids() {
		for id in ["laptop", "work-pc", "a", "host01", "A1-b2-C3"] {
			assert!(validate_computer_id(id).is_ok(), "should accept {:?}", id);
		}
	}

	#[test]
	fn test_invalid_computer_ids() {
		assert!(validate_computer_id("").is_err());
		assert!(validate_computer_id(&"a".repeat(64)).is_err());
		assert!(validate_computer_id("-leading").is_err());
		assert!(validate_computer_id("trailing-").is_err());
		assert!(validate_computer_id("under_score").is_err());
		assert!(validate_computer_id("dotted.name").is_err());
	}
}

