//! String formatting utilities.

/// Utility function to truncate an identifier for display purposes.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 8 {
		id.to_string()
	} else {
		format!("{}..", &id[..8])
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_truncate_id() {
		assert_eq!(truncate_id("short"), "short");
		assert_eq!(
			truncate_id("0b0ef1c0-5f4a-4f3e-9d2a-1b7c8d9e0f11"),
			"0b0ef1c0.."
		);
	}
}
