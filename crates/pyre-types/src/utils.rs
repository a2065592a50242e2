//! Utility functions for common conversions.

use std::time::{SystemTime, UNIX_EPOCH};

/// Ensures a hex string carries a `0x` prefix.
pub fn with_0x_prefix(hex: &str) -> String {
	if hex.starts_with("0x") {
		hex.to_string()
	} else {
		format!("0x{}", hex)
	}
}

/// Strips a `0x` prefix when present.
pub fn without_0x_prefix(hex: &str) -> &str {
	hex.strip_prefix("0x").unwrap_or(hex)
}

/// Shortens an identifier for log output, keeping head and tail.
pub fn truncate_id(id: &str) -> String {
	if id.len() <= 12 {
		id.to_string()
	} else {
		format!("{}..{}", &id[..6], &id[id.len() - 4..])
	}
}

/// Current time as Unix seconds.
pub fn current_timestamp() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.unwrap_or_default()
		.as_secs() as i64
}
