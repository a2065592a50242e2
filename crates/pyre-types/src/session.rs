//! Challenge and session credential types.
//!
//! A `Challenge` lives for exactly one authentication round trip; a `Session`
//! is the time-bounded credential issued once the challenge signature is
//! accepted. Liveness checks take an explicit timestamp so callers can inject
//! a fake clock in tests.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One-time message issued by the backend for an address to sign.
///
/// Consumed exactly once and never persisted beyond the single
/// challenge/login round trip.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
	/// Opaque string to be signed by the wallet.
	pub code: String,
	/// Address the challenge was issued for.
	pub address: Address,
	pub expires_at: DateTime<Utc>,
}

impl Challenge {
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expires_at < now
	}
}

/// Authenticated, time-bounded credential for backend access.
///
/// Owned by the session lifecycle manager; everything else receives
/// read-only snapshots. A session must never be observed past `expires_at` --
/// use [`Session::is_live`] before acting on one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Session {
	/// Opaque bearer credential.
	pub token: String,
	/// Wallet address the session is bound to.
	pub address: Address,
	/// Expiry as Unix seconds, decoded from the token itself.
	pub expires_at: i64,
}

impl Session {
	pub fn is_live(&self, now_unix: i64) -> bool {
		self.expires_at > now_unix
	}

	/// Seconds until expiry, saturating at zero.
	pub fn remaining_secs(&self, now_unix: i64) -> u64 {
		(self.expires_at - now_unix).max(0) as u64
	}
}
