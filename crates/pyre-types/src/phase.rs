//! Transaction phase state values.
//!
//! Each burn or mint action advances through the same pipeline: submit the
//! on-chain write, wait for confirmation, register the result with the
//! backend. The phase value is what orchestration callers observe.

use serde::{Deserialize, Serialize};

/// Lifecycle phase of a single burn or mint action.
///
/// `Completed` and `Failed` are terminal for the action; a fresh attempt on
/// the same token starts over from `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum TransactionPhase {
	Idle,
	Submitting,
	Confirming,
	Registering,
	Completed,
	Failed(String),
}

impl TransactionPhase {
	/// Whether the action holds the pipeline and must reject a rival.
	pub fn is_in_flight(&self) -> bool {
		matches!(
			self,
			TransactionPhase::Submitting
				| TransactionPhase::Confirming
				| TransactionPhase::Registering
		)
	}

	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			TransactionPhase::Completed | TransactionPhase::Failed(_)
		)
	}
}
