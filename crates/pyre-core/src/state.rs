//! Phase state machine for burn and mint actions.
//!
//! Tracks the lifecycle phase of every action and enforces both the legal
//! transition order and the one-in-flight-action-per-token rule. A guard
//! object pins the keys an action holds; if the driving future is dropped
//! mid-flight the guard marks the action failed instead of leaving the keys
//! wedged.

use alloy_primitives::Address;
use once_cell::sync::Lazy;
use pyre_types::TransactionPhase;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors raised by phase bookkeeping.
#[derive(Debug, Error)]
pub enum PhaseError {
	/// Another action already holds one of the requested keys.
	#[error("Action already in flight for {0:?}")]
	Busy(ActionKey),
	#[error("Invalid phase transition from {from:?} to {to:?}")]
	InvalidTransition {
		from: TransactionPhase,
		to: TransactionPhase,
	},
}

/// Identity of one orchestrated action.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKey {
	/// A burn or mint touching one token.
	Token { address: Address, id: String },
	/// A collection-wide approval.
	Approval { collection: Address },
}

impl ActionKey {
	pub fn token(address: Address, id: impl Into<String>) -> Self {
		ActionKey::Token {
			address,
			id: id.into(),
		}
	}

	pub fn approval(collection: Address) -> Self {
		ActionKey::Approval { collection }
	}
}

/// Phase change notification.
#[derive(Debug, Clone)]
pub struct PhaseEvent {
	pub key: ActionKey,
	pub phase: TransactionPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PhaseKind {
	Idle,
	Submitting,
	Confirming,
	Registering,
	Completed,
	Failed,
}

fn kind(phase: &TransactionPhase) -> PhaseKind {
	match phase {
		TransactionPhase::Idle => PhaseKind::Idle,
		TransactionPhase::Submitting => PhaseKind::Submitting,
		TransactionPhase::Confirming => PhaseKind::Confirming,
		TransactionPhase::Registering => PhaseKind::Registering,
		TransactionPhase::Completed => PhaseKind::Completed,
		TransactionPhase::Failed(_) => PhaseKind::Failed,
	}
}

// Static transition table - each phase maps to allowed next phases. A
// terminal phase re-enters the pipeline through `begin`, which is why the
// terminal phases allow Submitting (fresh action) and Failed allows
// Registering (registration retry with a known hash).
static TRANSITIONS: Lazy<HashMap<PhaseKind, HashSet<PhaseKind>>> = Lazy::new(|| {
	let mut m = HashMap::new();
	m.insert(
		PhaseKind::Idle,
		HashSet::from([PhaseKind::Submitting]),
	);
	m.insert(
		PhaseKind::Submitting,
		HashSet::from([PhaseKind::Confirming, PhaseKind::Failed]),
	);
	m.insert(
		PhaseKind::Confirming,
		HashSet::from([PhaseKind::Registering, PhaseKind::Completed, PhaseKind::Failed]),
	);
	m.insert(
		PhaseKind::Registering,
		HashSet::from([PhaseKind::Completed, PhaseKind::Failed]),
	);
	m.insert(
		PhaseKind::Completed,
		HashSet::from([PhaseKind::Submitting]),
	);
	m.insert(
		PhaseKind::Failed,
		HashSet::from([PhaseKind::Submitting, PhaseKind::Registering]),
	);
	m
});

fn is_valid_transition(from: &TransactionPhase, to: &TransactionPhase) -> bool {
	TRANSITIONS
		.get(&kind(from))
		.is_some_and(|set| set.contains(&kind(to)))
}

/// Tracks phases for all actions and publishes changes.
#[derive(Debug)]
pub struct PhaseTracker {
	phases: Mutex<HashMap<ActionKey, TransactionPhase>>,
	events: broadcast::Sender<PhaseEvent>,
}

impl PhaseTracker {
	pub fn new() -> Self {
		let (events, _) = broadcast::channel(64);
		Self {
			phases: Mutex::new(HashMap::new()),
			events,
		}
	}

	/// Current phase of a key; untouched keys are `Idle`.
	pub fn phase(&self, key: &ActionKey) -> TransactionPhase {
		self.phases
			.lock()
			.expect("phase lock poisoned")
			.get(key)
			.cloned()
			.unwrap_or(TransactionPhase::Idle)
	}

	pub fn subscribe(&self) -> broadcast::Receiver<PhaseEvent> {
		self.events.subscribe()
	}

	/// Claims every key for a new action, entering `initial` atomically.
	///
	/// Fails with [`PhaseError::Busy`] if any key is already in flight; in
	/// that case nothing is claimed.
	pub fn begin(
		tracker: &Arc<Self>,
		keys: Vec<ActionKey>,
		initial: TransactionPhase,
	) -> Result<ActionGuard, PhaseError> {
		{
			let mut phases = tracker.phases.lock().expect("phase lock poisoned");
			for key in &keys {
				let current = phases.get(key).cloned().unwrap_or(TransactionPhase::Idle);
				if current.is_in_flight() {
					return Err(PhaseError::Busy(key.clone()));
				}
				if !is_valid_transition(&current, &initial) {
					return Err(PhaseError::InvalidTransition {
						from: current,
						to: initial,
					});
				}
			}
			for key in &keys {
				phases.insert(key.clone(), initial.clone());
			}
		}
		for key in &keys {
			tracker.publish(key, &initial);
		}

		Ok(ActionGuard {
			tracker: Arc::clone(tracker),
			keys,
			armed: true,
		})
	}

	fn set(&self, keys: &[ActionKey], phase: TransactionPhase) -> Result<(), PhaseError> {
		{
			let mut phases = self.phases.lock().expect("phase lock poisoned");
			for key in keys {
				let current = phases.get(key).cloned().unwrap_or(TransactionPhase::Idle);
				if !is_valid_transition(&current, &phase) {
					return Err(PhaseError::InvalidTransition {
						from: current,
						to: phase,
					});
				}
			}
			for key in keys {
				phases.insert(key.clone(), phase.clone());
			}
		}
		for key in keys {
			self.publish(key, &phase);
		}
		Ok(())
	}

	fn publish(&self, key: &ActionKey, phase: &TransactionPhase) {
		self.events
			.send(PhaseEvent {
				key: key.clone(),
				phase: phase.clone(),
			})
			.ok();
	}
}

impl Default for PhaseTracker {
	fn default() -> Self {
		Self::new()
	}
}

/// Holds an action's keys for the duration of its pipeline.
///
/// Consumed by [`ActionGuard::complete`] or [`ActionGuard::fail`]; if
/// dropped while still armed (the driving future was cancelled), the keys
/// are marked failed so later actions are not wedged behind a phantom
/// in-flight phase.
#[derive(Debug)]
pub struct ActionGuard {
	tracker: Arc<PhaseTracker>,
	keys: Vec<ActionKey>,
	armed: bool,
}

impl ActionGuard {
	/// Advances every held key to `phase`.
	pub fn transition(&self, phase: TransactionPhase) -> Result<(), PhaseError> {
		self.tracker.set(&self.keys, phase)
	}

	/// Marks the action completed and releases the keys.
	pub fn complete(mut self) {
		self.tracker.set(&self.keys, TransactionPhase::Completed).ok();
		self.armed = false;
	}

	/// Marks the action failed and releases the keys.
	pub fn fail(mut self, message: &str) {
		self.tracker
			.set(&self.keys, TransactionPhase::Failed(message.to_string()))
			.ok();
		self.armed = false;
	}
}

impl Drop for ActionGuard {
	fn drop(&mut self) {
		if self.armed {
			self.tracker
				.set(
					&self.keys,
					TransactionPhase::Failed("action cancelled before completion".to_string()),
				)
				.ok();
		}
	}
}
