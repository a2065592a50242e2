//! Credential storage abstraction.
//!
//! The session token lives in an injected key/value store rather than an
//! ambient global, so tests supply an in-memory store and embedders can back
//! it with whatever their platform persists. The store broadcasts removal
//! events so a credential cleared by another execution context (the
//! cross-tab case) still logs this one out.

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

/// Errors raised by credential store operations.
#[derive(Debug, Error)]
#[error("Credential store error: {0}")]
pub struct StoreError(pub String);

/// The persisted session credential and its identity metadata.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StoredCredential {
	pub token: String,
	pub address: Address,
}

/// Change notifications from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
	Stored,
	Removed,
}

/// Trait defining the interface for credential stores.
#[async_trait]
#[cfg_attr(feature = "testing", mockall::automock)]
pub trait TokenStore: Send + Sync {
	/// Reads the stored credential, if any.
	async fn load(&self) -> Result<Option<StoredCredential>, StoreError>;

	/// Replaces the stored credential.
	async fn save(&self, credential: StoredCredential) -> Result<(), StoreError>;

	/// Removes the stored credential. Removing an empty store is a no-op.
	async fn clear(&self) -> Result<(), StoreError>;

	/// Subscribes to store change notifications.
	fn watch(&self) -> broadcast::Receiver<StoreEvent>;
}

/// In-memory credential store.
///
/// Cloned handles share the same slot, so one handle clearing the
/// credential is observed by watchers on every other handle -- which is
/// exactly the cross-context behavior tests need to exercise.
#[derive(Clone)]
pub struct MemoryTokenStore {
	slot: Arc<RwLock<Option<StoredCredential>>>,
	events: broadcast::Sender<StoreEvent>,
}

impl MemoryTokenStore {
	pub fn new() -> Self {
		let (events, _) = broadcast::channel(16);
		Self {
			slot: Arc::new(RwLock::new(None)),
			events,
		}
	}
}

impl Default for MemoryTokenStore {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
	async fn load(&self) -> Result<Option<StoredCredential>, StoreError> {
		Ok(self.slot.read().await.clone())
	}

	async fn save(&self, credential: StoredCredential) -> Result<(), StoreError> {
		*self.slot.write().await = Some(credential);
		self.events.send(StoreEvent::Stored).ok();
		Ok(())
	}

	async fn clear(&self) -> Result<(), StoreError> {
		let removed = self.slot.write().await.take().is_some();
		if removed {
			self.events.send(StoreEvent::Removed).ok();
		}
		Ok(())
	}

	fn watch(&self) -> broadcast::Receiver<StoreEvent> {
		self.events.subscribe()
	}
}
