//! Session lifecycle module for the pyre burn/mint client.
//!
//! This module owns the authenticated session: obtaining it through the
//! challenge/signature exchange, decoding its expiry, arming the warning and
//! expiry timers, and tearing everything down on logout -- whether initiated
//! here, by the wallet layer, or by another execution context clearing the
//! stored credential.
//!
//! The expiry source is the token's own claim. The short fixed durations the
//! product once used for manual testing exist only as the explicit
//! [`SessionConfig::expiry_override`] gate, off by default.

use alloy_primitives::Address;
use pyre_types::Session;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub mod auth;
pub mod clock;
pub mod store;
mod token;

pub use auth::{AuthError, ChallengeAuthenticator};
pub use clock::{Clock, SystemClock};
pub use store::{MemoryTokenStore, StoreError, StoreEvent, StoredCredential, TokenStore};
pub use token::decode_expiry;

/// Errors raised by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
	/// The token could not be decoded or carries no expiry claim.
	#[error("Session token is invalid: {0}")]
	InvalidToken(String),
	/// The session is past its expiry.
	#[error("Session has expired")]
	Expired,
	/// A protected operation ran without an active session.
	#[error("Not authenticated")]
	NotAuthenticated,
	/// The credential store failed.
	#[error("Credential store error: {0}")]
	Storage(String),
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
	Started { address: Address, expires_at: i64 },
	/// Fired ahead of expiry so the UI can prompt for re-authentication.
	ExpiryWarning { seconds_left: u64 },
	Expired,
	LoggedOut,
}

/// Tunable session policy.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// How long before expiry the warning fires.
	pub warning_window: Duration,
	/// The warning never fires closer to expiry than this.
	pub min_warning_lead: Duration,
	/// Sliding-window extension applied by [`SessionLifecycleManager::refresh`].
	pub renewal_window: Duration,
	/// When set, overrides the token's own expiry claim with a fixed
	/// duration from now. A manual-testing gate; leave `None` in production.
	pub expiry_override: Option<Duration>,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			warning_window: Duration::from_secs(300),
			min_warning_lead: Duration::from_secs(10),
			renewal_window: Duration::from_secs(1800),
			expiry_override: None,
		}
	}
}

struct ActiveSession {
	session: Session,
	warning: Option<JoinHandle<()>>,
	expiry: JoinHandle<()>,
}

struct Inner {
	store: Arc<dyn TokenStore>,
	clock: Arc<dyn Clock>,
	config: SessionConfig,
	state: Mutex<Option<ActiveSession>>,
	events: broadcast::Sender<SessionEvent>,
}

impl Inner {
	/// Ends the session: cancels timers, clears the credential, notifies.
	///
	/// Idempotent -- a second call finds no state and does nothing.
	/// `abort_expiry` is false when the expiry timer itself is the caller,
	/// since a task must not abort its own handle mid-run.
	async fn force_logout(&self, expired: bool, abort_expiry: bool) {
		let active = {
			let mut state = self.state.lock().expect("session state lock poisoned");
			state.take()
		};
		let Some(active) = active else { return };

		if let Some(warning) = active.warning {
			warning.abort();
		}
		if abort_expiry {
			active.expiry.abort();
		}

		if let Err(err) = self.store.clear().await {
			tracing::warn!(error = %err, "Failed to clear stored credential");
		}

		if expired {
			tracing::info!(address = %active.session.address, "Session expired");
			self.events.send(SessionEvent::Expired).ok();
		} else {
			tracing::info!(address = %active.session.address, "Logged out");
		}
		self.events.send(SessionEvent::LoggedOut).ok();
	}
}

/// Single owner of the process-wide session.
///
/// Cheap to clone; all clones share one session slot. At most one pair of
/// warning/expiry timers is armed at any time -- re-arming cancels the prior
/// pair first.
#[derive(Clone)]
pub struct SessionLifecycleManager {
	inner: Arc<Inner>,
}

impl SessionLifecycleManager {
	pub fn new(store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
		let (events, _) = broadcast::channel(32);
		let inner = Arc::new(Inner {
			store,
			clock,
			config,
			state: Mutex::new(None),
			events,
		});

		spawn_store_watcher(&inner);
		Self { inner }
	}

	/// Subscribes to session lifecycle events.
	pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
		self.inner.events.subscribe()
	}

	/// Validates a token, persists it and arms the expiry timers.
	///
	/// Fail-closed: a token whose expiry cannot be decoded, or whose expiry
	/// is already past, logs out immediately and is never treated as a
	/// valid session.
	pub async fn start(&self, token: &str, address: Address) -> Result<Session, SessionError> {
		let now = self.inner.clock.now_unix();

		let expires_at = match self.inner.config.expiry_override {
			Some(window) => now + window.as_secs() as i64,
			None => match token::decode_expiry(token) {
				Ok(exp) => exp,
				Err(err) => {
					tracing::warn!(error = %err, "Undecodable session token, failing closed");
					self.logout().await;
					return Err(err);
				},
			},
		};

		if expires_at <= now {
			tracing::warn!(expires_at, now, "Session token already expired, failing closed");
			self.logout().await;
			return Err(SessionError::Expired);
		}

		let session = Session {
			token: token.to_string(),
			address,
			expires_at,
		};

		self.inner
			.store
			.save(StoredCredential {
				token: token.to_string(),
				address,
			})
			.await
			.map_err(|e| SessionError::Storage(e.to_string()))?;

		self.arm(session.clone(), now);
		tracing::info!(address = %address, expires_at, "Session started");
		self.inner
			.events
			.send(SessionEvent::Started {
				address,
				expires_at,
			})
			.ok();

		Ok(session)
	}

	/// Attempts silent restoration of a previously persisted session.
	///
	/// Runs the stored token through the same fail-closed validation as
	/// [`SessionLifecycleManager::start`]; an expired or undecodable token
	/// leaves the manager logged out.
	pub async fn restore(&self) -> Option<Session> {
		let credential = self.inner.store.load().await.ok().flatten()?;
		match self.start(&credential.token, credential.address).await {
			Ok(session) => Some(session),
			Err(err) => {
				tracing::debug!(error = %err, "Stored session not restorable");
				None
			},
		}
	}

	/// Extends the session from now by the renewal window.
	///
	/// Purely local sliding-window extension used on user activity; never
	/// contacts the backend. Safe to call frequently, and a no-op when
	/// logged out.
	pub async fn refresh(&self) {
		let now = self.inner.clock.now_unix();
		let session = {
			let state = self.inner.state.lock().expect("session state lock poisoned");
			state.as_ref().map(|active| active.session.clone())
		};
		let Some(mut session) = session else { return };

		session.expires_at = now + self.inner.config.renewal_window.as_secs() as i64;
		self.arm(session, now);
	}

	/// Ends the session. Idempotent.
	pub async fn logout(&self) {
		self.inner.force_logout(false, true).await;
	}

	/// Liveness-checked snapshot of the active session.
	///
	/// Never returns a session past its expiry: if the timers have not
	/// caught up with the clock yet, the read itself triggers the logout.
	pub async fn current(&self) -> Option<Session> {
		let session = {
			let state = self.inner.state.lock().expect("session state lock poisoned");
			state.as_ref().map(|active| active.session.clone())
		}?;

		if session.is_live(self.inner.clock.now_unix()) {
			Some(session)
		} else {
			self.inner.force_logout(true, true).await;
			None
		}
	}

	/// Seconds until expiry, or `None` when no session is active.
	pub async fn time_remaining(&self) -> Option<u64> {
		let session = self.current().await?;
		Some(session.remaining_secs(self.inner.clock.now_unix()))
	}

	/// Cancels any armed timer pair and arms a fresh one for `session`.
	fn arm(&self, session: Session, now: i64) {
		let expiry_delay = (session.expires_at - now).max(0) as u64;
		let warning_window = self.inner.config.warning_window.as_secs();
		let min_lead = self.inner.config.min_warning_lead.as_secs();

		// Preferred firing point is warning_window before expiry; clamp so
		// the warning keeps at least min_lead of lead time, or skip it for
		// sessions too short to warn about.
		let warning_delay = expiry_delay
			.checked_sub(min_lead)
			.filter(|latest| *latest > 0)
			.map(|latest| expiry_delay.saturating_sub(warning_window).min(latest));

		let weak = Arc::downgrade(&self.inner);
		let warning = warning_delay.map(|delay| {
			let seconds_left = expiry_delay - delay;
			let weak = Weak::clone(&weak);
			tokio::spawn(async move {
				tokio::time::sleep(Duration::from_secs(delay)).await;
				if let Some(inner) = weak.upgrade() {
					tracing::debug!(seconds_left, "Session expiry warning");
					inner
						.events
						.send(SessionEvent::ExpiryWarning { seconds_left })
						.ok();
				}
			})
		});

		let expiry = tokio::spawn(async move {
			tokio::time::sleep(Duration::from_secs(expiry_delay)).await;
			if let Some(inner) = weak.upgrade() {
				inner.force_logout(true, false).await;
			}
		});

		let mut state = self.inner.state.lock().expect("session state lock poisoned");
		if let Some(previous) = state.take() {
			if let Some(warning) = previous.warning {
				warning.abort();
			}
			previous.expiry.abort();
		}
		*state = Some(ActiveSession {
			session,
			warning,
			expiry,
		});
	}
}

/// Reacts to an externally observed credential removal (e.g. another
/// execution context logging out) by ending this session too.
fn spawn_store_watcher(inner: &Arc<Inner>) {
	let mut receiver = inner.store.watch();
	let weak = Arc::downgrade(inner);
	tokio::spawn(async move {
		while let Ok(event) = receiver.recv().await {
			if event != StoreEvent::Removed {
				continue;
			}
			let Some(inner) = weak.upgrade() else { break };
			inner.force_logout(false, true).await;
		}
	});
}
