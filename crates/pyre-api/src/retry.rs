//! HTTP retry wrapper with exponential backoff.
//!
//! Rate-limited and transport-failed requests are retried a bounded number
//! of times with a computed delay; everything else is returned to the caller
//! on the first attempt. The loop is explicit so termination is guaranteed
//! by the attempt counter.

use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Errors raised once retries are exhausted.
#[derive(Debug, Error)]
pub enum FetchError {
	/// The transport kept failing; carries the final error.
	#[error("Request failed after {attempts} attempts: {source}")]
	Transport {
		attempts: u32,
		#[source]
		source: reqwest::Error,
	},
	/// The provider kept answering with a rate limit.
	#[error("Rate limited after {0} attempts")]
	RateLimited(u32),
}

/// A fully-read HTTP response.
///
/// The body is read eagerly so rate-limit detection can inspect it and so
/// callers decode JSON from a plain string.
#[derive(Debug, Clone)]
pub struct FetchResponse {
	pub status: StatusCode,
	pub body: String,
}

impl FetchResponse {
	pub fn is_success(&self) -> bool {
		self.status.is_success()
	}
}

/// Bounded-retry HTTP call wrapper.
#[derive(Debug, Clone)]
pub struct RetryingFetcher {
	max_attempts: u32,
	base_delay: Duration,
}

impl Default for RetryingFetcher {
	fn default() -> Self {
		Self::new(3, Duration::from_secs(1))
	}
}

impl RetryingFetcher {
	pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
		Self {
			max_attempts: max_attempts.max(1),
			base_delay,
		}
	}

	/// Executes the request, retrying on rate limits and transport errors.
	///
	/// The closure is invoked once per attempt so each retry builds a fresh
	/// request. Attempt `n` waits `base_delay * 2^(n-1)` before retrying.
	pub async fn send<F, Fut>(&self, mut request: F) -> Result<FetchResponse, FetchError>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
	{
		let mut attempt = 0;
		loop {
			attempt += 1;
			match request().await {
				Ok(response) => {
					let status = response.status();
					let body = match response.text().await {
						Ok(body) => body,
						Err(source) => {
							if attempt < self.max_attempts {
								self.backoff(attempt).await;
								continue;
							}
							return Err(FetchError::Transport {
								attempts: attempt,
								source,
							});
						},
					};

					if is_rate_limited(status, &body) {
						if attempt < self.max_attempts {
							tracing::debug!(attempt, %status, "Rate limited, backing off");
							self.backoff(attempt).await;
							continue;
						}
						return Err(FetchError::RateLimited(attempt));
					}

					return Ok(FetchResponse { status, body });
				},
				Err(source) => {
					if attempt < self.max_attempts {
						tracing::debug!(attempt, error = %source, "Transport error, backing off");
						self.backoff(attempt).await;
						continue;
					}
					return Err(FetchError::Transport {
						attempts: attempt,
						source,
					});
				},
			}
		}
	}

	async fn backoff(&self, attempt: u32) {
		let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
		tokio::time::sleep(delay).await;
	}
}

/// Rate limits arrive as 429s, or from some indexers as error bodies that
/// merely mention the limit.
fn is_rate_limited(status: StatusCode, body: &str) -> bool {
	status == StatusCode::TOO_MANY_REQUESTS
		|| (!status.is_success() && body.to_ascii_lowercase().contains("rate limit"))
}
