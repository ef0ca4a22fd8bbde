//!
//! HTTP client for a remote ledger service.
//!
//! Operations are posted as JSON to `{base}/operations`. A 2xx answer accepts the
//! operation, 409 or 422 rejects it with a JSON reason, and everything else (including
//! timeouts and connection errors) is treated as the remote being unreachable.

use super::store::RemoteStore;
use super::types::{AcceptedResponse, RejectReason, RemoteConfig, RemoteError, SubmitOutcome};
use crate::ledger::types::Operation;

use backoff::{ExponentialBackoff, future::retry};
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use tracing::{debug, warn};

/// Remote ledger service reached over HTTP
#[derive(Clone)]
pub struct HttpRemoteStore {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL, always ending in a slash so relative joins keep its path.
	base_url: Url,
	/// Upper bound for the whole liveness probe including retries.
	probe_budget: Duration,
}

impl HttpRemoteStore {
	/// Create a new client for the configured base URL.
	pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
		let raw = config
			.url
			.as_deref()
			.ok_or_else(|| RemoteError::UrlError("no remote URL configured".to_string()))?;
		let base_url = Self::normalize_base(raw)?;

		let timeout = Duration::from_millis(config.request_timeout_ms);
		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			base_url,
			probe_budget: timeout,
		})
	}

	fn normalize_base(raw: &str) -> Result<Url, RemoteError> {
		let with_slash = if raw.ends_with('/') {
			raw.to_string()
		} else {
			format!("{}/", raw)
		};
		Url::parse(&with_slash).map_err(|e| RemoteError::UrlError(format!("{}: {}", raw, e)))
	}

	fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
		self.base_url
			.join(path)
			.map_err(|e| RemoteError::UrlError(e.to_string()))
	}

	async fn post_operation(&self, op: &Operation) -> Result<SubmitOutcome, RemoteError> {
		let url = self.endpoint("operations")?;
		let response = self.http_client.post(url).json(op).send().await?;
		let status = response.status();
		let body = response.bytes().await?;

		if status.is_success() {
			let accepted: AcceptedResponse = if body.is_empty() {
				AcceptedResponse::default()
			} else {
				serde_json::from_slice(&body)?
			};
			return Ok(SubmitOutcome::Accepted {
				remote_balance: accepted.remote_balance,
			});
		}

		if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
			let reason = serde_json::from_slice::<RejectReason>(&body).unwrap_or_else(|_| {
				RejectReason::Invalid {
					message: String::from_utf8_lossy(&body).into_owned(),
				}
			});
			return Ok(SubmitOutcome::Rejected(reason));
		}

		Err(RemoteError::StatusError(status.as_u16()))
	}
}

#[async_trait::async_trait]
impl RemoteStore for HttpRemoteStore {
	async fn submit_operation(&self, op: &Operation) -> SubmitOutcome {
		match self.post_operation(op).await {
			Ok(outcome) => {
				debug!("Remote answered {:?} for {}", outcome, op.id());
				outcome
			}
			Err(e) => {
				warn!("Submitting {} failed: {}", op.id(), e);
				SubmitOutcome::Unreachable(e.to_string())
			}
		}
	}

	async fn probe(&self) -> bool {
		let url = match self.endpoint("health") {
			Ok(url) => url,
			Err(e) => {
				warn!("Cannot build health URL: {}", e);
				return false;
			}
		};

		let policy = ExponentialBackoff {
			initial_interval: Duration::from_millis(100),
			max_elapsed_time: Some(self.probe_budget),
			..ExponentialBackoff::default()
		};

		let result = retry(policy, || async {
			let response = self
				.http_client
				.get(url.clone())
				.send()
				.await
				.map_err(backoff::Error::transient)?;
			response
				.error_for_status()
				.map_err(backoff::Error::transient)?;
			Ok::<(), backoff::Error<reqwest::Error>>(())
		})
		.await;

		match result {
			Ok(()) => true,
			Err(e) => {
				debug!("Liveness probe against {} failed: {}", self.base_url, e);
				false
			}
		}
	}

	fn name(&self) -> &'static str {
		"HttpRemoteStore"
	}
}
