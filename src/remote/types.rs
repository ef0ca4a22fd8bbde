//! Types for the remote store boundary

use crate::ledger::types::{AccountId, Balance};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of submitting one operation to the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
	/// The remote applied the operation (or had already applied it).
	Accepted {
		/// Remote balance of the source account after applying, if reported.
		remote_balance: Option<Balance>,
	},
	/// The remote refused the operation; the local effect must be rolled back.
	Rejected(RejectReason),
	/// The remote could not be reached; the operation stays pending.
	Unreachable(String),
}

/// Why the remote refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
	/// Merged with operations the remote already has, the balance would drop below the floor.
	BalanceFloor {
		account: AccountId,
		remote_balance: Balance,
		floor: Balance,
	},
	/// The remote does not know one of the accounts.
	UnknownAccount { account: AccountId },
	/// Anything else the remote reported.
	Invalid { message: String },
}

impl fmt::Display for RejectReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			RejectReason::BalanceFloor {
				account,
				remote_balance,
				floor,
			} => write!(
				f,
				"balance of {} would fall below {} (remote balance {})",
				account, floor, remote_balance
			),
			RejectReason::UnknownAccount { account } => {
				write!(f, "account {} is unknown to the remote store", account)
			}
			RejectReason::Invalid { message } => write!(f, "{}", message),
		}
	}
}

/// Body returned by the remote service when it accepts an operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AcceptedResponse {
	#[serde(rename = "remoteBalance", default)]
	pub remote_balance: Option<Balance>,
}

/// Configuration of the remote store connection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
	/// Base URL of the remote ledger service; `None` runs local-only.
	pub url: Option<String>,
	/// Client-side timeout for a single HTTP request.
	pub request_timeout_ms: u64,
}

impl Default for RemoteConfig {
	fn default() -> Self {
		Self {
			url: None,
			request_timeout_ms: 5000,
		}
	}
}

/// Error types for remote store operations
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Invalid remote URL: {0}")]
	UrlError(String),

	#[error("Unexpected status: {0}")]
	StatusError(u16),
}
