//! Native broker collaborator contract.
//!
//! A broker is an OS-level component that owns the user's credentials and performs
//! acquisitions on the application's behalf. When one is installed and invokable it is
//! authoritative: its result is returned as-is and never written into the local cache.

// self
use crate::{
	_prelude::*,
	auth::{Account, AuthenticationResult, ClientId, ScopeSet},
	authority::Authority,
};

/// Boxed future returned by [`NativeBroker`] methods.
pub type BrokerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BrokerError>> + 'a + Send>>;

/// Broker failure payload, surfaced to callers without translation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
#[error("Broker returned `{code}`{}.", describe(.description.as_deref()))]
pub struct BrokerError {
	/// Broker error code.
	pub code: String,
	/// Human-readable description.
	pub description: Option<String>,
	/// Platform-specific status, if the broker reports one.
	pub status: Option<i64>,
}
impl BrokerError {
	/// Creates an error with the provided code.
	pub fn new(code: impl Into<String>) -> Self {
		Self { code: code.into(), description: None, status: None }
	}

	/// Attaches a description.
	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());

		self
	}
}

fn describe(description: Option<&str>) -> String {
	description.map(|d| format!(": {d}")).unwrap_or_default()
}

/// Which broker entry point a flow uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BrokerMode {
	/// Broker may prompt the user.
	Interactive,
	/// Broker must not prompt.
	Silent,
}

/// Request forwarded to a native broker.
#[derive(Clone, Debug)]
pub struct BrokerRequest {
	/// Authority the token is requested from.
	pub authority: Authority,
	/// Application requesting the token.
	pub client_id: ClientId,
	/// Requested scope.
	pub scope: ScopeSet,
	/// Correlation id of the logical request.
	pub correlation_id: Uuid,
	/// Displayable id hint.
	pub login_hint: Option<String>,
	/// Immutable user id, when the caller targets a known account.
	pub unique_id: Option<String>,
	/// Claims challenge to forward.
	pub claims: Option<String>,
	/// Extra query parameters supplied by the caller.
	pub extra_query_parameters: BTreeMap<String, String>,
	/// Whether the caller asked to bypass cached tokens.
	pub force_refresh: bool,
}

/// Platform broker (account manager) the pipeline can delegate to.
pub trait NativeBroker
where
	Self: Send + Sync,
{
	/// Returns `true` when the broker is installed and may be invoked from this context.
	fn is_installed_and_invokable(&self) -> bool;

	/// Acquires a token, possibly prompting the user.
	fn acquire_token_interactive<'a>(
		&'a self,
		request: &'a BrokerRequest,
	) -> BrokerFuture<'a, AuthenticationResult>;

	/// Acquires a token without prompting.
	fn acquire_token_silent<'a>(
		&'a self,
		request: &'a BrokerRequest,
	) -> BrokerFuture<'a, AuthenticationResult>;

	/// Lists the accounts the broker knows for `client_id`.
	fn get_accounts<'a>(&'a self, client_id: &'a ClientId) -> BrokerFuture<'a, Vec<Account>>;

	/// Signs `account` out of the broker for `client_id`.
	fn remove_account<'a>(
		&'a self,
		client_id: &'a ClientId,
		account: &'a Account,
	) -> BrokerFuture<'a, ()>;
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn broker_errors_render_code_and_description() {
		let err = BrokerError::new("user_canceled").with_description("Sign-in was dismissed");

		assert_eq!(err.to_string(), "Broker returned `user_canceled`: Sign-in was dismissed.");
		assert_eq!(BrokerError::new("no_account").to_string(), "Broker returned `no_account`.");

		let wrapped = Error::from(err);

		assert_eq!(wrapped.telemetry_code(), "user_canceled");
	}
}
