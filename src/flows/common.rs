//! Parameters shared by every acquisition entry point.

// crates.io
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	auth::{Account, ScopeSet, Subject},
	authority::Authority,
	context::RequestContext,
	obs::FlowKind,
};

/// Common request parameters; variant-specific inputs are passed next to them.
#[derive(Clone, Debug)]
pub struct AcquireTokenParameters {
	/// Authority to request the token from.
	pub authority: Authority,
	/// Requested scope.
	pub scope: ScopeSet,
	/// Account targeted by the request.
	pub account: Option<Account>,
	/// Displayable id hint when no account is known yet.
	pub login_hint: Option<String>,
	/// Skip cached access tokens.
	pub force_refresh: bool,
	/// Claims challenge forwarded to the identity provider.
	pub claims: Option<String>,
	/// Extra query parameters appended to every endpoint URL.
	pub extra_query_parameters: BTreeMap<String, String>,
	/// Caller-supplied correlation id.
	pub correlation_id: Option<Uuid>,
	/// Caller-supplied cancellation signal.
	pub cancellation: Option<CancellationToken>,
}
impl AcquireTokenParameters {
	/// Parameters for `scope` at `authority`.
	pub fn new(authority: Authority, scope: ScopeSet) -> Self {
		Self {
			authority,
			scope,
			account: None,
			login_hint: None,
			force_refresh: false,
			claims: None,
			extra_query_parameters: BTreeMap::new(),
			correlation_id: None,
			cancellation: None,
		}
	}

	/// Targets a known account.
	pub fn with_account(mut self, account: Account) -> Self {
		self.account = Some(account);

		self
	}

	/// Sets the displayable id hint.
	pub fn with_login_hint(mut self, login_hint: impl Into<String>) -> Self {
		self.login_hint = Some(login_hint.into());

		self
	}

	/// Bypasses cached access tokens.
	pub fn force_refresh(mut self, force_refresh: bool) -> Self {
		self.force_refresh = force_refresh;

		self
	}

	/// Forwards a claims challenge.
	pub fn with_claims(mut self, claims: impl Into<String>) -> Self {
		self.claims = Some(claims.into());

		self
	}

	/// Adds an extra query parameter.
	pub fn with_extra_query_parameter(
		mut self,
		name: impl Into<String>,
		value: impl Into<String>,
	) -> Self {
		self.extra_query_parameters.insert(name.into(), value.into());

		self
	}

	/// Uses `correlation_id` instead of a random one.
	pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
		self.correlation_id = Some(correlation_id);

		self
	}

	/// Observes `cancellation` for every await of the request.
	pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
		self.cancellation = Some(cancellation);

		self
	}

	/// User subject selected by the account or the login hint.
	pub fn user_subject(&self) -> Subject {
		let unique_id = self.account.as_ref().and_then(|account| account.unique_id.clone());
		let displayable_id = self
			.account
			.as_ref()
			.and_then(|account| account.username.clone())
			.or_else(|| self.login_hint.clone());

		Subject::user(unique_id, displayable_id)
	}

	pub(crate) fn context(&self, kind: FlowKind) -> RequestContext {
		RequestContext::with_parts(kind, self.correlation_id, self.cancellation.clone())
	}
}
