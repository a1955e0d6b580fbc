//! Acquisition results and the internal wrapper that also carries the refresh token.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret, UserInfo},
};

/// Where the access token of a result came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
	/// Unexpired token served from the cache.
	Cache,
	/// Token obtained by redeeming a cached refresh token.
	Refresh,
	/// Token returned by the native broker.
	Broker,
	/// Token returned by the identity provider's token endpoint.
	IdentityProvider,
	/// Extended-lifetime token served while the identity provider was unavailable.
	StaleCache,
}
impl TokenSource {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			TokenSource::Cache => "cache",
			TokenSource::Refresh => "refresh",
			TokenSource::Broker => "broker",
			TokenSource::IdentityProvider => "identity_provider",
			TokenSource::StaleCache => "stale_cache",
		}
	}
}

/// Errors produced by [`AuthenticationResultBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ResultBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_on or expires_in.")]
	MissingExpiry,
}

/// Public outcome of an acquisition.
#[derive(Clone)]
pub struct AuthenticationResult {
	/// Access token secret; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Token type (usually `Bearer`).
	pub token_type: String,
	/// Instant after which the access token must not be used.
	pub expires_on: OffsetDateTime,
	/// Instant until which the token may be served while the provider is unavailable.
	pub extended_expires_on: OffsetDateTime,
	/// Set when the token was served past `expires_on` under the resiliency rule.
	pub is_extended_lifetime_token: bool,
	/// Raw id token, if one was issued.
	pub id_token: Option<String>,
	/// Tenant the token was issued in.
	pub tenant_id: Option<String>,
	/// Signed-in user, absent for application tokens.
	pub user: Option<UserInfo>,
	/// Scope the token is cached under.
	pub scope: ScopeSet,
	/// Authority that issued the token.
	pub authority: String,
	/// Correlation id of the request that produced this result.
	pub correlation_id: Uuid,
	/// Origin of the access token.
	pub source: TokenSource,
}
impl AuthenticationResult {
	/// Returns a builder for a result with the provided scope and authority.
	pub fn builder(scope: ScopeSet, authority: impl Into<String>) -> AuthenticationResultBuilder {
		AuthenticationResultBuilder::new(scope, authority.into())
	}

	/// Returns `true` if the token is expired (or will be within `margin`) at `instant`.
	pub fn expires_within(&self, instant: OffsetDateTime, margin: Duration) -> bool {
		self.expires_on <= instant + margin
	}

	/// Returns `true` if `instant` is still inside the extended lifetime window.
	pub fn within_extended_lifetime(&self, instant: OffsetDateTime) -> bool {
		instant < self.extended_expires_on
	}
}
impl Debug for AuthenticationResult {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthenticationResult")
			.field("access_token", &"<redacted>")
			.field("token_type", &self.token_type)
			.field("expires_on", &self.expires_on)
			.field("extended_expires_on", &self.extended_expires_on)
			.field("is_extended_lifetime_token", &self.is_extended_lifetime_token)
			.field("tenant_id", &self.tenant_id)
			.field("user", &self.user)
			.field("scope", &self.scope)
			.field("authority", &self.authority)
			.field("correlation_id", &self.correlation_id)
			.field("source", &self.source)
			.finish()
	}
}

/// Builder for [`AuthenticationResult`].
#[derive(Clone, Debug)]
pub struct AuthenticationResultBuilder {
	scope: ScopeSet,
	authority: String,
	access_token: Option<TokenSecret>,
	token_type: String,
	issued_at: Option<OffsetDateTime>,
	expires_on: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	extended_expires_in: Option<Duration>,
	id_token: Option<String>,
	tenant_id: Option<String>,
	user: Option<UserInfo>,
	correlation_id: Uuid,
	source: TokenSource,
}
impl AuthenticationResultBuilder {
	fn new(scope: ScopeSet, authority: String) -> Self {
		Self {
			scope,
			authority,
			access_token: None,
			token_type: "Bearer".into(),
			issued_at: None,
			expires_on: None,
			expires_in: None,
			extended_expires_in: None,
			id_token: None,
			tenant_id: None,
			user: None,
			correlation_id: Uuid::nil(),
			source: TokenSource::IdentityProvider,
		}
	}

	/// Sets the access token secret.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Overrides the token type.
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = token_type.into();

		self
	}

	/// Sets the issued-at instant used with relative lifetimes.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_on(mut self, instant: OffsetDateTime) -> Self {
		self.expires_on = Some(instant);

		self
	}

	/// Sets a relative lifetime.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Sets the relative extended lifetime; defaults to the regular lifetime.
	pub fn extended_expires_in(mut self, duration: Duration) -> Self {
		self.extended_expires_in = Some(duration);

		self
	}

	/// Attaches the raw id token.
	pub fn id_token(mut self, raw: impl Into<String>) -> Self {
		self.id_token = Some(raw.into());

		self
	}

	/// Sets the tenant id.
	pub fn tenant_id(mut self, tenant: impl Into<String>) -> Self {
		self.tenant_id = Some(tenant.into());

		self
	}

	/// Sets the user.
	pub fn user(mut self, user: UserInfo) -> Self {
		self.user = Some(user);

		self
	}

	/// Sets the correlation id.
	pub fn correlation_id(mut self, id: Uuid) -> Self {
		self.correlation_id = id;

		self
	}

	/// Sets the token source.
	pub fn source(mut self, source: TokenSource) -> Self {
		self.source = source;

		self
	}

	/// Consumes the builder and validates the result.
	pub fn build(self) -> Result<AuthenticationResult, ResultBuilderError> {
		let access_token = self.access_token.ok_or(ResultBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_on = match (self.expires_on, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(duration)) => issued_at + duration,
			(None, None) => return Err(ResultBuilderError::MissingExpiry),
		};
		let extended_expires_on = match self.extended_expires_in {
			Some(duration) => (issued_at + duration).max(expires_on),
			None => expires_on,
		};

		Ok(AuthenticationResult {
			access_token,
			token_type: self.token_type,
			expires_on,
			extended_expires_on,
			is_extended_lifetime_token: false,
			id_token: self.id_token,
			tenant_id: self.tenant_id,
			user: self.user,
			scope: self.scope,
			authority: self.authority,
			correlation_id: self.correlation_id,
			source: self.source,
		})
	}
}

/// Outcome of one token-producing operation: the public result plus internal-only material.
#[derive(Clone)]
pub struct ResultWrapper {
	/// Public result.
	pub result: AuthenticationResult,
	/// Refresh token, never exposed to callers.
	pub refresh_token: Option<TokenSecret>,
	/// Raw client info blob.
	pub client_info: Option<String>,
	/// Family of client ids sharing the refresh token.
	pub family_id: Option<String>,
}
impl ResultWrapper {
	/// Wraps a public result without refresh material.
	pub fn new(result: AuthenticationResult) -> Self {
		Self { result, refresh_token: None, client_info: None, family_id: None }
	}

	/// Attaches a refresh token.
	pub fn with_refresh_token(mut self, secret: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(secret));

		self
	}

	/// Carries identity from a previously cached result when the new response lacks it.
	pub fn carry_over_identity(&mut self, prior: &CachedIdentity) {
		if self.result.id_token.is_some() {
			return;
		}

		self.result.id_token = prior.id_token.clone();
		self.result.tenant_id = prior.tenant_id.clone();
		self.result.user = prior.user.clone();

		if self.client_info.is_none() {
			self.client_info = prior.client_info.clone();
		}
	}
}
impl Debug for ResultWrapper {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResultWrapper")
			.field("result", &self.result)
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("client_info", &self.client_info)
			.field("family_id", &self.family_id)
			.finish()
	}
}

/// Identity material remembered alongside a cached refresh token.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CachedIdentity {
	/// Raw id token.
	pub id_token: Option<String>,
	/// Tenant id.
	pub tenant_id: Option<String>,
	/// User info.
	pub user: Option<UserInfo>,
	/// Raw client info blob.
	pub client_info: Option<String>,
}

/// Refresh token found for a subject whose access token is absent or stale.
#[derive(Clone)]
pub struct RefreshCandidate {
	/// Cached refresh token.
	pub refresh_token: TokenSecret,
	/// Identity to carry over when the refresh response has no id token.
	pub identity: CachedIdentity,
}
impl Debug for RefreshCandidate {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCandidate")
			.field("refresh_token", &"<redacted>")
			.field("identity", &self.identity)
			.finish()
	}
}
