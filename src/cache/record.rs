//! Cache records and their key derivation.
//!
//! Keys are lowercase, `-`-joined strings so the in-memory maps and the persisted `Current`
//! format share one representation.

// self
use crate::{
	_prelude::*,
	auth::{
		AuthenticationResult, CachedIdentity, ClientId, HomeAccountId, ScopeSet, Subject,
		TokenSecret, TokenSource, UserInfo,
	},
};

/// Access token cached for `(authority, client, subject, scope)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessTokenRecord {
	/// Canonical authority the token was issued by.
	pub authority: String,
	/// Authority host.
	pub environment: String,
	/// Tenant the token was issued in.
	pub realm: String,
	/// Application the token was issued to.
	pub client_id: ClientId,
	/// Token subject.
	pub subject: Subject,
	/// Target scope, OIDC scopes excluded.
	pub scope: ScopeSet,
	/// Access token.
	pub secret: TokenSecret,
	/// Token type.
	pub token_type: String,
	/// Instant the record was written.
	pub cached_at: OffsetDateTime,
	/// Expiry.
	pub expires_on: OffsetDateTime,
	/// Extended expiry used by the resiliency fallback.
	pub extended_expires_on: OffsetDateTime,
	/// Home account id from client info.
	pub home_account_id: Option<HomeAccountId>,
}
impl AccessTokenRecord {
	/// Key string for this record.
	pub fn key(&self) -> String {
		access_token_key(&self.authority, &self.client_id, &self.subject, &self.scope)
	}

	/// Converts the record back into a public result.
	pub fn to_result(&self, identity: &CachedIdentity, source: TokenSource) -> AuthenticationResult {
		AuthenticationResult {
			access_token: self.secret.clone(),
			token_type: self.token_type.clone(),
			expires_on: self.expires_on,
			extended_expires_on: self.extended_expires_on,
			is_extended_lifetime_token: false,
			id_token: identity.id_token.clone(),
			tenant_id: identity.tenant_id.clone().or_else(|| Some(self.realm.clone())),
			user: identity.user.clone(),
			scope: self.scope.clone(),
			authority: self.authority.clone(),
			correlation_id: Uuid::nil(),
			source,
		}
	}
}

/// Refresh token cached for `(environment, client, subject)`; serves any scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshTokenRecord {
	/// Authority host.
	pub environment: String,
	/// Application the token was issued to.
	pub client_id: ClientId,
	/// Token subject.
	pub subject: Subject,
	/// Refresh token.
	pub secret: TokenSecret,
	/// Family of client ids sharing this token.
	pub family_id: Option<String>,
	/// Home account id from client info.
	pub home_account_id: Option<HomeAccountId>,
	/// Raw client info blob.
	pub client_info: Option<String>,
	/// Canonical authority of the last write; the legacy format is keyed by it.
	pub authority: String,
}
impl RefreshTokenRecord {
	/// Key string for this record.
	pub fn key(&self) -> String {
		refresh_token_key(&self.environment, &self.client_id, &self.subject)
	}
}

/// Raw id token cached for `(authority, client, subject)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdTokenRecord {
	/// Canonical authority.
	pub authority: String,
	/// Authority host.
	pub environment: String,
	/// Tenant.
	pub realm: String,
	/// Application the token was issued to.
	pub client_id: ClientId,
	/// Token subject.
	pub subject: Subject,
	/// Raw id token.
	pub secret: String,
	/// Tenant id reported by the response.
	pub tenant_id: Option<String>,
	/// User decoded from the id token.
	pub user: Option<UserInfo>,
	/// Home account id from client info.
	pub home_account_id: Option<HomeAccountId>,
}
impl IdTokenRecord {
	/// Key string for this record.
	pub fn key(&self) -> String {
		id_token_key(&self.authority, &self.client_id, &self.subject)
	}
}

/// Signed-in account cached for `(environment, subject)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountRecord {
	/// Authority host.
	pub environment: String,
	/// Tenant the account last signed in to.
	pub realm: String,
	/// Account subject.
	pub subject: Subject,
	/// Home account id.
	pub home_account_id: Option<HomeAccountId>,
	/// Displayable user info.
	pub user: UserInfo,
	/// Raw client info blob.
	pub client_info: Option<String>,
}
impl AccountRecord {
	/// Key string for this record.
	pub fn key(&self) -> String {
		account_key(&self.environment, &self.subject)
	}

	/// Public view of the account.
	pub fn to_account(&self) -> crate::auth::Account {
		crate::auth::Account {
			home_account_id: self.home_account_id.clone(),
			environment: self.environment.clone(),
			username: self.user.displayable_id.clone(),
			unique_id: self.subject.unique_id.clone(),
		}
	}
}

/// Access token key.
pub fn access_token_key(
	authority: &str,
	client_id: &ClientId,
	subject: &Subject,
	scope: &ScopeSet,
) -> String {
	let subject = subject.key_fragment();
	let scope = scope.normalized();

	join_key(&[authority, client_id.as_ref(), &subject, &scope])
}

/// Refresh token key.
pub fn refresh_token_key(environment: &str, client_id: &ClientId, subject: &Subject) -> String {
	join_key(&[environment, client_id.as_ref(), subject.key_fragment().as_str()])
}

/// Id token key.
pub fn id_token_key(authority: &str, client_id: &ClientId, subject: &Subject) -> String {
	join_key(&[authority, client_id.as_ref(), subject.key_fragment().as_str()])
}

/// Account key.
pub fn account_key(environment: &str, subject: &Subject) -> String {
	join_key(&[environment, subject.key_fragment().as_str()])
}

fn join_key(parts: &[&str]) -> String {
	parts.join("-").to_ascii_lowercase()
}
