//! Identity material returned by the token endpoint: id tokens, client info, and user info.
//!
//! Id tokens are decoded, never validated; the token endpoint is trusted over TLS and the claims
//! only feed cache keys and [`UserInfo`].

// crates.io
use base64::{
	Engine as _,
	engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
// self
use crate::{_prelude::*, auth::HomeAccountId};

/// Errors raised while decoding identity material.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentityError {
	/// The id token is not a three-segment compact JWT.
	#[error("Id token is not a compact JWT.")]
	MalformedIdToken,
	/// A base64url segment could not be decoded.
	#[error("The {what} segment is not valid base64url.")]
	Base64 {
		/// Which blob failed.
		what: &'static str,
	},
	/// A decoded segment is not the expected JSON object.
	#[error("The {what} payload is not valid JSON: {message}.")]
	Json {
		/// Which blob failed.
		what: &'static str,
		/// Parser message.
		message: String,
	},
}

/// Claims read from an id token payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
	/// Object id of the user in the issuing tenant.
	pub oid: Option<String>,
	/// Subject claim.
	pub sub: Option<String>,
	/// Tenant id.
	pub tid: Option<String>,
	/// Preferred username (v2 endpoints).
	pub preferred_username: Option<String>,
	/// User principal name (v1 endpoints and ADFS).
	pub upn: Option<String>,
	/// Email address.
	pub email: Option<String>,
	/// Display name.
	pub name: Option<String>,
	/// Given name.
	pub given_name: Option<String>,
	/// Family name.
	pub family_name: Option<String>,
	/// Issuer.
	pub iss: Option<String>,
	/// Identity provider, when federated.
	pub idp: Option<String>,
}

/// Raw id token plus its decoded claims.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdToken {
	raw: String,
	claims: IdTokenClaims,
}
impl IdToken {
	/// Decodes the payload segment of a compact JWT.
	pub fn parse(raw: impl Into<String>) -> Result<Self, IdentityError> {
		let raw = raw.into();
		let mut segments = raw.split('.');
		let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
			(Some(_), Some(payload), Some(_), None) => payload,
			_ => return Err(IdentityError::MalformedIdToken),
		};
		let claims = decode_json("id token", payload)?;

		Ok(Self { raw, claims })
	}

	/// Raw compact serialization.
	pub fn raw(&self) -> &str {
		&self.raw
	}

	/// Decoded claims.
	pub fn claims(&self) -> &IdTokenClaims {
		&self.claims
	}

	/// Tenant id claim.
	pub fn tenant_id(&self) -> Option<&str> {
		self.claims.tid.as_deref()
	}
}

/// Client info blob (`{"uid": .., "utid": ..}`) returned when `client_info=1` is requested.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
	/// User object id in the home tenant.
	pub uid: String,
	/// Home tenant id.
	pub utid: String,
}
impl ClientInfo {
	/// Decodes the base64url JSON blob.
	pub fn parse(raw: &str) -> Result<Self, IdentityError> {
		decode_json("client info", raw)
	}

	/// Home account identifier derived from the blob.
	pub fn home_account_id(&self) -> Option<HomeAccountId> {
		HomeAccountId::from_parts(&self.uid, &self.utid).ok()
	}
}

/// User identity attached to an acquisition result and to cache records.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserInfo {
	/// Immutable user id (`oid`, falling back to `sub`).
	pub unique_id: Option<String>,
	/// Displayable id (`preferred_username`, `upn`, or `email`).
	pub displayable_id: Option<String>,
	/// Given name.
	pub given_name: Option<String>,
	/// Family name.
	pub family_name: Option<String>,
	/// Identity provider (issuer or `idp` claim).
	pub identity_provider: Option<String>,
	/// Home account id from client info.
	pub home_account_id: Option<HomeAccountId>,
}
impl UserInfo {
	/// Builds user info from id token claims and an optional client info blob.
	pub fn from_id_token(id_token: &IdToken, client_info: Option<&ClientInfo>) -> Self {
		let claims = id_token.claims();

		Self {
			unique_id: claims.oid.clone().or_else(|| claims.sub.clone()),
			displayable_id: claims
				.preferred_username
				.clone()
				.or_else(|| claims.upn.clone())
				.or_else(|| claims.email.clone()),
			given_name: claims.given_name.clone(),
			family_name: claims.family_name.clone(),
			identity_provider: claims.idp.clone().or_else(|| claims.iss.clone()),
			home_account_id: client_info.and_then(ClientInfo::home_account_id),
		}
	}

	/// Case-insensitive displayable id comparison.
	pub fn displayable_id_matches(&self, other: &str) -> bool {
		self.displayable_id.as_deref().is_some_and(|value| value.eq_ignore_ascii_case(other))
	}
}

/// Signed-in account known to the cache or to a native broker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
	/// Home account identifier.
	pub home_account_id: Option<HomeAccountId>,
	/// Authority host the account signed in against.
	pub environment: String,
	/// Displayable id.
	pub username: Option<String>,
	/// Immutable user id.
	pub unique_id: Option<String>,
}

fn decode_json<T>(what: &'static str, segment: &str) -> Result<T, IdentityError>
where
	T: for<'de> Deserialize<'de>,
{
	let trimmed = segment.trim_end_matches('=');
	let bytes = URL_SAFE_NO_PAD
		.decode(trimmed)
		.or_else(|_| URL_SAFE.decode(segment))
		.map_err(|_| IdentityError::Base64 { what })?;

	serde_json::from_slice(&bytes)
		.map_err(|e| IdentityError::Json { what, message: e.to_string() })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn encode(json: &str) -> String {
		URL_SAFE_NO_PAD.encode(json.as_bytes())
	}

	#[test]
	fn id_token_claims_feed_user_info() {
		let raw = format!(
			"{}.{}.sig",
			encode("{\"alg\":\"none\"}"),
			encode(
				"{\"oid\":\"oid-1\",\"sub\":\"sub-1\",\"tid\":\"tenant-1\",\"preferred_username\":\"ada@contoso.com\",\"iss\":\"https://login.example.com/tenant-1/v2.0\"}"
			),
		);
		let id_token = IdToken::parse(raw).expect("Id token fixture should decode.");
		let client_info = ClientInfo::parse(&encode("{\"uid\":\"oid-1\",\"utid\":\"tenant-1\"}"))
			.expect("Client info fixture should decode.");
		let user = UserInfo::from_id_token(&id_token, Some(&client_info));

		assert_eq!(id_token.tenant_id(), Some("tenant-1"));
		assert_eq!(user.unique_id.as_deref(), Some("oid-1"));
		assert_eq!(user.displayable_id.as_deref(), Some("ada@contoso.com"));
		assert_eq!(user.home_account_id.as_deref(), Some("oid-1.tenant-1"));
		assert!(user.displayable_id_matches("ADA@contoso.com"));
	}

	#[test]
	fn malformed_material_is_rejected() {
		assert_eq!(IdToken::parse("not-a-jwt"), Err(IdentityError::MalformedIdToken));
		assert!(matches!(IdToken::parse("a.%%%.c"), Err(IdentityError::Base64 { .. })));
		assert!(matches!(
			ClientInfo::parse(&encode("[1,2]")),
			Err(IdentityError::Json { what: "client info", .. })
		));
	}

	#[test]
	fn padded_client_info_is_accepted() {
		let padded = URL_SAFE.encode("{\"uid\":\"u\",\"utid\":\"t\"}");
		let info = ClientInfo::parse(&padded).expect("Padded client info should decode.");

		assert_eq!(info.uid, "u");
	}
}
