//! Authority model: URL validation, type detection, tenant updates, and endpoint resolution.

pub mod resolver;

pub use resolver::*;

// self
use crate::{_prelude::*, auth::TenantId};

/// Errors raised while parsing an authority URL.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AuthorityError {
	/// The authority is not a valid absolute URL.
	#[error("Authority `{authority}` is not a valid URL.")]
	InvalidUrl {
		/// Input that failed to parse.
		authority: String,
	},
	/// Authorities must use HTTPS.
	#[error("Authority must use HTTPS: {authority}.")]
	InsecureAuthority {
		/// Offending authority.
		authority: String,
	},
	/// The authority path must name a tenant.
	#[error("Authority `{authority}` is missing a tenant segment.")]
	MissingTenant {
		/// Offending authority.
		authority: String,
	},
	/// B2C authorities must name a policy after the tenant.
	#[error("B2C authority `{authority}` is missing a policy segment.")]
	MissingPolicy {
		/// Offending authority.
		authority: String,
	},
}

/// Authority flavor, detected from the first path segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityType {
	/// Azure AD style `https://{host}/{tenant}/`.
	Aad,
	/// On-premises ADFS `https://{host}/adfs/`.
	Adfs,
	/// B2C `https://{host}/tfp/{tenant}/{policy}/`.
	B2c,
}
impl AuthorityType {
	/// Returns a stable label suitable for logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			AuthorityType::Aad => "aad",
			AuthorityType::Adfs => "adfs",
			AuthorityType::B2c => "b2c",
		}
	}
}

/// Validated, canonical authority.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Authority {
	canonical: String,
	host: String,
	tenant: String,
	policy: Option<String>,
	kind: AuthorityType,
}
impl Authority {
	/// Parses and canonicalizes an authority URL.
	pub fn parse(authority: &str) -> Result<Self, AuthorityError> {
		let url = Url::parse(authority)
			.map_err(|_| AuthorityError::InvalidUrl { authority: authority.to_owned() })?;

		if url.scheme() != "https" {
			return Err(AuthorityError::InsecureAuthority { authority: authority.to_owned() });
		}

		let host = match (url.host_str(), url.port()) {
			(Some(host), Some(port)) => format!("{}:{port}", host.to_ascii_lowercase()),
			(Some(host), None) => host.to_ascii_lowercase(),
			(None, _) =>
				return Err(AuthorityError::InvalidUrl { authority: authority.to_owned() }),
		};
		let segments = url
			.path_segments()
			.map(|segments| segments.filter(|s| !s.is_empty()).collect::<Vec<_>>())
			.unwrap_or_default();
		let missing_tenant = || AuthorityError::MissingTenant { authority: authority.to_owned() };
		let first = segments.first().ok_or_else(missing_tenant)?;

		if first.eq_ignore_ascii_case("adfs") {
			return Ok(Self::from_parts(host, "adfs".into(), None, AuthorityType::Adfs));
		}
		if first.eq_ignore_ascii_case("tfp") {
			let tenant = segments.get(1).ok_or_else(missing_tenant)?;
			let policy = segments
				.get(2)
				.ok_or_else(|| AuthorityError::MissingPolicy { authority: authority.to_owned() })?;

			return Ok(Self::from_parts(
				host,
				tenant.to_string(),
				Some(policy.to_string()),
				AuthorityType::B2c,
			));
		}

		Ok(Self::from_parts(host, first.to_string(), None, AuthorityType::Aad))
	}

	fn from_parts(host: String, tenant: String, policy: Option<String>, kind: AuthorityType) -> Self {
		let canonical = match (&kind, &policy) {
			(AuthorityType::Adfs, _) => format!("https://{host}/adfs/"),
			(AuthorityType::B2c, Some(policy)) => format!("https://{host}/tfp/{tenant}/{policy}/"),
			_ => format!("https://{host}/{tenant}/"),
		}
		.to_ascii_lowercase();

		Self { canonical, host, tenant, policy, kind }
	}

	/// Canonical lowercase URL with a trailing slash.
	pub fn as_str(&self) -> &str {
		&self.canonical
	}

	/// Host (environment) component, used to key refresh tokens and accounts.
	pub fn environment(&self) -> &str {
		&self.host
	}

	/// Tenant segment.
	pub fn tenant(&self) -> &str {
		&self.tenant
	}

	/// B2C policy, if any.
	pub fn policy(&self) -> Option<&str> {
		self.policy.as_deref()
	}

	/// Authority flavor.
	pub fn kind(&self) -> AuthorityType {
		self.kind
	}

	/// Returns `true` for `common`, `organizations`, and `consumers`.
	pub fn is_tenantless(&self) -> bool {
		matches!(self.kind, AuthorityType::Aad)
			&& TenantId::new(&self.tenant).is_ok_and(|tenant| tenant.is_tenantless())
	}

	/// Pins a tenantless authority to the tenant a response was issued in.
	///
	/// ADFS, B2C, and already-pinned authorities are returned unchanged.
	pub fn with_tenant(&self, tenant: &str) -> Self {
		if !self.is_tenantless() || tenant.is_empty() {
			return self.clone();
		}

		Self::from_parts(self.host.clone(), tenant.to_owned(), None, self.kind)
	}
}
impl Debug for Authority {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("Authority").field(&self.canonical).finish()
	}
}
impl Display for Authority {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.canonical)
	}
}
impl FromStr for Authority {
	type Err = AuthorityError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn aad_authorities_are_canonicalized() {
		let authority = Authority::parse("https://Login.Example.com/Contoso.onmicrosoft.com")
			.expect("AAD authority should parse.");

		assert_eq!(authority.as_str(), "https://login.example.com/contoso.onmicrosoft.com/");
		assert_eq!(authority.kind(), AuthorityType::Aad);
		assert_eq!(authority.environment(), "login.example.com");
		assert!(!authority.is_tenantless());
	}

	#[test]
	fn adfs_and_b2c_are_detected() {
		let adfs = Authority::parse("https://fs.contoso.com/adfs/").expect("ADFS should parse.");
		let b2c = Authority::parse("https://b2c.example.com/tfp/tenant/B2C_1_signin/")
			.expect("B2C should parse.");

		assert_eq!(adfs.kind(), AuthorityType::Adfs);
		assert_eq!(b2c.kind(), AuthorityType::B2c);
		assert_eq!(b2c.policy(), Some("B2C_1_signin"));
		assert!(matches!(
			Authority::parse("https://b2c.example.com/tfp/tenant"),
			Err(AuthorityError::MissingPolicy { .. })
		));
	}

	#[test]
	fn invalid_authorities_are_rejected() {
		assert!(matches!(
			Authority::parse("http://login.example.com/common"),
			Err(AuthorityError::InsecureAuthority { .. })
		));
		assert!(matches!(
			Authority::parse("https://login.example.com/"),
			Err(AuthorityError::MissingTenant { .. })
		));
		assert!(matches!(Authority::parse("not a url"), Err(AuthorityError::InvalidUrl { .. })));
	}

	#[test]
	fn tenantless_authorities_pin_to_the_response_tenant() {
		let common = Authority::parse("https://login.example.com/common").expect("Should parse.");
		let pinned = common.with_tenant("tenant-1");

		assert!(common.is_tenantless());
		assert_eq!(pinned.as_str(), "https://login.example.com/tenant-1/");
		assert_eq!(pinned.with_tenant("tenant-2"), pinned);
	}
}
