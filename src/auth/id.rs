//! Validated identifiers for applications, tenants, and accounts.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

const IDENTIFIER_MAX_LEN: usize = 256;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier.
		kind: &'static str,
	},
	/// The identifier contains a character its kind does not allow.
	#[error("{kind} identifier contains {found:?}.")]
	InvalidCharacter {
		/// Kind of identifier.
		kind: &'static str,
		/// First offending character.
		found: char,
	},
	/// The identifier exceeded the allowed length.
	#[error("{kind} identifier exceeds {max} bytes.")]
	TooLong {
		/// Kind of identifier.
		kind: &'static str,
		/// Maximum permitted byte length.
		max: usize,
	},
}

macro_rules! identifier {
	($(#[$meta:meta])* $name:ident, $kind:literal, $forbidden:expr) => {
		$(#[$meta])*
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Validates and wraps `value`.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				let value = value.into();

				check($kind, &value, $forbidden)?;

				Ok(Self(value))
			}

			/// Borrowed string form.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &str {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!(stringify!($name), "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

identifier! {
	/// Application (client) identifier registered with the identity provider.
	ClientId, "Client", char::is_whitespace
}
identifier! {
	/// Directory tenant identifier or alias (`common`, `organizations`, ...).
	TenantId, "Tenant", |c: char| c.is_whitespace() || matches!(c, '/' | '?' | '#')
}
identifier! {
	/// Home account identifier, `{uid}.{utid}` when client info was returned.
	HomeAccountId, "HomeAccount", char::is_whitespace
}
impl TenantId {
	const TENANTLESS: [&str; 3] = ["common", "organizations", "consumers"];

	/// Returns `true` for aliases that do not pin a concrete tenant.
	pub fn is_tenantless(&self) -> bool {
		Self::TENANTLESS.iter().any(|alias| self.0.eq_ignore_ascii_case(alias))
	}
}
impl HomeAccountId {
	/// Builds the identifier from a client-info `uid` and `utid` pair.
	pub fn from_parts(uid: &str, utid: &str) -> Result<Self, IdentifierError> {
		Self::new(format!("{uid}.{utid}"))
	}

	/// Tenant half (`utid`) of the identifier, if present.
	pub fn tenant(&self) -> Option<&str> {
		self.0.split_once('.').map(|(_, utid)| utid)
	}
}

fn check(
	kind: &'static str,
	value: &str,
	forbidden: impl Fn(char) -> bool,
) -> Result<(), IdentifierError> {
	if value.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if value.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}
	if let Some(found) = value.chars().find(|c| forbidden(*c)) {
		return Err(IdentifierError::InvalidCharacter { kind, found });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn whitespace_and_empty_values_are_rejected() {
		assert_eq!(
			ClientId::new(" client-123"),
			Err(IdentifierError::InvalidCharacter { kind: "Client", found: ' ' })
		);
		assert_eq!(TenantId::new(""), Err(IdentifierError::Empty { kind: "Tenant" }));
		assert!(HomeAccountId::new("with space").is_err());

		let client = ClientId::new("client-123").expect("Client fixture should be valid.");

		assert_eq!(client.as_str(), "client-123");
		assert_eq!(format!("{client:?}"), "ClientId(client-123)");
	}

	#[test]
	fn tenants_cannot_smuggle_path_segments() {
		assert!(TenantId::new("contoso/oauth2").is_err());
		assert!(TenantId::new("contoso?x=1").is_err());
		assert!(ClientId::new("app/with/slashes").is_ok());
	}

	#[test]
	fn serde_enforces_validation() {
		let tenant =
			serde_json::from_str::<TenantId>("\"tenant-42\"").expect("Tenant should deserialize.");

		assert_eq!(tenant.as_str(), "tenant-42");
		assert!(serde_json::from_str::<TenantId>("\"with space\"").is_err());
	}

	#[test]
	fn length_limit_is_enforced() {
		ClientId::new("a".repeat(IDENTIFIER_MAX_LEN)).expect("Exact length should succeed.");

		assert_eq!(
			ClientId::new("a".repeat(IDENTIFIER_MAX_LEN + 1)),
			Err(IdentifierError::TooLong { kind: "Client", max: IDENTIFIER_MAX_LEN })
		);
	}

	#[test]
	fn tenantless_aliases_are_case_insensitive() {
		let common = TenantId::new("Common").expect("Alias fixture should be valid.");
		let pinned = TenantId::new("contoso.onmicrosoft.com").expect("Tenant fixture should be valid.");

		assert!(common.is_tenantless());
		assert!(!pinned.is_tenantless());
	}

	#[test]
	fn home_account_id_splits_tenant() {
		let id = HomeAccountId::from_parts("uid-1", "utid-1")
			.expect("Home account identifier should build.");

		assert_eq!(id.tenant(), Some("utid-1"));

		let map = BTreeMap::from([(id, 7_u8)]);

		assert_eq!(map.get("uid-1.utid-1"), Some(&7));
	}
}
