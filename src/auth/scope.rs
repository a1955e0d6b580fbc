//! Scope sets used as the access-token cache target.

// std
use std::collections::BTreeSet;
// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError};
// self
use crate::_prelude::*;

/// OpenID Connect scopes the token endpoint adds for user flows.
pub const OIDC_SCOPES: [&str; 3] = ["offline_access", "openid", "profile"];

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
}

/// Sorted, deduplicated set of OAuth scopes.
///
/// The cache matches targets by exact set equality; a request for `a b` never reuses a token
/// issued for `a` alone. A v1 `resource` is represented as a single-entry set.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeSet(Arc<[String]>);
impl ScopeSet {
	/// Creates a normalized scope set from any iterator.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut set = BTreeSet::new();

		for scope in scopes {
			set.insert(validate(scope.into())?);
		}

		Ok(Self::from_sorted(set))
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns true if the set contains `scope`.
	pub fn contains(&self, scope: &str) -> bool {
		self.0.binary_search_by(|candidate| candidate.as_str().cmp(scope)).is_ok()
	}

	/// Iterator over the scopes in ascending order.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}

	/// Space-delimited wire form.
	pub fn normalized(&self) -> String {
		self.0.join(" ")
	}

	/// Union of two scope sets.
	pub fn union(&self, other: &ScopeSet) -> ScopeSet {
		Self::from_sorted(self.iter().chain(other.iter()).map(str::to_owned).collect())
	}

	/// Set sent to the token endpoint for user flows.
	pub fn with_oidc_scopes(&self) -> ScopeSet {
		Self::from_sorted(self.iter().chain(OIDC_SCOPES).map(str::to_owned).collect())
	}

	/// Cache target for a request; the OIDC scopes never participate in key matching.
	pub fn without_oidc_scopes(&self) -> ScopeSet {
		Self::from_sorted(
			self.iter().filter(|scope| !OIDC_SCOPES.contains(scope)).map(str::to_owned).collect(),
		)
	}

	fn from_sorted(set: BTreeSet<String>) -> Self {
		Self(set.into_iter().collect())
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_set().entries(self.iter()).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if !s.is_empty() && s.trim().is_empty() {
			return Err(ScopeValidationError::Empty);
		}

		Self::new(s.split_whitespace())
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.collect_str(self)
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = <String>::deserialize(deserializer)?;

		raw.parse().map_err(DeError::custom)
	}
}

fn validate(scope: String) -> Result<String, ScopeValidationError> {
	if scope.is_empty() {
		return Err(ScopeValidationError::Empty);
	}
	if scope.chars().any(char::is_whitespace) {
		return Err(ScopeValidationError::ContainsWhitespace { scope });
	}

	Ok(scope)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn duplicates_collapse_and_order_is_ignored() {
		let lhs = ScopeSet::new(["user.read", "mail.read", "mail.read"])
			.expect("Left-hand scope set should be valid.");
		let rhs =
			ScopeSet::new(["mail.read", "user.read"]).expect("Right-hand scope set should be valid.");

		assert_eq!(lhs, rhs);
		assert_eq!(lhs.len(), 2);
		assert_eq!(lhs.normalized(), "mail.read user.read");
		assert_eq!(format!("{lhs:?}"), "{\"mail.read\", \"user.read\"}");
	}

	#[test]
	fn blank_entries_are_rejected() {
		let err = ScopeSet::new([" user.read "]).expect_err("Padded scopes must be rejected.");

		assert!(matches!(err, ScopeValidationError::ContainsWhitespace { .. }));
		assert!(ScopeSet::from_str("").is_ok_and(|set| set.is_empty()));
		assert_eq!(ScopeSet::from_str("   "), Err(ScopeValidationError::Empty));
		assert_eq!(ScopeSet::new([""]), Err(ScopeValidationError::Empty));
	}

	#[test]
	fn oidc_scopes_are_added_for_requests_and_stripped_for_keys() {
		let requested = ScopeSet::from_str("user.read openid")
			.expect("Scope string should parse successfully.");
		let sent = requested.with_oidc_scopes();

		assert_eq!(sent.normalized(), "offline_access openid profile user.read");
		assert!(sent.contains("offline_access"));
		assert_eq!(sent.without_oidc_scopes().normalized(), "user.read");
		assert_eq!(
			requested.without_oidc_scopes(),
			ScopeSet::new(["user.read"]).expect("Scope set should build.")
		);
	}

	#[test]
	fn different_sets_never_match() {
		let narrow = ScopeSet::new(["user.read"]).expect("Narrow scope set should build.");
		let wide =
			ScopeSet::new(["user.read", "mail.read"]).expect("Wide scope set should build.");

		assert_ne!(narrow, wide);
		assert_eq!(narrow.union(&wide), wide);
	}

	#[test]
	fn serde_uses_the_wire_form() {
		let scope = ScopeSet::new(["user.read", "mail.read"]).expect("Scope set should build.");
		let json = serde_json::to_string(&scope).expect("Scope set should serialize.");

		assert_eq!(json, "\"mail.read user.read\"");
		assert_eq!(serde_json::from_str::<ScopeSet>(&json).expect("Scope set should load."), scope);
	}
}
