//! Cache subject classification (user, client, user-plus-client).

// self
use crate::{_prelude::*, auth::UserInfo};

/// Who a cached token was issued to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
	/// Token issued to a signed-in user.
	#[default]
	User,
	/// Token issued to the application itself (client credentials).
	Client,
	/// Token issued to a user through a middle-tier application (on-behalf-of).
	UserPlusClient,
}
impl SubjectType {
	/// Returns a stable label suitable for keys and logs.
	pub const fn as_str(self) -> &'static str {
		match self {
			SubjectType::User => "user",
			SubjectType::Client => "client",
			SubjectType::UserPlusClient => "user_plus_client",
		}
	}
}

/// Subject component of cache keys.
///
/// Identifiers are optional: a query with neither id set matches any subject of the same type,
/// which is how single-user callers look up "the" cached user.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
	/// Subject classification.
	pub kind: SubjectType,
	/// Immutable user id.
	pub unique_id: Option<String>,
	/// Displayable id, compared case-insensitively.
	pub displayable_id: Option<String>,
	/// Hash of the incoming assertion for on-behalf-of tokens.
	pub assertion_hash: Option<String>,
}
impl Subject {
	/// Subject for application tokens.
	pub fn client() -> Self {
		Self { kind: SubjectType::Client, ..Default::default() }
	}

	/// Subject for user tokens identified by the provided ids.
	pub fn user(unique_id: Option<String>, displayable_id: Option<String>) -> Self {
		Self { kind: SubjectType::User, unique_id, displayable_id, assertion_hash: None }
	}

	/// Builds the stored subject for a result, falling back to the query's ids when the
	/// response carried no identity.
	pub fn for_result(query: &Subject, user: Option<&UserInfo>) -> Self {
		if matches!(query.kind, SubjectType::Client) {
			return Self::client();
		}

		let unique_id = user.and_then(|u| u.unique_id.clone()).or_else(|| query.unique_id.clone());
		let displayable_id =
			user.and_then(|u| u.displayable_id.clone()).or_else(|| query.displayable_id.clone());

		Self {
			kind: query.kind,
			unique_id,
			displayable_id,
			assertion_hash: query.assertion_hash.clone(),
		}
	}

	/// Returns `true` when this query subject selects `stored`.
	///
	/// Kind and assertion hash match exactly; ids act as wildcards when unset on the query.
	pub fn selects(&self, stored: &Subject) -> bool {
		if self.kind != stored.kind || self.assertion_hash != stored.assertion_hash {
			return false;
		}
		if let Some(unique_id) = &self.unique_id
			&& stored.unique_id.as_deref() != Some(unique_id.as_str())
		{
			return false;
		}
		if let Some(displayable_id) = &self.displayable_id
			&& !stored
				.displayable_id
				.as_deref()
				.is_some_and(|value| value.eq_ignore_ascii_case(displayable_id))
		{
			return false;
		}

		true
	}

	/// Returns `true` when neither user id is set.
	pub fn is_loose(&self) -> bool {
		self.unique_id.is_none() && self.displayable_id.is_none()
	}

	/// Identity tuple used to detect ambiguous loose matches.
	pub fn identity(&self) -> (Option<&str>, Option<String>) {
		(self.unique_id.as_deref(), self.displayable_id.as_deref().map(str::to_ascii_lowercase))
	}

	/// Lowercase key fragment.
	pub fn key_fragment(&self) -> String {
		format!(
			"{}-{}-{}-{}",
			self.kind.as_str(),
			self.unique_id.as_deref().unwrap_or_default(),
			self.displayable_id.as_deref().unwrap_or_default().to_ascii_lowercase(),
			self.assertion_hash.as_deref().unwrap_or_default(),
		)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn loose_queries_select_any_subject_of_the_same_kind() {
		let stored = Subject::user(Some("oid-1".into()), Some("Ada@Contoso.com".into()));

		assert!(Subject::user(None, None).selects(&stored));
		assert!(Subject::user(None, Some("ada@contoso.com".into())).selects(&stored));
		assert!(!Subject::user(Some("oid-2".into()), None).selects(&stored));
		assert!(!Subject::client().selects(&stored));
	}

	#[test]
	fn assertion_hash_must_match_exactly() {
		let stored = Subject {
			kind: SubjectType::UserPlusClient,
			assertion_hash: Some("hash-a".into()),
			..Default::default()
		};
		let query = Subject { assertion_hash: Some("hash-b".into()), ..stored.clone() };

		assert!(stored.selects(&stored));
		assert!(!query.selects(&stored));
	}

	#[test]
	fn result_identity_overrides_query_ids() {
		let user = UserInfo { unique_id: Some("oid-9".into()), ..Default::default() };
		let query = Subject::user(None, Some("hint@contoso.com".into()));
		let subject = Subject::for_result(&query, Some(&user));

		assert_eq!(subject.unique_id.as_deref(), Some("oid-9"));
		assert_eq!(subject.displayable_id.as_deref(), Some("hint@contoso.com"));
		assert_eq!(Subject::for_result(&Subject::client(), Some(&user)), Subject::client());
	}
}
