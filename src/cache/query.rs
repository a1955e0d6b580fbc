//! Cache query: exact access-token hits, refresh candidates, and stale fallbacks.

// std
use std::collections::BTreeSet;
// self
use crate::{
	_prelude::*,
	auth::{
		CachedIdentity, ClientId, RefreshCandidate, ResultWrapper, ScopeSet, Subject, SubjectType,
		TokenSource,
	},
	authority::Authority,
	cache::{
		CacheError, CacheState,
		record::{AccessTokenRecord, RefreshTokenRecord},
	},
};

/// Access tokens expiring within this margin are treated as expired.
pub const EXPIRY_MARGIN: Duration = Duration::minutes(5);

/// Everything a lookup or write-back needs; built per request, never persisted.
#[derive(Clone, Debug)]
pub struct CacheQueryData {
	/// Authority of the request.
	pub authority: Authority,
	/// Requested scope.
	pub scope: ScopeSet,
	/// Requesting application.
	pub client_id: ClientId,
	/// Requested subject; unset ids act as wildcards.
	pub subject: Subject,
	/// Whether an expired token may be kept for the resiliency fallback.
	pub extended_lifetime_enabled: bool,
	/// Skip unexpired access tokens.
	pub force_refresh: bool,
}
impl CacheQueryData {
	/// Creates a query for `subject` with extended lifetime disabled and no forced refresh.
	pub fn new(authority: Authority, scope: ScopeSet, client_id: ClientId, subject: Subject) -> Self {
		Self {
			authority,
			scope,
			client_id,
			subject,
			extended_lifetime_enabled: false,
			force_refresh: false,
		}
	}

	/// Target scope used for access-token keys.
	pub fn target(&self) -> ScopeSet {
		self.scope.without_oidc_scopes()
	}

	fn authority_matches(&self, authority: &str, environment: &str) -> bool {
		if self.authority.is_tenantless() {
			self.authority.environment().eq_ignore_ascii_case(environment)
		} else {
			self.authority.as_str().eq_ignore_ascii_case(authority)
		}
	}
}

/// Outcome of a cache lookup.
#[derive(Clone, Debug)]
pub enum CacheLookup {
	/// Unexpired access token for the exact key.
	Hit(ResultWrapper),
	/// No usable access token but a refresh token for the subject exists.
	RefreshNeeded {
		/// Refresh token plus identity to carry over.
		candidate: RefreshCandidate,
		/// Extended-lifetime token kept for the resiliency fallback.
		stale: Option<ResultWrapper>,
	},
	/// Nothing usable.
	Miss {
		/// Extended-lifetime token kept for the resiliency fallback.
		stale: Option<ResultWrapper>,
	},
}
impl CacheLookup {
	/// Stable label for metrics.
	pub const fn as_str(&self) -> &'static str {
		match self {
			CacheLookup::Hit(_) => "hit",
			CacheLookup::RefreshNeeded { .. } => "refresh",
			CacheLookup::Miss { .. } => "miss",
		}
	}

	/// Stale result captured by the lookup, if any.
	pub fn stale(&self) -> Option<&ResultWrapper> {
		match self {
			CacheLookup::Hit(_) => None,
			CacheLookup::RefreshNeeded { stale, .. } | CacheLookup::Miss { stale } => stale.as_ref(),
		}
	}
}

pub(crate) fn lookup(
	state: &CacheState,
	query: &CacheQueryData,
	now: OffsetDateTime,
) -> Result<CacheLookup, CacheError> {
	let target = query.target();
	let access_tokens = state
		.access_tokens
		.values()
		.filter(|record| {
			record.client_id == query.client_id
				&& record.scope == target
				&& query.authority_matches(&record.authority, &record.environment)
				&& query.subject.selects(&record.subject)
		})
		.collect::<Vec<_>>();
	let refresh_tokens = if matches!(query.subject.kind, SubjectType::Client) {
		Vec::new()
	} else {
		state
			.refresh_tokens
			.values()
			.filter(|record| {
				record.client_id == query.client_id
					&& record.environment.eq_ignore_ascii_case(query.authority.environment())
					&& query.subject.selects(&record.subject)
			})
			.collect::<Vec<_>>()
	};

	if query.subject.is_loose() {
		let identities = access_tokens
			.iter()
			.map(|record| record.subject.identity())
			.chain(refresh_tokens.iter().map(|record| record.subject.identity()))
			.collect::<BTreeSet<_>>();

		if identities.len() > 1 {
			return Err(CacheError::MultipleTokensMatched { count: identities.len() });
		}
	}

	let access_token = access_tokens.into_iter().max_by_key(|record| record.expires_on);
	let mut stale = None;

	if let Some(record) = access_token {
		let identity = identity_for(state, &record.client_id, &record.subject, &record.authority);

		if !query.force_refresh && record.expires_on > now + EXPIRY_MARGIN {
			return Ok(CacheLookup::Hit(hit(record, &identity, refresh_tokens.first().copied())));
		}
		if query.extended_lifetime_enabled
			&& now >= record.expires_on
			&& now < record.extended_expires_on
		{
			stale = Some(stale_result(record, &identity));
		}
	}

	let Some(refresh) = refresh_tokens.into_iter().next() else {
		return Ok(CacheLookup::Miss { stale });
	};
	let identity = identity_for(state, &refresh.client_id, &refresh.subject, &refresh.authority);
	let identity = CachedIdentity {
		client_info: identity.client_info.or_else(|| refresh.client_info.clone()),
		..identity
	};

	Ok(CacheLookup::RefreshNeeded {
		candidate: RefreshCandidate { refresh_token: refresh.secret.clone(), identity },
		stale,
	})
}

fn hit(
	record: &AccessTokenRecord,
	identity: &CachedIdentity,
	refresh: Option<&RefreshTokenRecord>,
) -> ResultWrapper {
	let mut wrapper = ResultWrapper::new(record.to_result(identity, TokenSource::Cache));

	wrapper.refresh_token = refresh.map(|record| record.secret.clone());
	wrapper.client_info = identity.client_info.clone();
	wrapper.family_id = refresh.and_then(|record| record.family_id.clone());

	wrapper
}

fn stale_result(record: &AccessTokenRecord, identity: &CachedIdentity) -> ResultWrapper {
	let mut wrapper = ResultWrapper::new(record.to_result(identity, TokenSource::StaleCache));

	wrapper.result.is_extended_lifetime_token = true;
	wrapper.client_info = identity.client_info.clone();

	wrapper
}

fn identity_for(
	state: &CacheState,
	client_id: &ClientId,
	subject: &Subject,
	authority: &str,
) -> CachedIdentity {
	let id_tokens = state
		.id_tokens
		.values()
		.filter(|record| &record.client_id == client_id && &record.subject == subject)
		.collect::<Vec<_>>();
	let id_token = id_tokens
		.iter()
		.find(|record| record.authority.eq_ignore_ascii_case(authority))
		.or_else(|| id_tokens.first());
	let account = state.accounts.values().find(|record| &record.subject == subject);

	CachedIdentity {
		id_token: id_token.map(|record| record.secret.clone()),
		tenant_id: id_token.and_then(|record| record.tenant_id.clone()),
		user: id_token
			.and_then(|record| record.user.clone())
			.or_else(|| account.map(|record| record.user.clone())),
		client_info: account.and_then(|record| record.client_info.clone()),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::auth::{AuthenticationResult, UserInfo};

	fn client() -> ClientId {
		ClientId::new("client-a").expect("Client fixture should be valid.")
	}

	fn authority(tenant: &str) -> Authority {
		Authority::parse(&format!("https://login.example.com/{tenant}"))
			.expect("Authority fixture should parse.")
	}

	fn scope(values: &[&str]) -> ScopeSet {
		ScopeSet::new(values.iter().copied()).expect("Scope fixture should be valid.")
	}

	fn seed(
		state: &mut CacheState,
		tenant: &str,
		oid: &str,
		values: &[&str],
		expires_in: Duration,
		now: OffsetDateTime,
	) {
		let query = CacheQueryData::new(
			authority(tenant),
			scope(values),
			client(),
			Subject::user(None, None),
		);
		let result = AuthenticationResult::builder(scope(values), authority(tenant).as_str())
			.access_token(format!("at-{oid}"))
			.issued_at(now)
			.expires_in(expires_in)
			.extended_expires_in(expires_in + Duration::hours(2))
			.tenant_id(tenant)
			.user(UserInfo {
				unique_id: Some(oid.into()),
				displayable_id: Some(format!("{oid}@contoso.com")),
				..Default::default()
			})
			.build()
			.expect("Result fixture should build.");

		state.write(&query, &ResultWrapper::new(result).with_refresh_token(format!("rt-{oid}")), now);
	}

	#[test]
	fn exact_scope_set_is_required_for_a_hit() {
		let now = OffsetDateTime::now_utc();
		let mut state = CacheState::default();

		seed(&mut state, "tenant-1", "oid-1", &["a", "b"], Duration::hours(1), now);

		let exact = CacheQueryData::new(
			authority("tenant-1"),
			scope(&["b", "a", "openid"]),
			client(),
			Subject::user(None, None),
		);
		let subset = CacheQueryData { scope: scope(&["a"]), ..exact.clone() };

		assert!(matches!(lookup(&state, &exact, now), Ok(CacheLookup::Hit(_))));
		assert!(matches!(lookup(&state, &subset, now), Ok(CacheLookup::RefreshNeeded { .. })));
	}

	#[test]
	fn expiry_margin_and_force_refresh_skip_the_access_token() {
		let now = OffsetDateTime::now_utc();
		let mut state = CacheState::default();

		seed(&mut state, "tenant-1", "oid-1", &["a"], Duration::minutes(4), now);

		let query = CacheQueryData::new(
			authority("tenant-1"),
			scope(&["a"]),
			client(),
			Subject::user(Some("oid-1".into()), None),
		);

		assert!(matches!(lookup(&state, &query, now), Ok(CacheLookup::RefreshNeeded { .. })));

		let mut state = CacheState::default();

		seed(&mut state, "tenant-1", "oid-1", &["a"], Duration::hours(1), now);

		let forced = CacheQueryData { force_refresh: true, ..query };
		let Ok(CacheLookup::RefreshNeeded { candidate, stale }) = lookup(&state, &forced, now) else {
			panic!("Forced refresh must skip the access token.");
		};

		assert_eq!(candidate.refresh_token.expose(), "rt-oid-1");
		assert!(stale.is_none(), "Extended lifetime is disabled for this query.");
	}

	#[test]
	fn tenantless_queries_match_any_realm_and_detect_ambiguity() {
		let now = OffsetDateTime::now_utc();
		let mut state = CacheState::default();

		seed(&mut state, "tenant-1", "oid-1", &["a"], Duration::hours(1), now);

		let common = CacheQueryData::new(
			authority("common"),
			scope(&["a"]),
			client(),
			Subject::user(None, None),
		);

		assert!(matches!(lookup(&state, &common, now), Ok(CacheLookup::Hit(_))));

		seed(&mut state, "tenant-1", "oid-2", &["a"], Duration::hours(1), now);

		assert!(matches!(
			lookup(&state, &common, now),
			Err(CacheError::MultipleTokensMatched { count: 2 })
		));

		let pinned = CacheQueryData {
			subject: Subject::user(None, Some("OID-2@contoso.com".into())),
			..common
		};
		let Ok(CacheLookup::Hit(wrapper)) = lookup(&state, &pinned, now) else {
			panic!("Displayable id must disambiguate.");
		};

		assert_eq!(wrapper.result.access_token.expose(), "at-oid-2");
		assert_eq!(wrapper.result.source, TokenSource::Cache);
	}

	#[test]
	fn stale_tokens_are_kept_only_with_extended_lifetime() {
		let now = OffsetDateTime::now_utc();
		let mut state = CacheState::default();

		seed(&mut state, "tenant-1", "oid-1", &["a"], Duration::hours(1), now);

		let later = now + Duration::minutes(90);
		let query = CacheQueryData {
			extended_lifetime_enabled: true,
			..CacheQueryData::new(
				authority("tenant-1"),
				scope(&["a"]),
				client(),
				Subject::user(None, None),
			)
		};
		let lookup_result = lookup(&state, &query, later).expect("Lookup should succeed.");
		let stale = lookup_result.stale().expect("Extended lifetime should keep a stale token.");

		assert!(stale.result.is_extended_lifetime_token);
		assert_eq!(stale.result.source, TokenSource::StaleCache);
		assert!(matches!(
			lookup(&state, &query, now + Duration::hours(4)),
			Ok(CacheLookup::RefreshNeeded { stale: None, .. })
		));
	}

	#[test]
	fn unexpired_tokens_are_never_captured_as_stale() {
		let now = OffsetDateTime::now_utc();
		let mut state = CacheState::default();

		seed(&mut state, "tenant-1", "oid-1", &["a"], Duration::minutes(4), now);

		let query = CacheQueryData {
			extended_lifetime_enabled: true,
			..CacheQueryData::new(
				authority("tenant-1"),
				scope(&["a"]),
				client(),
				Subject::user(Some("oid-1".into()), None),
			)
		};
		let forced = CacheQueryData { force_refresh: true, ..query.clone() };

		assert!(matches!(
			lookup(&state, &query, now),
			Ok(CacheLookup::RefreshNeeded { stale: None, .. })
		));
		assert!(matches!(
			lookup(&state, &forced, now),
			Ok(CacheLookup::RefreshNeeded { stale: None, .. })
		));
	}
}
