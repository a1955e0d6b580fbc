//! Persisted cache formats.
//!
//! - [`CacheFormat::Legacy`]: JSON array of `{key, value}` entries, one per access token, with
//!   the subject's refresh token and id token folded into each value.
//! - [`CacheFormat::Current`]: JSON object with `AccessToken`, `RefreshToken`, `IdToken`, and
//!   `Account` maps using snake_case credential fields. Top-level sections this crate does not
//!   know are kept and written back unchanged.

// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError};
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	auth::{
		AuthenticationResult, ClientId, HomeAccountId, ResultWrapper, ScopeSet, Subject,
		SubjectType, TokenSecret, TokenSource, UserInfo,
	},
	authority::Authority,
	cache::{
		CacheError, CacheQueryData, CacheState,
		record::{AccessTokenRecord, AccountRecord, IdTokenRecord, RefreshTokenRecord},
	},
};

const ACCESS_TOKEN: &str = "AccessToken";
const REFRESH_TOKEN: &str = "RefreshToken";
const ID_TOKEN: &str = "IdToken";
const ACCOUNT: &str = "Account";

/// Wire format of a serialized cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheFormat {
	/// Flat `{key, value}` entry list.
	Legacy,
	/// Normalized credential maps.
	Current,
}

/// How loaded contents combine with the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeserializeMode {
	/// Loaded records overwrite same-key records; everything else is kept.
	Merge,
	/// The cache is cleared first.
	Replace,
}

pub(crate) fn serialize(state: &CacheState, format: CacheFormat) -> Result<Vec<u8>, CacheError> {
	let encoded = match format {
		CacheFormat::Legacy => serde_json::to_vec(&legacy_entries(state)),
		CacheFormat::Current => serde_json::to_vec(&current_document(state)?),
	};

	encoded.map_err(|e| CacheError::Serialization { message: e.to_string() })
}

pub(crate) fn deserialize(bytes: &[u8], format: CacheFormat) -> Result<CacheState, CacheError> {
	if bytes.iter().all(u8::is_ascii_whitespace) {
		return Ok(CacheState::default());
	}

	match format {
		CacheFormat::Legacy => load_legacy(parse(bytes)?),
		CacheFormat::Current => load_current(parse(bytes)?),
	}
}

pub(crate) fn merge(state: &mut CacheState, loaded: CacheState) {
	state.access_tokens.extend(loaded.access_tokens);
	state.refresh_tokens.extend(loaded.refresh_tokens);
	state.id_tokens.extend(loaded.id_tokens);
	state.accounts.extend(loaded.accounts);
	state.unknown_sections.extend(loaded.unknown_sections);
}

fn parse<T>(bytes: &[u8]) -> Result<T, CacheError>
where
	T: for<'de> Deserialize<'de>,
{
	let mut deserializer = serde_json::Deserializer::from_slice(bytes);

	serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|e| invalid(format!("{} at {}", e.inner(), e.path())))
}

fn invalid(message: impl Display) -> CacheError {
	CacheError::Serialization { message: message.to_string() }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SubjectFields {
	#[serde(default)]
	subject_type: SubjectType,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	unique_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	displayable_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	user_assertion_hash: Option<String>,
}
impl From<&Subject> for SubjectFields {
	fn from(subject: &Subject) -> Self {
		Self {
			subject_type: subject.kind,
			unique_id: subject.unique_id.clone(),
			displayable_id: subject.displayable_id.clone(),
			user_assertion_hash: subject.assertion_hash.clone(),
		}
	}
}
impl From<SubjectFields> for Subject {
	fn from(fields: SubjectFields) -> Self {
		Self {
			kind: fields.subject_type,
			unique_id: fields.unique_id,
			displayable_id: fields.displayable_id,
			assertion_hash: fields.user_assertion_hash,
		}
	}
}

#[derive(Serialize, Deserialize)]
struct AccessTokenEntity {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	home_account_id: Option<String>,
	environment: String,
	credential_type: String,
	client_id: ClientId,
	secret: TokenSecret,
	realm: String,
	target: String,
	#[serde(with = "unix_string")]
	cached_at: OffsetDateTime,
	#[serde(with = "unix_string")]
	expires_on: OffsetDateTime,
	#[serde(with = "unix_string")]
	extended_expires_on: OffsetDateTime,
	authority: String,
	#[serde(default = "bearer")]
	token_type: String,
	#[serde(flatten)]
	subject: SubjectFields,
}

#[derive(Serialize, Deserialize)]
struct RefreshTokenEntity {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	home_account_id: Option<String>,
	environment: String,
	credential_type: String,
	client_id: ClientId,
	secret: TokenSecret,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	family_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	client_info: Option<String>,
	#[serde(default)]
	authority: String,
	#[serde(flatten)]
	subject: SubjectFields,
}

#[derive(Serialize, Deserialize)]
struct IdTokenEntity {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	home_account_id: Option<String>,
	environment: String,
	credential_type: String,
	client_id: ClientId,
	secret: String,
	realm: String,
	authority: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	tenant_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	user: Option<UserInfo>,
	#[serde(flatten)]
	subject: SubjectFields,
}

#[derive(Serialize, Deserialize)]
struct AccountEntity {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	home_account_id: Option<String>,
	environment: String,
	realm: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	local_account_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	username: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	given_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	family_name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	identity_provider: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	client_info: Option<String>,
	#[serde(flatten)]
	subject: SubjectFields,
}

fn bearer() -> String {
	"Bearer".into()
}

fn home_account(raw: Option<String>) -> Option<HomeAccountId> {
	raw.and_then(|value| HomeAccountId::new(value).ok())
}

fn current_document(state: &CacheState) -> Result<Map<String, Value>, CacheError> {
	let mut document = state.unknown_sections.clone();
	let access_tokens = state
		.access_tokens
		.iter()
		.map(|(key, r)| {
			let entity = AccessTokenEntity {
				home_account_id: r.home_account_id.as_ref().map(ToString::to_string),
				environment: r.environment.clone(),
				credential_type: ACCESS_TOKEN.into(),
				client_id: r.client_id.clone(),
				secret: r.secret.clone(),
				realm: r.realm.clone(),
				target: r.scope.normalized(),
				cached_at: r.cached_at,
				expires_on: r.expires_on,
				extended_expires_on: r.extended_expires_on,
				authority: r.authority.clone(),
				token_type: r.token_type.clone(),
				subject: (&r.subject).into(),
			};

			(key.clone(), entity)
		})
		.collect::<BTreeMap<_, _>>();
	let refresh_tokens = state
		.refresh_tokens
		.iter()
		.map(|(key, r)| {
			let entity = RefreshTokenEntity {
				home_account_id: r.home_account_id.as_ref().map(ToString::to_string),
				environment: r.environment.clone(),
				credential_type: REFRESH_TOKEN.into(),
				client_id: r.client_id.clone(),
				secret: r.secret.clone(),
				family_id: r.family_id.clone(),
				client_info: r.client_info.clone(),
				authority: r.authority.clone(),
				subject: (&r.subject).into(),
			};

			(key.clone(), entity)
		})
		.collect::<BTreeMap<_, _>>();
	let id_tokens = state
		.id_tokens
		.iter()
		.map(|(key, r)| {
			let entity = IdTokenEntity {
				home_account_id: r.home_account_id.as_ref().map(ToString::to_string),
				environment: r.environment.clone(),
				credential_type: ID_TOKEN.into(),
				client_id: r.client_id.clone(),
				secret: r.secret.clone(),
				realm: r.realm.clone(),
				authority: r.authority.clone(),
				tenant_id: r.tenant_id.clone(),
				user: r.user.clone(),
				subject: (&r.subject).into(),
			};

			(key.clone(), entity)
		})
		.collect::<BTreeMap<_, _>>();
	let accounts = state
		.accounts
		.iter()
		.map(|(key, r)| {
			let entity = AccountEntity {
				home_account_id: r.home_account_id.as_ref().map(ToString::to_string),
				environment: r.environment.clone(),
				realm: r.realm.clone(),
				local_account_id: r.user.unique_id.clone(),
				username: r.user.displayable_id.clone(),
				given_name: r.user.given_name.clone(),
				family_name: r.user.family_name.clone(),
				identity_provider: r.user.identity_provider.clone(),
				client_info: r.client_info.clone(),
				subject: (&r.subject).into(),
			};

			(key.clone(), entity)
		})
		.collect::<BTreeMap<_, _>>();

	for (section, value) in [
		(ACCESS_TOKEN, serde_json::to_value(access_tokens)),
		(REFRESH_TOKEN, serde_json::to_value(refresh_tokens)),
		(ID_TOKEN, serde_json::to_value(id_tokens)),
		(ACCOUNT, serde_json::to_value(accounts)),
	] {
		document.insert(section.into(), value.map_err(invalid)?);
	}

	Ok(document)
}

fn take_section<T>(document: &mut Map<String, Value>, name: &str) -> Result<Vec<T>, CacheError>
where
	T: for<'de> Deserialize<'de>,
{
	let Some(section) = document.remove(name) else {
		return Ok(Vec::new());
	};
	let entries = serde_path_to_error::deserialize::<_, BTreeMap<String, T>>(section)
		.map_err(|e| invalid(format!("{name}: {} at {}", e.inner(), e.path())))?;

	Ok(entries.into_values().collect())
}

fn load_current(mut document: Map<String, Value>) -> Result<CacheState, CacheError> {
	let mut state = CacheState::default();

	for e in take_section::<AccessTokenEntity>(&mut document, ACCESS_TOKEN)? {
		let scope = ScopeSet::new(e.target.split_whitespace()).map_err(invalid)?;
		let record = AccessTokenRecord {
			authority: e.authority,
			environment: e.environment,
			realm: e.realm,
			client_id: e.client_id,
			subject: e.subject.into(),
			scope,
			secret: e.secret,
			token_type: e.token_type,
			cached_at: e.cached_at,
			expires_on: e.expires_on,
			extended_expires_on: e.extended_expires_on,
			home_account_id: home_account(e.home_account_id),
		};

		state.access_tokens.insert(record.key(), record);
	}
	for e in take_section::<RefreshTokenEntity>(&mut document, REFRESH_TOKEN)? {
		let record = RefreshTokenRecord {
			environment: e.environment,
			client_id: e.client_id,
			subject: e.subject.into(),
			secret: e.secret,
			family_id: e.family_id,
			home_account_id: home_account(e.home_account_id),
			client_info: e.client_info,
			authority: e.authority,
		};

		state.refresh_tokens.insert(record.key(), record);
	}
	for e in take_section::<IdTokenEntity>(&mut document, ID_TOKEN)? {
		let record = IdTokenRecord {
			authority: e.authority,
			environment: e.environment,
			realm: e.realm,
			client_id: e.client_id,
			subject: e.subject.into(),
			secret: e.secret,
			tenant_id: e.tenant_id,
			user: e.user,
			home_account_id: home_account(e.home_account_id),
		};

		state.id_tokens.insert(record.key(), record);
	}
	for e in take_section::<AccountEntity>(&mut document, ACCOUNT)? {
		let home_account_id = home_account(e.home_account_id);
		let record = AccountRecord {
			environment: e.environment,
			realm: e.realm,
			subject: e.subject.into(),
			user: UserInfo {
				unique_id: e.local_account_id,
				displayable_id: e.username,
				given_name: e.given_name,
				family_name: e.family_name,
				identity_provider: e.identity_provider,
				home_account_id: home_account_id.clone(),
			},
			home_account_id,
			client_info: e.client_info,
		};

		state.accounts.insert(record.key(), record);
	}

	state.unknown_sections = document;

	Ok(state)
}

#[derive(Debug, Serialize, Deserialize)]
struct LegacyEntry {
	key: LegacyKey,
	value: LegacyValue,
}

#[derive(Debug, Serialize, Deserialize)]
struct LegacyKey {
	authority: String,
	#[serde(default)]
	resource: String,
	client_id: ClientId,
	#[serde(flatten)]
	subject: SubjectFields,
}

#[derive(Serialize, Deserialize)]
struct LegacyValue {
	#[serde(default)]
	access_token: String,
	#[serde(default = "bearer")]
	token_type: String,
	#[serde(with = "time::serde::timestamp")]
	expires_on: OffsetDateTime,
	#[serde(with = "time::serde::timestamp")]
	extended_expires_on: OffsetDateTime,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	refresh_token: Option<TokenSecret>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	id_token: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	tenant_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	user_info: Option<UserInfo>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	client_info: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	family_id: Option<String>,
}
impl Debug for LegacyValue {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("LegacyValue")
			.field("expires_on", &self.expires_on)
			.field("tenant_id", &self.tenant_id)
			.finish_non_exhaustive()
	}
}

fn legacy_entries(state: &CacheState) -> Vec<LegacyEntry> {
	let refresh_for = |environment: &str, client_id: &ClientId, subject: &Subject| {
		state.refresh_tokens.values().find(|r| {
			r.environment.eq_ignore_ascii_case(environment)
				&& &r.client_id == client_id
				&& &r.subject == subject
		})
	};
	let id_token_for = |authority: &str, client_id: &ClientId, subject: &Subject| {
		state.id_tokens.values().find(|r| {
			r.authority.eq_ignore_ascii_case(authority)
				&& &r.client_id == client_id
				&& &r.subject == subject
		})
	};
	let user_for = |subject: &Subject| {
		state.accounts.values().find(|r| &r.subject == subject).map(|r| r.user.clone())
	};
	let mut entries = Vec::new();
	let mut covered = Vec::new();

	for at in state.access_tokens.values() {
		let refresh = refresh_for(&at.environment, &at.client_id, &at.subject);
		let id_token = id_token_for(&at.authority, &at.client_id, &at.subject);

		if let Some(refresh) = refresh {
			covered.push(refresh.key());
		}

		entries.push(LegacyEntry {
			key: LegacyKey {
				authority: at.authority.clone(),
				resource: at.scope.normalized(),
				client_id: at.client_id.clone(),
				subject: (&at.subject).into(),
			},
			value: LegacyValue {
				access_token: at.secret.expose().to_owned(),
				token_type: at.token_type.clone(),
				expires_on: at.expires_on,
				extended_expires_on: at.extended_expires_on,
				refresh_token: refresh.map(|r| r.secret.clone()),
				id_token: id_token.map(|r| r.secret.clone()),
				tenant_id: Some(at.realm.clone()),
				user_info: user_for(&at.subject),
				client_info: refresh.and_then(|r| r.client_info.clone()),
				family_id: refresh.and_then(|r| r.family_id.clone()),
			},
		});
	}
	// Refresh tokens whose access tokens were evicted still need an entry.
	for rt in state.refresh_tokens.values().filter(|rt| !covered.contains(&rt.key())) {
		let id_token = id_token_for(&rt.authority, &rt.client_id, &rt.subject);

		entries.push(LegacyEntry {
			key: LegacyKey {
				authority: rt.authority.clone(),
				resource: String::new(),
				client_id: rt.client_id.clone(),
				subject: (&rt.subject).into(),
			},
			value: LegacyValue {
				access_token: String::new(),
				token_type: bearer(),
				expires_on: OffsetDateTime::UNIX_EPOCH,
				extended_expires_on: OffsetDateTime::UNIX_EPOCH,
				refresh_token: Some(rt.secret.clone()),
				id_token: id_token.map(|r| r.secret.clone()),
				tenant_id: id_token.and_then(|r| r.tenant_id.clone()),
				user_info: user_for(&rt.subject),
				client_info: rt.client_info.clone(),
				family_id: rt.family_id.clone(),
			},
		});
	}

	entries
}

fn load_legacy(entries: Vec<LegacyEntry>) -> Result<CacheState, CacheError> {
	let mut state = CacheState::default();
	let now = OffsetDateTime::now_utc();

	for LegacyEntry { key, value } in entries {
		let authority = Authority::parse(&key.authority).map_err(invalid)?;
		let scope = ScopeSet::new(key.resource.split_whitespace()).map_err(invalid)?;
		let subject = Subject::from(key.subject);
		let query = CacheQueryData::new(authority, scope.clone(), key.client_id, subject);
		let result = AuthenticationResult {
			access_token: TokenSecret::new(value.access_token),
			token_type: value.token_type,
			expires_on: value.expires_on,
			extended_expires_on: value.extended_expires_on.max(value.expires_on),
			is_extended_lifetime_token: false,
			id_token: value.id_token,
			tenant_id: value.tenant_id,
			user: value.user_info,
			scope,
			authority: query.authority.as_str().to_owned(),
			correlation_id: Uuid::nil(),
			source: TokenSource::Cache,
		};
		let wrapper = ResultWrapper {
			result,
			refresh_token: value.refresh_token,
			client_info: value.client_info,
			family_id: value.family_id,
		};

		state.write(&query, &wrapper, now);
	}

	state.has_state_changed = false;

	Ok(state)
}

mod unix_string {
	// self
	use super::*;

	pub fn serialize<S>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&value.unix_timestamp().to_string())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;
		let seconds = raw.trim().parse::<i64>().map_err(DeError::custom)?;

		OffsetDateTime::from_unix_timestamp(seconds).map_err(DeError::custom)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn seeded_state() -> CacheState {
		let mut state = CacheState::default();
		let query = CacheQueryData::new(
			Authority::parse("https://login.example.com/tenant-1").expect("Should parse."),
			ScopeSet::new(["user.read"]).expect("Scope fixture should be valid."),
			ClientId::new("client-a").expect("Client fixture should be valid."),
			Subject::user(None, None),
		);
		let result = AuthenticationResult::builder(query.target(), query.authority.as_str())
			.access_token("at-1")
			.expires_in(Duration::hours(1))
			.tenant_id("tenant-1")
			.user(UserInfo {
				unique_id: Some("oid-1".into()),
				displayable_id: Some("ada@contoso.com".into()),
				..Default::default()
			})
			.build()
			.expect("Result fixture should build.");

		let wrapper = ResultWrapper::new(result).with_refresh_token("rt-1");

		state.write(&query, &wrapper, OffsetDateTime::now_utc());

		state
	}

	#[test]
	fn current_format_uses_credential_maps_and_keeps_unknown_sections() {
		let mut state = seeded_state();

		state.unknown_sections.insert("AppMetadata".into(), serde_json::json!({ "k": { "v": 1 } }));

		let bytes = serialize(&state, CacheFormat::Current).expect("Serialization should succeed.");
		let document: Value = serde_json::from_slice(&bytes).expect("Output should be JSON.");
		let access_token = document[ACCESS_TOKEN]
			.as_object()
			.and_then(|section| section.values().next())
			.expect("Access token section should have one entry.");

		assert_eq!(access_token["credential_type"], "AccessToken");
		assert_eq!(access_token["secret"], "at-1");
		assert_eq!(access_token["target"], "user.read");
		assert!(access_token["expires_on"].is_string());
		assert_eq!(document["AppMetadata"]["k"]["v"], 1);

		let loaded = deserialize(&bytes, CacheFormat::Current).expect("Reload should succeed.");

		assert!(loaded.access_tokens.keys().eq(state.access_tokens.keys()));
		assert!(loaded.refresh_tokens.keys().eq(state.refresh_tokens.keys()));
		assert_eq!(
			loaded.access_tokens.values().next().map(|r| r.expires_on.unix_timestamp()),
			state.access_tokens.values().next().map(|r| r.expires_on.unix_timestamp())
		);
		assert_eq!(loaded.accounts.len(), 1);
		assert!(loaded.unknown_sections.contains_key("AppMetadata"));
	}

	#[test]
	fn legacy_format_folds_refresh_tokens_into_entries() {
		let state = seeded_state();
		let bytes = serialize(&state, CacheFormat::Legacy).expect("Serialization should succeed.");
		let entries: Vec<Value> = serde_json::from_slice(&bytes).expect("Output should be JSON.");

		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0]["key"]["resource"], "user.read");
		assert_eq!(entries[0]["value"]["refresh_token"], "rt-1");

		let loaded = deserialize(&bytes, CacheFormat::Legacy).expect("Reload should succeed.");

		assert_eq!(loaded.access_tokens.len(), 1);
		assert_eq!(loaded.refresh_tokens.len(), 1);
		assert!(!loaded.has_state_changed);
	}

	#[test]
	fn malformed_documents_report_the_failing_path() {
		let err = deserialize(br#"{"AccessToken":{"k":{"environment":1}}}"#, CacheFormat::Current)
			.expect_err("Malformed entry must be rejected.");

		assert!(matches!(
			err,
			CacheError::Serialization { ref message } if message.contains("AccessToken")
		));
		assert!(deserialize(b"  ", CacheFormat::Legacy).is_ok());
	}
}
