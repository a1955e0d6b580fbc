//! Token cache store with paired access notifications.
//!
//! Every read or write goes through a [`CacheAccess`] guard: opening it fires `before_access`
//! on each registered [`CacheObserver`], and dropping it fires `after_access` on every exit
//! path. Guards are serialized by an in-process gate, so an observer that reloads external
//! storage in `before_access` is never observed half-way by another request.

pub mod file;
pub mod lock;
pub mod query;
pub mod record;
pub mod serialize;

pub use file::FileCachePersistence;
pub use lock::{CacheLock, LockRetryPolicy};
pub use query::{CacheLookup, CacheQueryData, EXPIRY_MARGIN};
pub use serialize::{CacheFormat, DeserializeMode};

// std
use std::path::PathBuf;
// crates.io
use async_lock::MutexGuard as AsyncMutexGuard;
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	auth::{Account, ClientId, ResultWrapper, ScopeSet, Subject, SubjectType, UserInfo},
	obs::{self, flow_event},
};
use record::{AccessTokenRecord, AccountRecord, IdTokenRecord, RefreshTokenRecord};

/// Cache-layer failures surfaced as [`Error::Cache`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum CacheError {
	/// A loose query matched tokens of more than one user.
	#[error("{count} cached users match the request; specify the account.")]
	MultipleTokensMatched {
		/// Number of distinct subjects matched.
		count: usize,
	},
	/// The cross-process cache lock could not be acquired.
	#[error("Could not acquire the cache lock {} after {attempts} attempts.", .path.display())]
	LockTimeout {
		/// Lock file path.
		path: PathBuf,
		/// Attempts made before giving up.
		attempts: u32,
	},
	/// Cache contents could not be (de)serialized.
	#[error("Cache serialization failed: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Persistence backend failure.
	#[error("Cache backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
	/// An observer rejected the notification.
	#[error("Cache observer failed: {message}.")]
	Observer {
		/// Human-readable error payload.
		message: String,
	},
}
impl CacheError {
	/// Stable code used in telemetry and logs.
	pub fn code(&self) -> &'static str {
		match self {
			Self::MultipleTokensMatched { .. } => "multiple_matching_tokens_detected",
			Self::LockTimeout { .. } => "cache_lock_timeout",
			Self::Serialization { .. } => "cache_serialization_error",
			Self::Backend { .. } => "cache_backend_error",
			Self::Observer { .. } => "cache_observer_error",
		}
	}
}

/// Context handed to observers around each cache access.
#[derive(Clone, Debug, Default)]
pub struct CacheNotificationArgs {
	/// Requesting application.
	pub client_id: Option<ClientId>,
	/// Requested scope, absent for account enumeration.
	pub scope: Option<ScopeSet>,
	/// Immutable id of the user the access concerns.
	pub unique_id: Option<String>,
	/// Displayable id of the user the access concerns.
	pub displayable_id: Option<String>,
	/// Whether the cache changed during the access (meaningful in `after_access`).
	pub has_state_changed: bool,
}
impl CacheNotificationArgs {
	/// Arguments describing `query`.
	pub fn for_query(query: &CacheQueryData) -> Self {
		Self {
			client_id: Some(query.client_id.clone()),
			scope: Some(query.scope.clone()),
			unique_id: query.subject.unique_id.clone(),
			displayable_id: query.subject.displayable_id.clone(),
			has_state_changed: false,
		}
	}
}

/// Future returned by [`CacheObserver::before_access`].
pub type ObserverFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CacheError>> + 'a + Send>>;

/// Persistence hook notified around cache accesses.
///
/// Callbacks run while the access gate is held and may call [`TokenCache::serialize`] /
/// [`TokenCache::deserialize`]. Only `before_access` may wait (for a cross-process lock, say);
/// the other callbacks run synchronously.
pub trait CacheObserver
where
	Self: Send + Sync,
{
	/// Fired when an access begins.
	fn before_access<'a>(
		&'a self,
		cache: &'a TokenCache,
		args: &'a CacheNotificationArgs,
	) -> ObserverFuture<'a>;

	/// Fired before a write inside an open access.
	fn before_write(
		&self,
		_cache: &TokenCache,
		_args: &CacheNotificationArgs,
	) -> Result<(), CacheError> {
		Ok(())
	}

	/// Fired when an access ends, on every exit path.
	fn after_access(
		&self,
		cache: &TokenCache,
		args: &CacheNotificationArgs,
	) -> Result<(), CacheError>;
}

#[derive(Debug, Default)]
pub(crate) struct CacheState {
	pub(crate) access_tokens: BTreeMap<String, AccessTokenRecord>,
	pub(crate) refresh_tokens: BTreeMap<String, RefreshTokenRecord>,
	pub(crate) id_tokens: BTreeMap<String, IdTokenRecord>,
	pub(crate) accounts: BTreeMap<String, AccountRecord>,
	pub(crate) unknown_sections: Map<String, Value>,
	pub(crate) has_state_changed: bool,
}
impl CacheState {
	pub(crate) fn write(
		&mut self,
		query: &CacheQueryData,
		wrapper: &ResultWrapper,
		now: OffsetDateTime,
	) {
		let result = &wrapper.result;
		let subject = Subject::for_result(&query.subject, result.user.as_ref());
		let authority = query.authority.as_str().to_owned();
		let environment = query.authority.environment().to_owned();
		let realm =
			result.tenant_id.clone().unwrap_or_else(|| query.authority.tenant().to_owned());
		let home_account_id = result.user.as_ref().and_then(|user| user.home_account_id.clone());

		if !result.access_token.is_empty() {
			let record = AccessTokenRecord {
				authority: authority.clone(),
				environment: environment.clone(),
				realm: realm.clone(),
				client_id: query.client_id.clone(),
				subject: subject.clone(),
				scope: query.target(),
				secret: result.access_token.clone(),
				token_type: result.token_type.clone(),
				cached_at: now,
				expires_on: result.expires_on,
				extended_expires_on: result.extended_expires_on,
				home_account_id: home_account_id.clone(),
			};

			self.access_tokens.insert(record.key(), record);
		}
		if let Some(secret) = wrapper.refresh_token.clone().filter(|secret| !secret.is_empty()) {
			let record = RefreshTokenRecord {
				environment: environment.clone(),
				client_id: query.client_id.clone(),
				subject: subject.clone(),
				secret,
				family_id: wrapper.family_id.clone(),
				home_account_id: home_account_id.clone(),
				client_info: wrapper.client_info.clone(),
				authority: authority.clone(),
			};

			self.refresh_tokens.insert(record.key(), record);
		}
		if let Some(raw) = result.id_token.clone() {
			let record = IdTokenRecord {
				authority,
				environment: environment.clone(),
				realm: realm.clone(),
				client_id: query.client_id.clone(),
				subject: subject.clone(),
				secret: raw,
				tenant_id: result.tenant_id.clone(),
				user: result.user.clone(),
				home_account_id: home_account_id.clone(),
			};

			self.id_tokens.insert(record.key(), record);
		}
		if let Some(user) = result.user.clone()
			&& !matches!(subject.kind, SubjectType::Client)
		{
			let record = AccountRecord {
				environment,
				realm,
				subject,
				home_account_id,
				user,
				client_info: wrapper.client_info.clone(),
			};

			self.accounts.insert(record.key(), record);
		}

		self.has_state_changed = true;
	}

	fn remove_account(&mut self, account: &Account) -> usize {
		let owned = |environment: &str, subject: &Subject| {
			environment.eq_ignore_ascii_case(&account.environment)
				&& match (&account.unique_id, &account.username) {
					(Some(unique_id), _) => subject.unique_id.as_deref() == Some(unique_id.as_str()),
					(None, Some(username)) => subject
						.displayable_id
						.as_deref()
						.is_some_and(|value| value.eq_ignore_ascii_case(username)),
					(None, None) => false,
				}
		};
		let before = self.len();

		self.access_tokens.retain(|_, record| !owned(&record.environment, &record.subject));
		self.refresh_tokens.retain(|_, record| !owned(&record.environment, &record.subject));
		self.id_tokens.retain(|_, record| !owned(&record.environment, &record.subject));
		self.accounts.retain(|_, record| !owned(&record.environment, &record.subject));

		let removed = before - self.len();

		if removed > 0 {
			self.has_state_changed = true;
		}

		removed
	}

	fn len(&self) -> usize {
		self.access_tokens.len()
			+ self.refresh_tokens.len()
			+ self.id_tokens.len()
			+ self.accounts.len()
	}

	pub(crate) fn clear(&mut self) {
		self.access_tokens.clear();
		self.refresh_tokens.clear();
		self.id_tokens.clear();
		self.accounts.clear();
		self.unknown_sections.clear();
	}
}

/// Shared token cache; pass it around as `Arc<TokenCache>`.
#[derive(Default)]
pub struct TokenCache {
	gate: AsyncMutex<()>,
	state: RwLock<CacheState>,
	observers: RwLock<Vec<Arc<dyn CacheObserver>>>,
}
impl TokenCache {
	/// Registers an observer; observers fire in registration order.
	pub fn add_observer(&self, observer: Arc<dyn CacheObserver>) {
		self.observers.write().push(observer);
	}

	/// Opens a notification bracket.
	///
	/// Fires `before_access` on every observer. When observer `i` fails, observers `0..i` receive
	/// `after_access` before the error is returned, so pairing holds on the failure path too.
	pub async fn begin_access(
		&self,
		args: CacheNotificationArgs,
	) -> Result<CacheAccess<'_>, CacheError> {
		let gate = self.gate.lock().await;
		let observers = self.observers.read().clone();

		for (index, observer) in observers.iter().enumerate() {
			if let Err(e) = observer.before_access(self, &args).await {
				let mut after = args.clone();

				after.has_state_changed = self.has_state_changed();

				for notified in &observers[..index] {
					if let Err(e) = notified.after_access(self, &after) {
						flow_event!(warn, "after_access failed while unwinding: {e}");
					}
				}

				self.set_state_changed(false);

				return Err(e);
			}
		}

		Ok(CacheAccess { cache: self, args, observers, finished: false, _gate: gate })
	}

	/// Number of records across every credential type.
	pub fn len(&self) -> usize {
		self.state.read().len()
	}

	/// Returns `true` when the cache holds no records.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Whether the contents changed since the last `after_access`.
	pub fn has_state_changed(&self) -> bool {
		self.state.read().has_state_changed
	}

	/// Overrides the change flag.
	pub fn set_state_changed(&self, changed: bool) {
		self.state.write().has_state_changed = changed;
	}

	/// Serializes the contents in `format`.
	pub fn serialize(&self, format: CacheFormat) -> Result<Vec<u8>, CacheError> {
		serialize::serialize(&self.state.read(), format)
	}

	/// Loads `bytes` in `format`, merging into or replacing the current contents.
	pub fn deserialize(
		&self,
		bytes: &[u8],
		format: CacheFormat,
		mode: DeserializeMode,
	) -> Result<(), CacheError> {
		let loaded = serialize::deserialize(bytes, format)?;
		let mut state = self.state.write();

		if matches!(mode, DeserializeMode::Replace) {
			state.clear();
		}

		serialize::merge(&mut state, loaded);

		Ok(())
	}

	fn with_state<T>(&self, f: impl FnOnce(&CacheState) -> T) -> T {
		f(&self.state.read())
	}

	fn with_state_mut<T>(&self, f: impl FnOnce(&mut CacheState) -> T) -> T {
		f(&mut self.state.write())
	}
}
impl Debug for TokenCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenCache")
			.field("records", &self.len())
			.field("observers", &self.observers.read().len())
			.finish()
	}
}

/// Open notification bracket; `after_access` fires when it is finished or dropped.
pub struct CacheAccess<'a> {
	cache: &'a TokenCache,
	args: CacheNotificationArgs,
	observers: Vec<Arc<dyn CacheObserver>>,
	finished: bool,
	_gate: AsyncMutexGuard<'a, ()>,
}
impl CacheAccess<'_> {
	/// Looks up `query` at `now`.
	pub fn find(
		&self,
		query: &CacheQueryData,
		now: OffsetDateTime,
	) -> Result<CacheLookup, CacheError> {
		let lookup = self.cache.with_state(|state| query::lookup(state, query, now))?;

		obs::record_cache_lookup(lookup.as_str());
		flow_event!(debug, "cache lookup: {}", lookup.as_str());

		Ok(lookup)
	}

	/// Writes `wrapper` back for `query`, firing `before_write` first.
	pub fn store(
		&mut self,
		query: &CacheQueryData,
		wrapper: &ResultWrapper,
	) -> Result<(), CacheError> {
		for observer in &self.observers {
			observer.before_write(self.cache, &self.args)?;
		}

		self.cache.with_state_mut(|state| state.write(query, wrapper, OffsetDateTime::now_utc()));

		Ok(())
	}

	/// Refresh token the cache holds for `query`'s subject, for SSO hints.
	///
	/// A loose subject resolves only when every matching token belongs to one user.
	pub fn find_refresh_token(&self, query: &CacheQueryData) -> Option<String> {
		self.cache.with_state(|state| {
			let mut matches = state.refresh_tokens.values().filter(|record| {
				record.client_id == query.client_id
					&& record.environment.eq_ignore_ascii_case(query.authority.environment())
					&& query.subject.selects(&record.subject)
			});
			let first = matches.next()?;

			if query.subject.is_loose()
				&& matches.any(|record| record.subject.identity() != first.subject.identity())
			{
				flow_event!(debug, "refresh tokens of several users match, skipping the hint");

				return None;
			}

			Some(first.secret.expose().to_owned())
		})
	}

	/// Accounts known to the cache.
	pub fn accounts(&self) -> Vec<Account> {
		self.cache.with_state(|state| state.accounts.values().map(|r| r.to_account()).collect())
	}

	/// Removes every record owned by `account`; returns how many were removed.
	pub fn remove_account(&mut self, account: &Account) -> Result<usize, CacheError> {
		for observer in &self.observers {
			observer.before_write(self.cache, &self.args)?;
		}

		Ok(self.cache.with_state_mut(|state| state.remove_account(account)))
	}

	/// Users with cached material, for diagnostics.
	pub fn users(&self) -> Vec<UserInfo> {
		self.cache.with_state(|state| state.accounts.values().map(|r| r.user.clone()).collect())
	}

	/// Closes the bracket and surfaces the first `after_access` failure.
	pub fn finish(mut self) -> Result<(), CacheError> {
		self.finished = true;

		self.notify_after()
	}

	fn notify_after(&mut self) -> Result<(), CacheError> {
		let mut args = self.args.clone();
		let mut first_error = None;

		args.has_state_changed = self.cache.has_state_changed();

		for observer in &self.observers {
			if let Err(e) = observer.after_access(self.cache, &args) {
				first_error.get_or_insert(e);
			}
		}

		self.cache.set_state_changed(false);

		first_error.map_or(Ok(()), Err)
	}
}
impl Drop for CacheAccess<'_> {
	fn drop(&mut self) {
		if self.finished {
			return;
		}
		if let Err(e) = self.notify_after() {
			flow_event!(warn, "after_access failed: {e}");
		}
	}
}
impl Debug for CacheAccess<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CacheAccess").field("args", &self.args).finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;
	use crate::{auth::AuthenticationResult, authority::Authority};

	#[derive(Default)]
	struct Counting {
		before: AtomicUsize,
		after: AtomicUsize,
		fail_before: bool,
		fail_write: bool,
	}
	impl CacheObserver for Counting {
		fn before_access<'a>(
			&'a self,
			_: &'a TokenCache,
			_: &'a CacheNotificationArgs,
		) -> ObserverFuture<'a> {
			self.before.fetch_add(1, Ordering::SeqCst);

			let result = if self.fail_before {
				Err(CacheError::Observer { message: "before".into() })
			} else {
				Ok(())
			};

			Box::pin(async move { result })
		}

		fn before_write(&self, _: &TokenCache, _: &CacheNotificationArgs) -> Result<(), CacheError> {
			if self.fail_write {
				return Err(CacheError::Backend { message: "disk full".into() });
			}

			Ok(())
		}

		fn after_access(&self, _: &TokenCache, _: &CacheNotificationArgs) -> Result<(), CacheError> {
			self.after.fetch_add(1, Ordering::SeqCst);

			Ok(())
		}
	}

	fn query() -> CacheQueryData {
		CacheQueryData::new(
			Authority::parse("https://login.example.com/tenant-1").expect("Should parse."),
			ScopeSet::new(["a"]).expect("Scope fixture should be valid."),
			ClientId::new("client-a").expect("Client fixture should be valid."),
			Subject::user(None, None),
		)
	}

	fn wrapper() -> ResultWrapper {
		wrapper_for("oid-1", "ada@contoso.com", "rt")
	}

	fn wrapper_for(unique_id: &str, displayable_id: &str, refresh_token: &str) -> ResultWrapper {
		let result = AuthenticationResult::builder(
			ScopeSet::new(["a"]).expect("Scope fixture should be valid."),
			"https://login.example.com/tenant-1/",
		)
		.access_token("at")
		.expires_in(Duration::hours(1))
		.user(UserInfo {
			unique_id: Some(unique_id.into()),
			displayable_id: Some(displayable_id.into()),
			..Default::default()
		})
		.build()
		.expect("Result fixture should build.");

		ResultWrapper::new(result).with_refresh_token(refresh_token)
	}

	#[tokio::test]
	async fn write_failure_still_fires_after_access() {
		let cache = TokenCache::default();
		let observer = Arc::new(Counting { fail_write: true, ..Default::default() });

		cache.add_observer(observer.clone());

		let result = async {
			let mut access = cache.begin_access(CacheNotificationArgs::for_query(&query())).await?;

			access.store(&query(), &wrapper())?;

			access.finish()
		}
		.await;

		assert!(matches!(result, Err(CacheError::Backend { .. })));
		assert_eq!(observer.before.load(Ordering::SeqCst), 1);
		assert_eq!(observer.after.load(Ordering::SeqCst), 1);
		assert!(cache.is_empty());
	}

	#[tokio::test]
	async fn failing_before_access_unwinds_earlier_observers() {
		let cache = TokenCache::default();
		let first = Arc::new(Counting::default());
		let second = Arc::new(Counting { fail_before: true, ..Default::default() });

		cache.add_observer(first.clone());
		cache.add_observer(second.clone());

		let err = cache
			.begin_access(CacheNotificationArgs::default())
			.await
			.expect_err("Failing observer must abort the access.");

		assert!(matches!(err, CacheError::Observer { .. }));
		assert_eq!(first.after.load(Ordering::SeqCst), 1);
		assert_eq!(second.after.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn store_then_remove_account() {
		let cache = TokenCache::default();
		let mut access = cache
			.begin_access(CacheNotificationArgs::for_query(&query()))
			.await
			.expect("Access should open.");

		access.store(&query(), &wrapper()).expect("Store should succeed.");

		let accounts = access.accounts();

		assert_eq!(accounts.len(), 1);
		assert_eq!(access.find_refresh_token(&query()).as_deref(), Some("rt"));
		assert_eq!(access.remove_account(&accounts[0]).expect("Removal should succeed."), 3);
		assert!(cache.has_state_changed());

		access.finish().expect("Finish should succeed.");

		assert!(!cache.has_state_changed());
		assert!(cache.is_empty());
	}

	#[tokio::test]
	async fn loose_refresh_token_lookup_skips_ambiguous_users() {
		let cache = TokenCache::default();
		let mut access = cache
			.begin_access(CacheNotificationArgs::for_query(&query()))
			.await
			.expect("Access should open.");

		access.store(&query(), &wrapper()).expect("Store should succeed.");

		assert_eq!(access.find_refresh_token(&query()).as_deref(), Some("rt"));

		access
			.store(&query(), &wrapper_for("oid-2", "grace@contoso.com", "rt-2"))
			.expect("Store should succeed.");

		let pinned = CacheQueryData {
			subject: Subject::user(Some("oid-2".into()), None),
			..query()
		};

		assert_eq!(access.find_refresh_token(&query()), None);
		assert_eq!(access.find_refresh_token(&pinned).as_deref(), Some("rt-2"));

		access.finish().expect("Finish should succeed.");
	}
}
