//! File-backed cache persistence shared between processes.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	cache::{
		CacheError, CacheFormat, CacheLock, CacheNotificationArgs, CacheObserver, DeserializeMode,
		LockRetryPolicy, ObserverFuture, TokenCache,
	},
};

/// Observer that mirrors a [`TokenCache`] into a JSON file.
///
/// `before_access` waits for the cross-process lock and reloads the file, replacing the in-memory
/// contents; `after_access` writes the file atomically when the cache changed and then releases
/// the lock.
#[derive(Debug)]
pub struct FileCachePersistence {
	path: PathBuf,
	format: CacheFormat,
	retry: LockRetryPolicy,
	held: Mutex<Option<CacheLock>>,
}
impl FileCachePersistence {
	/// Persists to `path` in the [`CacheFormat::Current`] format with the default lock policy.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			format: CacheFormat::Current,
			retry: LockRetryPolicy::default(),
			held: Mutex::new(None),
		}
	}

	/// Overrides the file format.
	pub fn with_format(mut self, format: CacheFormat) -> Self {
		self.format = format;

		self
	}

	/// Overrides the lock retry policy.
	pub fn with_retry_policy(mut self, retry: LockRetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Cache file path.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load(&self, cache: &TokenCache) -> Result<(), CacheError> {
		let bytes = match fs::read(&self.path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
			Err(e) =>
				return Err(CacheError::Backend {
					message: format!("Failed to read {}: {e}", self.path.display()),
				}),
		};

		cache.deserialize(&bytes, self.format, DeserializeMode::Replace)
	}

	fn persist(&self, cache: &TokenCache) -> Result<(), CacheError> {
		if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| CacheError::Backend {
				message: format!("Failed to create cache directory {}: {e}", parent.display()),
			})?;
		}

		let serialized = cache.serialize(self.format)?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| CacheError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| CacheError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| CacheError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| CacheError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl CacheObserver for FileCachePersistence {
	fn before_access<'a>(
		&'a self,
		cache: &'a TokenCache,
		_args: &'a CacheNotificationArgs,
	) -> ObserverFuture<'a> {
		Box::pin(async move {
			let lock = CacheLock::acquire(&self.path, self.retry).await?;

			self.load(cache)?;
			*self.held.lock() = Some(lock);

			Ok(())
		})
	}

	fn after_access(
		&self,
		cache: &TokenCache,
		args: &CacheNotificationArgs,
	) -> Result<(), CacheError> {
		let lock = self.held.lock().take();
		let result = if args.has_state_changed { self.persist(cache) } else { Ok(()) };

		drop(lock);

		result
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{
		env, process,
		sync::atomic::{AtomicUsize, Ordering},
		time::Duration as StdDuration,
	};
	// self
	use super::*;
	use crate::{
		auth::{AuthenticationResult, ClientId, ResultWrapper, ScopeSet, Subject},
		authority::Authority,
		cache::CacheQueryData,
	};

	fn temp_path() -> PathBuf {
		env::temp_dir().join(format!(
			"oauth2_acquire_file_cache_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		))
	}

	#[tokio::test]
	async fn writes_are_visible_to_a_second_cache_instance() {
		let path = temp_path();
		let query = CacheQueryData::new(
			Authority::parse("https://login.example.com/tenant-1").expect("Should parse."),
			ScopeSet::new(["user.read"]).expect("Scope fixture should be valid."),
			ClientId::new("client-a").expect("Client fixture should be valid."),
			Subject::client(),
		);
		let result = AuthenticationResult::builder(query.target(), query.authority.as_str())
			.access_token("at-file")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Result fixture should build.");
		let writer = TokenCache::default();

		writer.add_observer(Arc::new(FileCachePersistence::new(&path)));

		{
			let mut access = writer
				.begin_access(CacheNotificationArgs::for_query(&query))
				.await
				.expect("Access should open.");

			access.store(&query, &ResultWrapper::new(result)).expect("Store should succeed.");
			access.finish().expect("Flush should succeed.");
		}

		CacheLock::acquire(&path, LockRetryPolicy { attempts: 1, ..Default::default() })
			.await
			.expect("Lock must be released after access.");

		let reader = TokenCache::default();

		reader.add_observer(Arc::new(FileCachePersistence::new(&path)));

		let access = reader
			.begin_access(CacheNotificationArgs::for_query(&query))
			.await
			.expect("Access should open.");
		let lookup = access.find(&query, OffsetDateTime::now_utc()).expect("Lookup should succeed.");

		assert!(matches!(lookup, crate::cache::CacheLookup::Hit(_)));

		drop(access);
		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary cache file {}: {e}", path.display())
		});

		let _ = fs::remove_file(CacheLock::lock_path(&path));
	}

	#[tokio::test(flavor = "current_thread")]
	async fn lock_contention_does_not_stall_the_runtime() {
		let path = temp_path();
		let held = CacheLock::acquire(&path, LockRetryPolicy::default())
			.await
			.expect("Test should acquire the lock first.");
		let cache = TokenCache::default();
		let policy = LockRetryPolicy { attempts: 10, delay: StdDuration::from_millis(20) };

		cache.add_observer(Arc::new(FileCachePersistence::new(&path).with_retry_policy(policy)));

		let ticks = Arc::new(AtomicUsize::new(0));
		let ticker = tokio::spawn({
			let ticks = ticks.clone();

			async move {
				loop {
					tokio::time::sleep(StdDuration::from_millis(5)).await;
					ticks.fetch_add(1, Ordering::SeqCst);
				}
			}
		});
		let err = cache
			.begin_access(CacheNotificationArgs::default())
			.await
			.map(|_| ())
			.expect_err("Held lock must time out.");

		ticker.abort();

		assert!(matches!(err, CacheError::LockTimeout { attempts: 10, .. }));
		assert!(
			ticks.load(Ordering::SeqCst) >= 5,
			"Other tasks must keep running while the lock is contended."
		);

		drop(held);

		let _ = fs::remove_file(CacheLock::lock_path(&path));
	}
}
