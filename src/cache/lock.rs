//! Cross-process cache lock: an advisory OS lock held on an open lock file.
//!
//! The operating system drops the lock together with the owning handle, including when the owner
//! crashes, so a lock file left on disk never blocks later processes. The file itself stays in
//! place between accesses; only the OS lock marks ownership.

// std
use std::{
	fs::{self, File, OpenOptions},
	io::Write,
	path::{Path, PathBuf},
	process,
	time::Duration as StdDuration,
};
// crates.io
use fs4::fs_std::FileExt;
// self
use crate::{_prelude::*, cache::CacheError, obs::flow_event};

/// Bounded retry policy for [`CacheLock::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockRetryPolicy {
	/// Attempts before giving up.
	pub attempts: u32,
	/// Delay between attempts.
	pub delay: StdDuration,
}
impl Default for LockRetryPolicy {
	fn default() -> Self {
		Self { attempts: 20, delay: StdDuration::from_millis(200) }
	}
}

/// Held cross-process lock; released when dropped.
#[derive(Debug)]
pub struct CacheLock {
	path: PathBuf,
	_file: File,
}
impl CacheLock {
	/// Lock file path used for `cache_path`.
	pub fn lock_path(cache_path: &Path) -> PathBuf {
		let mut raw = cache_path.as_os_str().to_owned();

		raw.push(".lockfile");

		PathBuf::from(raw)
	}

	/// Acquires the lock for `cache_path`, retrying per `policy`.
	///
	/// Waits between attempts with a timer, so other tasks keep running on the same thread.
	pub async fn acquire(cache_path: &Path, policy: LockRetryPolicy) -> Result<Self, CacheError> {
		let path = Self::lock_path(cache_path);
		let attempts = policy.attempts.max(1);
		let file = open_lock_file(&path)?;

		for attempt in 1..=attempts {
			let locked = file.try_lock_exclusive().map_err(|e| CacheError::Backend {
				message: format!("Failed to lock {}: {e}", path.display()),
			})?;

			if locked {
				record_owner(&file, &path);

				return Ok(Self { path, _file: file });
			}
			if attempt < attempts {
				flow_event!(debug, "cache lock {} busy, attempt {attempt}/{attempts}", path.display());

				tokio::time::sleep(policy.delay).await;
			}
		}

		Err(CacheError::LockTimeout { path, attempts })
	}

	/// Lock file path.
	pub fn path(&self) -> &Path {
		&self.path
	}
}

fn open_lock_file(path: &Path) -> Result<File, CacheError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| CacheError::Backend {
			message: format!("Failed to create lock directory {}: {e}", parent.display()),
		})?;
	}

	OpenOptions::new().read(true).write(true).create(true).truncate(false).open(path).map_err(|e| {
		CacheError::Backend { message: format!("Failed to open {}: {e}", path.display()) }
	})
}

// The owner PID is informational; ownership is the OS lock alone.
fn record_owner(mut file: &File, path: &Path) {
	if let Err(e) = file.set_len(0).and_then(|()| write!(file, "{}", process::id())) {
		flow_event!(debug, "failed to record lock owner in {}: {e}", path.display());
	}
}
