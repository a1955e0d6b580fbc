//! OAuth 2.0 / OpenID Connect token acquisition with a cache-first request pipeline.
//!
//! Every acquisition runs through one orchestration state machine
//! (`Init → PreRun → CacheLookup → RefreshAttempt → BrokerOrNetwork → PostRun`) that consults a
//! shared [`cache::TokenCache`], refreshes stale credentials, delegates to a native broker when
//! one is invokable, and falls back to the identity provider's token endpoint. Flow variants only
//! contribute request parameters and pre/post hooks.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod authority;
pub mod broker;
pub mod cache;
pub mod context;
pub mod error;
pub mod flows;
pub mod http;
pub mod oauth;
pub mod obs;
pub mod telemetry;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::ClientId,
		authority::{AuthorityEndpoints, StaticAuthorityResolver},
		cache::TokenCache,
		flows::Client,
		http::ReqwestHttpClient,
		oauth::ReqwestTransportErrorMapper,
	};

	/// Client type alias used by reqwest-backed integration tests.
	pub type ReqwestTestClient = Client<ReqwestHttpClient, ReqwestTransportErrorMapper>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Endpoint set rooted at a mock server base URL (`{base}/token`, `{base}/authorize`,
	/// `{base}/devicecode`).
	pub fn mock_endpoints(base: &str) -> AuthorityEndpoints {
		let parse = |path: &str| {
			Url::parse(&format!("{base}{path}")).expect("Mock endpoint URL should parse.")
		};

		AuthorityEndpoints {
			token: parse("/token"),
			authorization: parse("/authorize"),
			device_code: parse("/devicecode"),
		}
	}

	/// Constructs a [`Client`] backed by a fresh in-memory cache, a static resolver that routes
	/// every authority to `base`, and the reqwest transport used across integration tests.
	pub fn build_reqwest_test_client(
		base: &str,
		client_id: &str,
	) -> (ReqwestTestClient, Arc<TokenCache>) {
		let cache = Arc::new(TokenCache::default());
		let client_id = ClientId::new(client_id).expect("Test client identifier should be valid.");
		let resolver = Arc::new(StaticAuthorityResolver::new(mock_endpoints(base)));
		let client = Client::with_http_client(
			cache.clone(),
			client_id,
			test_reqwest_http_client(),
			Arc::new(ReqwestTransportErrorMapper),
		)
		.with_resolver(resolver);

		(client, cache)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;
	pub use uuid::Uuid;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
pub use uuid;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
