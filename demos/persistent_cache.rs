//! Demonstrates mirroring the token cache into a JSON file shared between processes, so a
//! second client instance starts with the tokens the first one acquired.

// std
use std::{env, fs, sync::Arc};
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde_json::json;
use url::Url;
// self
use oauth2_acquire::{
	auth::{ClientId, ScopeSet},
	authority::{Authority, AuthorityEndpoints, StaticAuthorityResolver},
	cache::{CacheLock, FileCachePersistence, TokenCache},
	flows::{AcquireTokenParameters, Client},
	http::ReqwestHttpClient,
	oauth::ReqwestTransportErrorMapper,
	reqwest,
};

type DemoClient = Client<ReqwestHttpClient, ReqwestTransportErrorMapper>;

fn build_client(server: &MockServer, cache_path: &std::path::Path) -> Result<DemoClient> {
	let endpoints = AuthorityEndpoints {
		token: Url::parse(&server.url("/token"))?,
		authorization: Url::parse(&server.url("/authorize"))?,
		device_code: Url::parse(&server.url("/devicecode"))?,
	};
	let http_client = ReqwestHttpClient::with_client(
		reqwest::Client::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()?,
	);
	let cache = Arc::new(TokenCache::default());

	cache.add_observer(Arc::new(FileCachePersistence::new(cache_path)));

	Ok(DemoClient::with_http_client(
		cache,
		ClientId::new("demo-daemon")?,
		http_client,
		Arc::new(ReqwestTransportErrorMapper),
	)
	.with_resolver(Arc::new(StaticAuthorityResolver::new(endpoints)))
	.with_client_secret("demo-secret"))
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").body_includes("grant_type=client_credentials");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"access_token": "persisted-access",
				"token_type": "Bearer",
				"expires_in": 3600,
			}));
		})
		.await;
	let cache_path = env::temp_dir().join("oauth2_acquire_demo_cache.json");
	let _ = fs::remove_file(&cache_path);
	let params = AcquireTokenParameters::new(
		Authority::parse("https://login.example.com/tenant-1")?,
		ScopeSet::new(["https://graph.example.com/.default"])?,
	);
	let first = build_client(&server, &cache_path)?.acquire_token_for_client(params.clone()).await?;

	println!("First process acquired from: {:?}.", first.source);
	println!("Cache file: {} ({} bytes).", cache_path.display(), fs::metadata(&cache_path)?.len());

	let second = build_client(&server, &cache_path)?.acquire_token_for_client(params).await?;

	println!("Second process served from: {:?}.", second.source);

	token_mock.assert_async().await;

	let _ = fs::remove_file(&cache_path);
	let _ = fs::remove_file(CacheLock::lock_path(&cache_path));

	Ok(())
}
