#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
use serde_json::{Value, json};
// self
use oauth2_acquire::{
	_preludet::*,
	auth::{ScopeSet, TokenSource},
	authority::Authority,
	cache::CacheFormat,
	error::{ClientError, ConfigError, Error},
	flows::AcquireTokenParameters,
};

const CLIENT_ID: &str = "client-daemon";
const CLIENT_SECRET: &str = "s3cret";
const ID_TOKEN: &str = "eyJhbGciOiJub25lIn0.eyJvaWQiOiJvaWQtMSIsInRpZCI6InRlbmFudC0xIiwicHJlZmVycmVkX3VzZXJuYW1lIjoiYWRhQGNvbnRvc28uY29tIiwibmFtZSI6IkFkYSJ9.sig";
const CLIENT_INFO: &str = "eyJ1aWQiOiJvaWQtMSIsInV0aWQiOiJ0ZW5hbnQtMSJ9";

fn params(authority: &str) -> AcquireTokenParameters {
	AcquireTokenParameters::new(
		Authority::parse(authority).expect("Authority fixture should parse."),
		ScopeSet::new(["https://graph.example.com/.default"])
			.expect("Scope fixture should be valid."),
	)
}

fn access_token_count(bytes: &[u8]) -> usize {
	let document = serde_json::from_slice::<Value>(bytes).expect("Cache should serialize to JSON.");

	document
		.get("AccessToken")
		.and_then(Value::as_object)
		.map(|section| section.len())
		.unwrap_or_default()
}

#[tokio::test]
async fn client_credentials_reuses_one_cached_token() {
	let server = MockServer::start_async().await;
	let (client, cache) = build_reqwest_test_client(&server.base_url(), CLIENT_ID);
	let client = client.with_client_secret(CLIENT_SECRET);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.header("content-type", "application/x-www-form-urlencoded")
				.body_includes("grant_type=client_credentials")
				.body_includes("client_secret=s3cret");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"access_token": "app-token",
				"token_type": "Bearer",
				"expires_in": 3600,
			}));
		})
		.await;
	let first = client
		.acquire_token_for_client(params("https://login.example.com/tenant-1"))
		.await
		.expect("First client credentials call should succeed.");
	let second = client
		.acquire_token_for_client(params("https://login.example.com/tenant-1"))
		.await
		.expect("Second client credentials call should be served from the cache.");

	assert_eq!(first.source, TokenSource::IdentityProvider);
	assert_eq!(second.source, TokenSource::Cache);
	assert_eq!(second.access_token.expose(), "app-token");
	assert!(first.user.is_none());

	mock.assert_calls_async(1).await;

	client
		.acquire_token_for_client(params("https://login.example.com/tenant-1").force_refresh(true))
		.await
		.expect("Forced client credentials call should succeed.");

	mock.assert_calls_async(2).await;

	let bytes = cache.serialize(CacheFormat::Current).expect("Cache should serialize.");

	assert_eq!(access_token_count(&bytes), 1, "Write-back must replace the same key.");
}

#[tokio::test]
async fn confidential_flows_require_a_credential() {
	let server = MockServer::start_async().await;
	let (client, _) = build_reqwest_test_client(&server.base_url(), CLIENT_ID);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200);
		})
		.await;
	let err = client
		.acquire_token_for_client(params("https://login.example.com/tenant-1"))
		.await
		.expect_err("Missing credential must be rejected.");

	assert!(
		matches!(err, Error::Config(ConfigError::MissingClientCredential { .. })),
		"Unexpected error: {err:?}."
	);

	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn on_behalf_of_caches_per_incoming_assertion() {
	let server = MockServer::start_async().await;
	let (client, _) = build_reqwest_test_client(&server.base_url(), CLIENT_ID);
	let client = client.with_client_secret(CLIENT_SECRET);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.body_includes("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer")
				.body_includes("requested_token_use=on_behalf_of");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"access_token": "downstream-token",
				"expires_in": 3600,
				"refresh_token": "obo-rt",
				"id_token": ID_TOKEN,
				"client_info": CLIENT_INFO,
			}));
		})
		.await;
	let authority = "https://login.example.com/tenant-1";

	client
		.acquire_token_on_behalf_of(params(authority), "header.caller-a.sig")
		.await
		.expect("First exchange should succeed.");

	let repeated = client
		.acquire_token_on_behalf_of(params(authority), "header.caller-a.sig")
		.await
		.expect("Repeated exchange should be served from the cache.");

	assert_eq!(repeated.source, TokenSource::Cache);

	mock.assert_calls_async(1).await;

	let other = client
		.acquire_token_on_behalf_of(params(authority), "header.caller-b.sig")
		.await
		.expect("Exchange for another assertion should succeed.");

	assert_eq!(other.source, TokenSource::IdentityProvider);

	mock.assert_calls_async(2).await;
}

#[tokio::test]
async fn on_behalf_of_rejects_adfs_authorities() {
	let server = MockServer::start_async().await;
	let (client, _) = build_reqwest_test_client(&server.base_url(), CLIENT_ID);
	let client = client.with_client_secret(CLIENT_SECRET);
	let err = client
		.acquire_token_on_behalf_of(params("https://adfs.contoso.com/adfs"), "header.caller.sig")
		.await
		.expect_err("ADFS authority must be rejected.");

	assert!(
		matches!(err, Error::Client(ClientError::InvalidAuthorityType { .. })),
		"Unexpected error: {err:?}."
	);
}

#[tokio::test]
async fn caller_refresh_token_seeds_the_cache() {
	let server = MockServer::start_async().await;
	let (client, _) = build_reqwest_test_client(&server.base_url(), CLIENT_ID);
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.body_includes("grant_type=refresh_token")
				.body_includes("refresh_token=imported-rt");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"access_token": "imported-at",
				"expires_in": 3600,
				"id_token": ID_TOKEN,
				"client_info": CLIENT_INFO,
			}));
		})
		.await;
	let authority = "https://login.example.com/tenant-1";
	let imported = client
		.acquire_token_by_refresh_token(params(authority), "imported-rt")
		.await
		.expect("Refresh token redemption should succeed.");

	assert_eq!(imported.source, TokenSource::IdentityProvider);

	let account = client
		.accounts()
		.await
		.expect("Accounts should be listed.")
		.into_iter()
		.next()
		.expect("Redeemed identity should be cached.");
	let silent = client
		.acquire_token_silent(params(authority).with_account(account))
		.await
		.expect("Silent acquisition should hit the seeded cache.");

	assert_eq!(silent.access_token.expose(), "imported-at");
	assert_eq!(silent.source, TokenSource::Cache);

	mock.assert_calls_async(1).await;

	let err = client
		.acquire_token_by_refresh_token(params(authority), "")
		.await
		.expect_err("Empty refresh token must be rejected.");

	assert!(
		matches!(err, Error::Client(ClientError::MissingParameter { name: "refresh_token" })),
		"Unexpected error: {err:?}."
	);
}
