//! Demonstrates the canonical public-client pattern: try the cache silently, fall back to the
//! device code flow when no usable token exists, then serve the next request from the cache.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde_json::json;
use url::Url;
// self
use oauth2_acquire::{
	auth::{ClientId, ScopeSet},
	authority::{Authority, AuthorityEndpoints, StaticAuthorityResolver},
	cache::TokenCache,
	error::Error,
	flows::{AcquireTokenParameters, Client},
	http::ReqwestHttpClient,
	oauth::ReqwestTransportErrorMapper,
	reqwest,
};

const ID_TOKEN: &str = "eyJhbGciOiJub25lIn0.eyJvaWQiOiJvaWQtMSIsInRpZCI6InRlbmFudC0xIiwicHJlZmVycmVkX3VzZXJuYW1lIjoiYWRhQGNvbnRvc28uY29tIiwibmFtZSI6IkFkYSJ9.sig";
const CLIENT_INFO: &str = "eyJ1aWQiOiJvaWQtMSIsInV0aWQiOiJ0ZW5hbnQtMSJ9";

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let _device_code = server
		.mock_async(|when, then| {
			when.method(POST).path("/devicecode");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"user_code": "WDJB-MJHT",
				"device_code": "demo-device-code",
				"verification_uri": "https://login.example.com/device",
				"expires_in": 900,
				"interval": 1,
			}));
		})
		.await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token").body_includes("device_code=demo-device-code");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"access_token": "demo-access",
				"expires_in": 3600,
				"refresh_token": "demo-refresh",
				"id_token": ID_TOKEN,
				"client_info": CLIENT_INFO,
			}));
		})
		.await;
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
	let client = <Client<ReqwestHttpClient, ReqwestTransportErrorMapper>>::with_http_client(
		Arc::new(TokenCache::default()),
		ClientId::new("demo-public-client")?,
		http_client,
		Arc::new(ReqwestTransportErrorMapper),
	)
	.with_resolver(Arc::new(StaticAuthorityResolver::new(endpoints)));
	let params = AcquireTokenParameters::new(
		Authority::parse("https://login.example.com/tenant-1")?,
		ScopeSet::new(["user.read"])?,
	);
	let account = client.accounts().await?.into_iter().next();
	let silent = match account {
		Some(account) => client.acquire_token_silent(params.clone().with_account(account)).await,
		None => Err(Error::silent_failed(None)),
	};
	let result = match silent {
		Ok(result) => result,
		Err(Error::SilentFailed { .. }) =>
			client
				.acquire_token_with_device_code(params.clone(), |device_code| async move {
					println!("{}", device_code.message);

					Ok::<(), Error>(())
				})
				.await?,
		Err(e) => return Err(e.into()),
	};

	println!("Signed in; token source: {:?}.", result.source);

	let account = client.accounts().await?.into_iter().next();

	if let Some(account) = account {
		let cached = client.acquire_token_silent(params.with_account(account)).await?;

		println!("Second request served from: {:?}.", cached.source);
	}

	token_mock.assert_async().await;

	Ok(())
}
