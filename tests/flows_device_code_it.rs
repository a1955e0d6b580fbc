#![cfg(feature = "reqwest")]

// std
use std::time::Duration as StdDuration;
// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use oauth2_acquire::{
	_preludet::*,
	auth::{ScopeSet, TokenSource},
	authority::Authority,
	error::{ClientError, Error},
	flows::{AcquireTokenParameters, DeviceCodePolicy, DeviceCodeResult},
	telemetry::LAST_HEADER,
};

const CLIENT_ID: &str = "client-device";
const ID_TOKEN: &str = "eyJhbGciOiJub25lIn0.eyJvaWQiOiJvaWQtMSIsInRpZCI6InRlbmFudC0xIiwicHJlZmVycmVkX3VzZXJuYW1lIjoiYWRhQGNvbnRvc28uY29tIiwibmFtZSI6IkFkYSJ9.sig";
const CLIENT_INFO: &str = "eyJ1aWQiOiJvaWQtMSIsInV0aWQiOiJ0ZW5hbnQtMSJ9";

fn params() -> AcquireTokenParameters {
	AcquireTokenParameters::new(
		Authority::parse("https://login.example.com/tenant-1")
			.expect("Authority fixture should parse."),
		ScopeSet::new(["user.read"]).expect("Scope fixture should be valid."),
	)
}

fn fast_client(server: &MockServer) -> ReqwestTestClient {
	let (client, _) = build_reqwest_test_client(&server.base_url(), CLIENT_ID);

	client.with_device_code_policy(DeviceCodePolicy {
		default_interval: StdDuration::from_millis(20),
		slow_down_increment: StdDuration::from_millis(10),
	})
}

async fn mock_device_authorization(server: &MockServer, expires_in: i64) -> httpmock::Mock<'_> {
	server
		.mock_async(|when, then| {
			when.method(POST).path("/devicecode").body_includes("client_id=client-device");
			then.status(200).header("content-type", "application/json").json_body(json!({
				"user_code": "WDJB-MJHT",
				"device_code": "dc-1",
				"verification_uri": "https://login.example.com/device",
				"expires_in": expires_in,
			}));
		})
		.await
}

async fn mock_poll_error<'a>(server: &'a MockServer, code: &str) -> httpmock::Mock<'a> {
	let code = code.to_owned();

	server
		.mock_async(move |when, then| {
			when.method(POST)
				.path("/token")
				.body_includes("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Adevice_code")
				.body_includes("device_code=dc-1");
			then.status(400)
				.header("content-type", "application/json")
				.json_body(json!({ "error": code.as_str() }));
		})
		.await
}

#[tokio::test]
async fn device_code_polls_until_the_user_signs_in() {
	let server = MockServer::start_async().await;
	let client = fast_client(&server);
	let authorization = mock_device_authorization(&server, 900).await;
	let mut pending = mock_poll_error(&server, "authorization_pending").await;
	let shown = Mutex::new(None::<DeviceCodeResult>);
	let acquisition = client.acquire_token_with_device_code(params(), |device_code| {
		*shown.lock() = Some(device_code);

		async { Ok::<(), Error>(()) }
	});
	let approval = async {
		tokio::time::sleep(StdDuration::from_millis(150)).await;
		pending.delete_async().await;

		server
			.mock_async(|when, then| {
				when.method(POST).path("/token").body_includes("device_code=dc-1");
				then.status(200).header("content-type", "application/json").json_body(json!({
					"access_token": "device-token",
					"expires_in": 3600,
					"refresh_token": "device-rt",
					"id_token": ID_TOKEN,
					"client_info": CLIENT_INFO,
				}));
			})
			.await
	};
	let (result, granted) = tokio::join!(acquisition, approval);
	let result = result.expect("Device code acquisition should succeed.");

	assert_eq!(result.access_token.expose(), "device-token");
	assert_eq!(result.source, TokenSource::IdentityProvider);

	let shown = shown.lock().clone().expect("Callback should receive the device code.");

	assert_eq!(shown.user_code, "WDJB-MJHT");
	assert_eq!(shown.interval, StdDuration::from_millis(20));
	assert!(shown.message.contains("WDJB-MJHT"));

	authorization.assert_calls_async(1).await;
	granted.assert_calls_async(1).await;

	let accounts = client.accounts().await.expect("Accounts should be listed.");

	assert_eq!(accounts.len(), 1, "Device code result must be written to the cache.");
}

#[tokio::test]
async fn expired_device_code_stops_polling() {
	let server = MockServer::start_async().await;
	let client = fast_client(&server);
	let _authorization = mock_device_authorization(&server, 900).await;
	let _expired = mock_poll_error(&server, "expired_token").await;
	let err = client
		.acquire_token_with_device_code(params(), |_| async { Ok::<(), Error>(()) })
		.await
		.expect_err("Expired device code must fail.");

	assert!(
		matches!(err, Error::Client(ClientError::DeviceCodeExpired)),
		"Unexpected error: {err:?}."
	);
}

#[tokio::test]
async fn declined_sign_in_surfaces_the_provider_error() {
	let server = MockServer::start_async().await;
	let client = fast_client(&server);
	let _authorization = mock_device_authorization(&server, 900).await;
	let declined = mock_poll_error(&server, "authorization_declined").await;
	let err = client
		.acquire_token_with_device_code(params(), |_| async { Ok::<(), Error>(()) })
		.await
		.expect_err("Declined sign-in must fail.");

	match err {
		Error::Service(service) => assert_eq!(service.code, "authorization_declined"),
		other => panic!("Unexpected error variant: {other:?}."),
	}

	declined.assert_calls_async(1).await;
}

#[tokio::test]
async fn deadline_ends_polling_while_pending() {
	let server = MockServer::start_async().await;
	let client = fast_client(&server);
	let _authorization = mock_device_authorization(&server, 0).await;
	let pending = mock_poll_error(&server, "authorization_pending").await;
	let err = client
		.acquire_token_with_device_code(params(), |_| async { Ok::<(), Error>(()) })
		.await
		.expect_err("Code past its deadline must fail.");

	assert!(
		matches!(err, Error::Client(ClientError::DeviceCodeExpired)),
		"Unexpected error: {err:?}."
	);

	pending.assert_calls_async(0).await;
}

#[tokio::test]
async fn cancellation_interrupts_polling() {
	let server = MockServer::start_async().await;
	let client = fast_client(&server);
	let _authorization = mock_device_authorization(&server, 900).await;
	let _pending = mock_poll_error(&server, "authorization_pending").await;
	let cancellation = tokio_util::sync::CancellationToken::new();
	let trigger = cancellation.clone();
	let err = client
		.acquire_token_with_device_code(params().with_cancellation(cancellation), |_| async move {
			trigger.cancel();

			Ok::<(), Error>(())
		})
		.await
		.expect_err("Cancelled acquisition must fail.");

	assert!(matches!(err, Error::Client(ClientError::Cancelled)), "Unexpected error: {err:?}.");
}

#[tokio::test]
async fn device_authorization_keeps_pending_failures_for_the_token_request() {
	let server = MockServer::start_async().await;
	let client = fast_client(&server);
	let correlation_id = Uuid::new_v4();
	let authorization = mock_device_authorization(&server, 900).await;
	let granted = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.body_includes("device_code=dc-1")
				.header(LAST_HEADER, format!("2|0|1007,{correlation_id}|no_tokens_found|"));
			then.status(200).header("content-type", "application/json").json_body(json!({
				"access_token": "device-token",
				"expires_in": 3600,
				"id_token": ID_TOKEN,
				"client_info": CLIENT_INFO,
			}));
		})
		.await;

	client
		.acquire_token_silent(params().with_correlation_id(correlation_id))
		.await
		.expect_err("Silent acquisition must fail on an empty cache.");

	let pending_at_callback = Mutex::new(None::<usize>);
	let result = client
		.acquire_token_with_device_code(params(), |_| {
			*pending_at_callback.lock() = Some(client.telemetry.pending_failures());

			async { Ok::<(), Error>(()) }
		})
		.await
		.expect("Device code acquisition should succeed.");

	assert_eq!(result.access_token.expose(), "device-token");
	assert_eq!(*pending_at_callback.lock(), Some(1));
	assert_eq!(client.telemetry.pending_failures(), 0);

	authorization.assert_calls_async(1).await;
	granted.assert_calls_async(1).await;
}
