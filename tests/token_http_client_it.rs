#![cfg(feature = "reqwest")]

// self
use oauth2_acquire::{
	_preludet::*,
	auth::{ClientId, ScopeSet},
	authority::{Authority, StaticAuthorityResolver},
	cache::TokenCache,
	error::{ConfigError, Error, Result, TransientError, TransportError},
	flows::{AcquireTokenParameters, Client},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	oauth::{
		TransportErrorMapper,
		oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse},
	},
	obs::FlowKind,
};

#[derive(Debug)]
enum FakeTransportError {
	Throttled,
}
impl Display for FakeTransportError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Throttled => write!(f, "Transport throttled."),
		}
	}
}
impl StdError for FakeTransportError {}

#[derive(Clone, Copy)]
struct FakeHttpClient {
	retry_after: Duration,
}
impl FakeHttpClient {
	fn throttled(retry_after: Duration) -> Self {
		Self { retry_after }
	}
}
impl TokenHttpClient for FakeHttpClient {
	type Handle = FakeHttpHandle;
	type TransportError = FakeTransportError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		FakeHttpHandle { slot, retry_after: self.retry_after }
	}
}

struct FakeHttpHandle {
	slot: ResponseMetadataSlot,
	retry_after: Duration,
}
impl<'a> AsyncHttpClient<'a> for FakeHttpHandle {
	type Error = HttpClientError<FakeTransportError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'a + Send + Sync>>;

	fn call(&'a self, _request: HttpRequest) -> Self::Future {
		let slot = self.slot.clone();
		let retry_after = self.retry_after;

		Box::pin(async move {
			assert!(
				slot.take().is_none(),
				"ResponseMetadataSlot must be clear before dispatching a request."
			);
			slot.store(ResponseMetadata {
				status: Some(429),
				retry_after: Some(retry_after),
				correlation_id: None,
			});

			Err(HttpClientError::Reqwest(Box::new(FakeTransportError::Throttled)))
		})
	}
}

#[derive(Clone, Default)]
struct RecordingTransportErrorMapper {
	observed: Arc<Mutex<Vec<(FlowKind, Option<ResponseMetadata>)>>>,
}
impl RecordingTransportErrorMapper {
	fn observed(&self) -> Vec<(FlowKind, Option<ResponseMetadata>)> {
		self.observed.lock().clone()
	}
}
impl TransportErrorMapper<FakeTransportError> for RecordingTransportErrorMapper {
	fn map_transport_error(
		&self,
		flow: FlowKind,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<FakeTransportError>,
	) -> Error {
		let status = meta.and_then(|value| value.status);
		let retry_after = meta.and_then(|value| value.retry_after);

		self.observed.lock().push((flow, meta.cloned()));

		match err {
			HttpClientError::Reqwest(inner) => TransientError::TokenEndpoint {
				message: format!("Fake transport error: {inner}"),
				status,
				retry_after,
			}
			.into(),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => TransientError::TokenEndpoint {
				message: format!(
					"HTTP client error occurred while calling the token endpoint: {message}"
				),
				status,
				retry_after,
			}
			.into(),
			other => TransientError::TokenEndpoint {
				message: format!(
					"Unhandled HTTP client error variant while calling the token endpoint: {other:?}"
				),
				status,
				retry_after,
			}
			.into(),
		}
	}
}

fn build_client(
	retry_after: Duration,
	mapper: Arc<RecordingTransportErrorMapper>,
) -> Client<FakeHttpClient, RecordingTransportErrorMapper> {
	let cache = Arc::new(TokenCache::default());
	let client_id = ClientId::new("throttled-client").expect("Failed to build client identifier.");
	let resolver =
		Arc::new(StaticAuthorityResolver::new(mock_endpoints("https://mock.example.com")));

	Client::with_http_client(cache, client_id, FakeHttpClient::throttled(retry_after), mapper)
		.with_resolver(resolver)
		.with_client_secret("throttled-secret")
}

fn params() -> AcquireTokenParameters {
	AcquireTokenParameters::new(
		Authority::parse("https://login.example.com/tenant-1")
			.expect("Failed to parse mock authority."),
		ScopeSet::new(["https://graph.example.com/.default"]).expect("Failed to build scope set."),
	)
}

#[tokio::test]
async fn fake_token_http_client_surfaces_metadata() {
	let mapper = Arc::new(RecordingTransportErrorMapper::default());
	let client = build_client(Duration::seconds(5), mapper);
	let err = client
		.acquire_token_for_client(params())
		.await
		.expect_err("Request should be throttled with HTTP 429.");

	match &err {
		Error::Transient(TransientError::TokenEndpoint { status, retry_after, .. }) => {
			assert_eq!(*status, Some(429));
			assert_eq!(*retry_after, Some(Duration::seconds(5)));
		},
		other => panic!("Unexpected error variant: {other:?}."),
	}

	assert!(!err.is_resiliency_eligible(), "Throttling is not a resiliency status.");
	assert_eq!(client.telemetry.pending_failures(), 1);
}

#[tokio::test]
async fn fake_mapper_captures_response_metadata() {
	let mapper = Arc::new(RecordingTransportErrorMapper::default());
	let client = build_client(Duration::seconds(30), mapper.clone());
	let _ = client
		.acquire_token_for_client(params())
		.await
		.expect_err("Request should be throttled with HTTP 429.");
	let observed = mapper.observed();

	assert_eq!(observed.len(), 1, "Mapper must record a single request.");

	let (flow, meta) = observed.first().cloned().expect("Mapper should record the request.");
	let meta = meta.expect("Response metadata should be recorded exactly once.");

	assert_eq!(flow, FlowKind::ClientCredentials);
	assert_eq!(meta.status, Some(429));
	assert_eq!(meta.retry_after, Some(Duration::seconds(30)));
}
