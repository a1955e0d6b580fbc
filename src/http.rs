//! Transport primitives for token endpoint calls.
//!
//! [`TokenHttpClient`] is the pipeline's only dependency on an HTTP stack. Each token request
//! gets a fresh [`ResponseMetadataSlot`]; the transport fills it once response headers arrive so
//! [`send_form`](crate::oauth::send_form) can classify failures, including the resiliency
//! statuses, even when the body is unusable.

// crates.io
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
#[cfg(feature = "reqwest")] use oauth2::http::HeaderMap;
#[cfg(feature = "reqwest")] use reqwest::header::RETRY_AFTER;
#[cfg(feature = "reqwest")] use time::format_description::well_known::Rfc2822;
// self
use crate::_prelude::*;
#[cfg(feature = "reqwest")] use crate::oauth::CLIENT_REQUEST_ID;

/// HTTP transport able to execute token endpoint requests while publishing response metadata.
pub trait TokenHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Concrete error emitted by the underlying transport.
	type TransportError: 'static + Send + Sync + StdError;

	/// Per-request [`AsyncHttpClient`] bound to one [`ResponseMetadataSlot`].
	///
	/// Handles own their state so the request future stays `Send` while a flow is in flight.
	type Handle: for<'c> AsyncHttpClient<
			'c,
			Error = HttpClientError<Self::TransportError>,
			Future: 'c + Send,
		>
		+ 'static
		+ Send
		+ Sync;

	/// Builds a handle that clears `slot` before dispatching and fills it once the response
	/// status is known, whether or not the request ultimately succeeds.
	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle;
}

/// Metadata from the most recent token endpoint response.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
	/// HTTP status code.
	pub status: Option<u16>,
	/// `Retry-After` hint as a relative duration.
	pub retry_after: Option<Duration>,
	/// Correlation id echoed in the `client-request-id` header.
	pub correlation_id: Option<String>,
}
impl ResponseMetadata {
	/// Metadata for a response whose headers were not captured.
	pub fn from_status(status: u16) -> Self {
		Self { status: Some(status), ..Default::default() }
	}

	#[cfg(feature = "reqwest")]
	fn from_headers(status: u16, headers: &HeaderMap, now: OffsetDateTime) -> Self {
		let header = |name: &str| {
			headers.get(name).and_then(|value| value.to_str().ok()).map(str::trim)
		};
		let retry_after = header(RETRY_AFTER.as_str()).and_then(|raw| parse_retry_after(raw, now));
		let correlation_id = header(CLIENT_REQUEST_ID)
			.filter(|value| !value.is_empty())
			.map(str::to_owned);

		Self { status: Some(status), retry_after, correlation_id }
	}
}

/// Shared slot that carries [`ResponseMetadata`] from the transport to the error mapper.
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadataSlot(Arc<Mutex<Option<ResponseMetadata>>>);
impl ResponseMetadataSlot {
	/// Records metadata for the current request.
	pub fn store(&self, meta: ResponseMetadata) {
		*self.0.lock() = Some(meta);
	}

	/// Removes and returns the recorded metadata.
	pub fn take(&self) -> Option<ResponseMetadata> {
		self.0.lock().take()
	}
}

/// Default transport built on [`ReqwestClient`].
///
/// Token endpoints answer directly; a custom [`ReqwestClient`] should not follow redirects.
#[cfg(feature = "reqwest")]
#[derive(Clone, Default)]
pub struct ReqwestHttpClient(ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest client.
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl TokenHttpClient for ReqwestHttpClient {
	type Handle = ReqwestHandle;
	type TransportError = ReqwestError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		ReqwestHandle { client: self.0.clone(), slot }
	}
}

/// Request handle produced by [`ReqwestHttpClient`].
#[cfg(feature = "reqwest")]
pub struct ReqwestHandle {
	client: ReqwestClient,
	slot: ResponseMetadataSlot,
}
#[cfg(feature = "reqwest")]
impl<'c> AsyncHttpClient<'c> for ReqwestHandle {
	type Error = HttpClientError<ReqwestError>;
	type Future = Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

	fn call(&'c self, request: HttpRequest) -> Self::Future {
		Box::pin(async move {
			self.slot.take();

			let response =
				self.client.execute(request.try_into().map_err(Box::new)?).await.map_err(Box::new)?;
			let status = response.status();
			let headers = response.headers().clone();

			self.slot.store(ResponseMetadata::from_headers(
				status.as_u16(),
				&headers,
				OffsetDateTime::now_utc(),
			));

			let body = response.bytes().await.map_err(Box::new)?;
			let mut converted = HttpResponse::new(body.to_vec());

			*converted.status_mut() = status;
			*converted.headers_mut() = headers;

			Ok(converted)
		})
	}
}

/// Parses a `Retry-After` value given as delta-seconds or an HTTP date.
#[cfg(feature = "reqwest")]
fn parse_retry_after(raw: &str, now: OffsetDateTime) -> Option<Duration> {
	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(secs.into()));
	}

	let delta = OffsetDateTime::parse(raw, &Rfc2822).ok()? - now;

	delta.is_positive().then_some(delta)
}
