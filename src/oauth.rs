//! Token endpoint protocol: form requests, response and error payloads, and transport error
//! mapping.

pub use oauth2;

// crates.io
use oauth2::{
	AsyncHttpClient, HttpClientError,
	http::{
		Method,
		header::{ACCEPT, CONTENT_TYPE},
	},
};
use serde::{Deserializer, de::DeserializeOwned, de::Error as DeError};
// self
use crate::{
	_prelude::*,
	auth::{
		AuthenticationResult, ClientInfo, IdToken, ResultWrapper, ScopeSet, TokenSecret,
		TokenSource, UserInfo,
	},
	authority::Authority,
	error::{ClientError, ConfigError, ServiceError, TransientError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	obs::FlowKind,
};

/// Header carrying the request correlation id.
pub const CLIENT_REQUEST_ID: &str = "client-request-id";
/// Header asking the identity provider to echo the correlation id.
pub const RETURN_CLIENT_REQUEST_ID: &str = "return-client-request-id";
/// Assertion type for signed client assertions.
pub const JWT_BEARER_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Parameters the pipeline sends itself; callers may not override them through extra query
/// parameters.
pub const RESERVED_PARAMETERS: [&str; 19] = [
	"grant_type",
	"client_id",
	"client_secret",
	"client_assertion",
	"client_assertion_type",
	"scope",
	"refresh_token",
	"code",
	"code_verifier",
	"redirect_uri",
	"username",
	"password",
	"assertion",
	"requested_token_use",
	"device_code",
	"client_info",
	"claims",
	"state",
	"response_type",
];

const MAX_LIFETIME_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// Returns `true` for the server statuses that allow an extended-lifetime token to be served.
pub fn is_resiliency_status(status: u16) -> bool {
	matches!(status, 500 | 503 | 504)
}

/// Rejects extra query parameters that collide with parameters the pipeline sends.
pub fn validate_extra_query_parameters(extra: &BTreeMap<String, String>) -> Result<(), ClientError> {
	let mut seen = Vec::with_capacity(extra.len());

	for name in extra.keys() {
		let lowered = name.trim().to_ascii_lowercase();

		if RESERVED_PARAMETERS.contains(&lowered.as_str()) || seen.contains(&lowered) {
			return Err(ClientError::DuplicateQueryParameter { name: name.clone() });
		}

		seen.push(lowered);
	}

	Ok(())
}

/// Confidential client credential.
#[derive(Clone)]
pub enum ClientCredential {
	/// Shared secret sent as `client_secret`.
	Secret(TokenSecret),
	/// Signed JWT sent as `client_assertion`.
	Assertion(TokenSecret),
}
impl Debug for ClientCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Secret(_) => f.write_str("ClientCredential::Secret(<redacted>)"),
			Self::Assertion(_) => f.write_str("ClientCredential::Assertion(<redacted>)"),
		}
	}
}

/// Form-encoded token endpoint request.
#[derive(Clone)]
pub struct TokenRequest {
	params: Vec<(String, String)>,
	headers: Vec<(String, String)>,
	query: Vec<(String, String)>,
}
impl TokenRequest {
	/// Starts a request for `grant_type`.
	pub fn new(grant_type: &str) -> Self {
		Self::form().param("grant_type", grant_type)
	}

	/// Starts a form without a grant, as the device authorization endpoint expects.
	pub fn form() -> Self {
		Self { params: Vec::new(), headers: Vec::new(), query: Vec::new() }
	}

	/// Adds a form parameter.
	pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.params.push((name.into(), value.into()));

		self
	}

	/// Adds the space-delimited `scope` parameter unless `scope` is empty.
	pub fn scope(self, scope: &ScopeSet) -> Self {
		if scope.is_empty() { self } else { self.param("scope", scope.normalized()) }
	}

	/// Adds a header.
	pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.push((name.into(), value.into()));

		self
	}

	/// Adds the confidential client credential, if any.
	pub fn credential(self, credential: Option<&ClientCredential>) -> Self {
		match credential {
			Some(ClientCredential::Secret(secret)) => self.param("client_secret", secret.expose()),
			Some(ClientCredential::Assertion(assertion)) => self
				.param("client_assertion_type", JWT_BEARER_ASSERTION_TYPE)
				.param("client_assertion", assertion.expose()),
			None => self,
		}
	}

	/// Adds caller-supplied extra query parameters, rejecting collisions with form parameters.
	pub fn extra_query_parameters(
		mut self,
		extra: &BTreeMap<String, String>,
	) -> Result<Self, ClientError> {
		for (name, value) in extra {
			if self.has_param(name) {
				return Err(ClientError::DuplicateQueryParameter { name: name.clone() });
			}

			self.query.push((name.clone(), value.clone()));
		}

		Ok(self)
	}

	/// Returns `true` if a form parameter named `name` (case-insensitive) is present.
	pub fn has_param(&self, name: &str) -> bool {
		self.params.iter().any(|(key, _)| key.eq_ignore_ascii_case(name))
	}

	/// Value of form parameter `name`.
	pub fn param_value(&self, name: &str) -> Option<&str> {
		self.params.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
	}

	fn encode_body(&self) -> Vec<u8> {
		url::form_urlencoded::Serializer::new(String::new())
			.extend_pairs(self.params.iter())
			.finish()
			.into_bytes()
	}

	fn target(&self, endpoint: &Url) -> Url {
		let mut url = endpoint.clone();

		if !self.query.is_empty() {
			url.query_pairs_mut().extend_pairs(self.query.iter());
		}

		url
	}

	fn into_http(self, endpoint: &Url) -> Result<oauth2::HttpRequest> {
		let mut builder = oauth2::http::Request::builder()
			.method(Method::POST)
			.uri(self.target(endpoint).as_str())
			.header(CONTENT_TYPE, "application/x-www-form-urlencoded")
			.header(ACCEPT, "application/json");

		for (name, value) in &self.headers {
			builder = builder.header(name.as_str(), value.as_str());
		}

		builder.body(self.encode_body()).map_err(|e| ConfigError::from(e).into())
	}
}
impl Debug for TokenRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let names = self.params.iter().map(|(key, _)| key.as_str()).collect::<Vec<_>>();

		f.debug_struct("TokenRequest").field("params", &names).finish_non_exhaustive()
	}
}

/// Sends `request` to `endpoint` and decodes a successful JSON body as `T`.
///
/// Error payloads become [`ServiceError`] with the observed status; unparseable failures become
/// [`TransientError`] so the resiliency rule can still inspect the status.
pub async fn send_form<C, M, T>(
	http_client: &C,
	mapper: &M,
	flow: FlowKind,
	endpoint: &Url,
	request: TokenRequest,
) -> Result<T>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
	T: DeserializeOwned,
{
	let slot = ResponseMetadataSlot::default();
	let handle = http_client.with_metadata(slot.clone());
	let request = request.into_http(endpoint)?;
	let response = handle
		.call(request)
		.await
		.map_err(|e| mapper.map_transport_error(flow, slot.take().as_ref(), e))?;
	let meta =
		slot.take().unwrap_or_else(|| ResponseMetadata::from_status(response.status().as_u16()));
	let status = meta.status.or(Some(response.status().as_u16()));

	if response.status().is_success() {
		return parse_json(response.body(), status);
	}

	match serde_json::from_slice::<ErrorResponse>(response.body()) {
		Ok(payload) if !payload.error.is_empty() => {
			let mut service = payload.into_service_error(status);

			if service.correlation_id.is_none() {
				service.correlation_id = meta.correlation_id;
			}

			Err(service.into())
		},
		_ => Err(TransientError::TokenEndpoint {
			message: format!("HTTP {}", response.status().as_u16()),
			status,
			retry_after: meta.retry_after,
		}
		.into()),
	}
}

fn parse_json<T>(body: &[u8], status: Option<u16>) -> Result<T>
where
	T: DeserializeOwned,
{
	let mut deserializer = serde_json::Deserializer::from_slice(body);

	serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|source| TransientError::TokenResponseParse { source, status }.into())
}

/// Successful token endpoint payload.
#[derive(Clone, Default, Deserialize)]
pub struct TokenResponse {
	/// Access token.
	#[serde(default)]
	pub access_token: Option<String>,
	/// Token type.
	#[serde(default)]
	pub token_type: Option<String>,
	/// Lifetime in seconds (number or numeric string).
	#[serde(default, deserialize_with = "lenient_seconds")]
	pub expires_in: Option<i64>,
	/// Extended lifetime in seconds.
	#[serde(default, deserialize_with = "lenient_seconds")]
	pub ext_expires_in: Option<i64>,
	/// Refresh token.
	#[serde(default)]
	pub refresh_token: Option<String>,
	/// Raw id token.
	#[serde(default)]
	pub id_token: Option<String>,
	/// Raw client info.
	#[serde(default)]
	pub client_info: Option<String>,
	/// Granted scope.
	#[serde(default)]
	pub scope: Option<String>,
	/// Family id of the refresh token.
	#[serde(default)]
	pub foci: Option<String>,
}
impl TokenResponse {
	/// Normalizes the payload into a [`ResultWrapper`] for `scope` issued by `authority`.
	pub fn into_wrapper(
		self,
		scope: &ScopeSet,
		authority: &Authority,
		correlation_id: Uuid,
		source: TokenSource,
	) -> Result<ResultWrapper> {
		let access_token = self.access_token.ok_or(ConfigError::MissingAccessToken)?;
		let expires_in = self.expires_in.ok_or(ConfigError::MissingExpiresIn)?;

		if expires_in <= 0 {
			return Err(ConfigError::NonPositiveExpiresIn.into());
		}

		if expires_in > MAX_LIFETIME_SECONDS {
			return Err(ConfigError::ExpiresInOutOfRange.into());
		}

		let lifetime = Duration::seconds(expires_in);
		let client_info = self
			.client_info
			.as_deref()
			.map(ClientInfo::parse)
			.transpose()
			.map_err(ClientError::from)?;
		let id_token =
			self.id_token.map(IdToken::parse).transpose().map_err(ClientError::from)?;
		let granted = match self.scope.as_deref() {
			Some(raw) if !raw.trim().is_empty() =>
				ScopeSet::new(raw.split_whitespace()).map_err(ClientError::from)?,
			_ => scope.clone(),
		};
		let mut builder = AuthenticationResult::builder(granted, authority.as_str())
			.access_token(access_token)
			.issued_at(OffsetDateTime::now_utc())
			.expires_in(lifetime)
			.correlation_id(correlation_id)
			.source(source);

		if let Some(token_type) = self.token_type {
			builder = builder.token_type(token_type);
		}
		if let Some(extended) = self
			.ext_expires_in
			.filter(|seconds| (1..=MAX_LIFETIME_SECONDS).contains(seconds))
		{
			builder = builder.extended_expires_in(Duration::seconds(extended));
		}
		if let Some(id_token) = &id_token {
			let user = UserInfo::from_id_token(id_token, client_info.as_ref());

			builder = builder.id_token(id_token.raw()).user(user);

			if let Some(tenant) = id_token.tenant_id() {
				builder = builder.tenant_id(tenant);
			}
		} else if let Some(info) = &client_info {
			builder = builder.tenant_id(info.utid.clone());
		}

		let result = builder.build().map_err(|_| ConfigError::MissingAccessToken)?;

		Ok(ResultWrapper {
			result,
			refresh_token: self.refresh_token.filter(|rt| !rt.is_empty()).map(TokenSecret::new),
			client_info: self.client_info,
			family_id: self.foci,
		})
	}
}
impl Debug for TokenResponse {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenResponse")
			.field("token_type", &self.token_type)
			.field("expires_in", &self.expires_in)
			.field("scope", &self.scope)
			.finish_non_exhaustive()
	}
}

/// OAuth error payload.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ErrorResponse {
	/// OAuth `error` code.
	#[serde(default)]
	pub error: String,
	/// OAuth `error_description`.
	#[serde(default)]
	pub error_description: Option<String>,
	/// Provider error codes.
	#[serde(default)]
	pub error_codes: Vec<i64>,
	/// Provider sub-error.
	#[serde(default)]
	pub suberror: Option<String>,
	/// Claims challenge.
	#[serde(default)]
	pub claims: Option<String>,
	/// Echoed correlation id.
	#[serde(default)]
	pub correlation_id: Option<String>,
}
impl ErrorResponse {
	/// Converts the payload into a [`ServiceError`] observed with `status`.
	pub fn into_service_error(self, status: Option<u16>) -> ServiceError {
		ServiceError {
			code: self.error,
			description: self.error_description,
			error_codes: self.error_codes,
			suberror: self.suberror,
			claims: self.claims,
			status,
			correlation_id: self.correlation_id,
		}
	}
}

/// Device authorization endpoint payload.
#[derive(Clone, Debug, Deserialize)]
pub struct DeviceCodeResponse {
	/// Code the user enters on the verification page.
	pub user_code: String,
	/// Code the client polls with.
	pub device_code: String,
	/// Verification page.
	#[serde(alias = "verification_url")]
	pub verification_uri: String,
	/// Lifetime in seconds.
	#[serde(deserialize_with = "required_seconds")]
	pub expires_in: i64,
	/// Poll interval in seconds.
	#[serde(default, deserialize_with = "lenient_seconds")]
	pub interval: Option<i64>,
	/// Human-readable instructions.
	#[serde(default)]
	pub message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
	Number(i64),
	String(String),
}
impl NumberOrString {
	fn seconds<E>(self) -> Result<i64, E>
	where
		E: DeError,
	{
		match self {
			Self::Number(value) => Ok(value),
			Self::String(raw) => raw.trim().parse().map_err(E::custom),
		}
	}
}

fn lenient_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
	D: Deserializer<'de>,
{
	Option::<NumberOrString>::deserialize(deserializer)?.map(NumberOrString::seconds).transpose()
}

fn required_seconds<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
	D: Deserializer<'de>,
{
	NumberOrString::deserialize(deserializer)?.seconds()
}

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a crate error.
	fn map_transport_error(
		&self,
		flow: FlowKind,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		flow: FlowKind,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(flow, meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => map_generic_transport_error(meta, message),
			_ => map_generic_transport_error(meta, "unknown transport failure"),
		}
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(flow: FlowKind, meta: Option<&ResponseMetadata>, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::TokenEndpoint {
			message: format!("request timed out during the {flow} flow"),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	TransportError::from(err).into()
}

/// Maps a transport failure that carries only a message.
pub fn map_generic_transport_error(meta: Option<&ResponseMetadata>, message: impl Display) -> Error {
	TransientError::TokenEndpoint {
		message: format!("HTTP client error: {message}"),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
