//! Error taxonomy shared by the cache, the transport layer, and every acquisition flow.

// self
use crate::{
	_prelude::*,
	auth::{IdentifierError, IdentityError, ScopeValidationError},
	authority::AuthorityError,
	broker::BrokerError,
	cache::CacheError,
};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Caller misuse detected before any network or cache I/O.
	#[error(transparent)]
	Client(#[from] ClientError),
	/// Identity provider rejected the request.
	#[error(transparent)]
	Service(#[from] ServiceError),
	/// No usable cached credential exists and the flow forbids interactive fallback.
	#[error("Silent token acquisition failed; user interaction is required.")]
	SilentFailed {
		/// Failure observed while trying to use cached material, if any.
		#[source]
		cause: Option<Box<Error>>,
	},
	/// Native broker failure, surfaced untranslated.
	#[error(transparent)]
	Broker(#[from] BrokerError),
	/// Token cache failure (lock timeout, ambiguity, persistence).
	#[error("{0}")]
	Cache(
		#[from]
		#[source]
		CacheError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
}
impl Error {
	/// Wraps an optional cause into [`Error::SilentFailed`].
	pub fn silent_failed(cause: Option<Error>) -> Self {
		Self::SilentFailed { cause: cause.map(Box::new) }
	}

	/// HTTP status observed on the failing token endpoint call, when known.
	pub fn http_status(&self) -> Option<u16> {
		match self {
			Self::Service(err) => err.status,
			Self::Transient(TransientError::TokenEndpoint { status, .. })
			| Self::Transient(TransientError::TokenResponseParse { status, .. }) => *status,
			Self::SilentFailed { cause: Some(cause) } => cause.http_status(),
			_ => None,
		}
	}

	/// Returns `true` when the failure belongs to the recoverable server class that allows an
	/// extended-lifetime token to be served instead.
	pub fn is_resiliency_eligible(&self) -> bool {
		self.http_status().is_some_and(crate::oauth::is_resiliency_status)
	}

	/// Returns `true` when the caller must fall back to an interactive flow.
	pub fn is_interaction_required(&self) -> bool {
		match self {
			Self::Service(err) => err.is_interaction_required(),
			Self::SilentFailed { .. } => true,
			_ => false,
		}
	}

	/// Error code recorded in the `last` telemetry header for a failed request.
	pub fn telemetry_code(&self) -> String {
		match self {
			Self::Client(err) => err.code().into(),
			Self::Service(err) => err.code.clone(),
			Self::SilentFailed { cause: Some(cause) } => cause.telemetry_code(),
			Self::SilentFailed { cause: None } => "no_tokens_found".into(),
			Self::Broker(err) => err.code.clone(),
			Self::Cache(err) => err.code().into(),
			Self::Config(_) => "config_error".into(),
			Self::Transient(_) => "service_not_available".into(),
			Self::Transport(_) => "network_error".into(),
		}
	}
}

/// Caller misuse, raised before any network or cache I/O.
#[derive(Debug, ThisError)]
pub enum ClientError {
	/// A parameter required by the flow was not supplied.
	#[error("Required parameter `{name}` is missing.")]
	MissingParameter {
		/// Parameter name.
		name: &'static str,
	},
	/// An extra query parameter collides with a parameter the flow already sends.
	#[error("Extra query parameter `{name}` duplicates a reserved parameter.")]
	DuplicateQueryParameter {
		/// Offending parameter name.
		name: String,
	},
	/// Authority type is not supported by the flow.
	#[error("Authority `{authority}` is not supported by the {flow} flow.")]
	InvalidAuthorityType {
		/// Canonical authority URL.
		authority: String,
		/// Flow label.
		flow: &'static str,
	},
	/// Authority URL failed validation.
	#[error(transparent)]
	Authority(#[from] AuthorityError),
	/// Redirect URI carries a fragment component.
	#[error("Redirect URI must not contain a fragment.")]
	RedirectUriHasFragment,
	/// Returned user differs from the one the caller asked for.
	#[error("Returned user `{returned}` does not match the requested user `{requested}`.")]
	UserMismatch {
		/// Identifier the caller supplied.
		requested: String,
		/// Identifier the identity provider returned.
		returned: String,
	},
	/// Authorization redirect returned a different `state` value.
	#[error("Authorization state mismatch.")]
	AuthorizationStateMismatch,
	/// Authorization round trip asked for a broker but none is configured.
	#[error("Authorization requires a native broker, but none is configured.")]
	BrokerUnavailable,
	/// Device code expired before the user completed sign-in.
	#[error("Device code expired before the user completed sign-in.")]
	DeviceCodeExpired,
	/// Caller cancelled the request.
	#[error("The request was cancelled.")]
	Cancelled,
	/// Identity material (id token, client info) could not be decoded.
	#[error(transparent)]
	Identity(#[from] IdentityError),
	/// Identifier validation failed.
	#[error(transparent)]
	Identifier(#[from] IdentifierError),
	/// Scope validation failed.
	#[error(transparent)]
	Scope(#[from] ScopeValidationError),
}
impl ClientError {
	/// Stable code used in telemetry and logs.
	pub fn code(&self) -> &'static str {
		match self {
			Self::MissingParameter { .. } => "missing_parameter",
			Self::DuplicateQueryParameter { .. } => "duplicate_query_parameter",
			Self::InvalidAuthorityType { .. } => "invalid_authority_type",
			Self::Authority(_) => "invalid_authority",
			Self::RedirectUriHasFragment => "redirect_uri_has_fragment",
			Self::UserMismatch { .. } => "user_mismatch",
			Self::AuthorizationStateMismatch => "state_mismatch",
			Self::BrokerUnavailable => "broker_unavailable",
			Self::DeviceCodeExpired => "code_expired",
			Self::Cancelled => "authentication_canceled",
			Self::Identity(_) => "invalid_identity_material",
			Self::Identifier(_) => "invalid_identifier",
			Self::Scope(_) => "invalid_scope",
		}
	}
}

/// Identity provider error payload, carried verbatim.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Identity provider returned `{code}`.")]
pub struct ServiceError {
	/// OAuth `error` code.
	pub code: String,
	/// OAuth `error_description`.
	pub description: Option<String>,
	/// Numeric provider error codes.
	pub error_codes: Vec<i64>,
	/// Provider sub-error classification.
	pub suberror: Option<String>,
	/// Claims challenge returned alongside the error.
	pub claims: Option<String>,
	/// HTTP status of the response.
	pub status: Option<u16>,
	/// Correlation id echoed by the provider.
	pub correlation_id: Option<String>,
}
impl ServiceError {
	/// Code used when a refresh grant is rejected as malformed.
	pub const FAILED_TO_REFRESH_TOKEN: &str = "failed_to_refresh_token";
	const INTERACTION_REQUIRED_CODES: [&str; 4] =
		["interaction_required", "invalid_grant", "consent_required", "login_required"];

	/// Creates an error with only a code and optional status.
	pub fn new(code: impl Into<String>, status: Option<u16>) -> Self {
		Self {
			code: code.into(),
			description: None,
			error_codes: Vec::new(),
			suberror: None,
			claims: None,
			status,
			correlation_id: None,
		}
	}

	/// Returns `true` for the subtype that demands user interaction.
	pub fn is_interaction_required(&self) -> bool {
		Self::INTERACTION_REQUIRED_CODES.contains(&self.code.as_str())
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A resolved endpoint URL is invalid.
	#[error("Endpoint URL is invalid.")]
	InvalidEndpoint {
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Token endpoint response omitted `access_token`.
	#[error("Token endpoint response is missing access_token.")]
	MissingAccessToken,
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Flow needs a confidential client credential.
	#[error("The {flow} flow requires a client credential.")]
	MissingClientCredential {
		/// Flow label.
		flow: &'static str,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the identity provider.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the identity provider.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
