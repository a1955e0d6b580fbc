//! Acquisition entry points and the [`Client`] facade that owns their collaborators.

pub mod common;
pub mod device_code;
pub mod handler;
pub mod interactive;

mod client_credentials;
mod on_behalf_of;
mod refresh;
mod silent;
mod username_password;

pub use common::*;
pub use device_code::{DeviceCodePolicy, DeviceCodeResult};
pub use handler::{FlowFlags, FlowHooks, FlowState, PreTokenOutcome, PreTokenStep, Stage};
pub use interactive::{
	AuthorizationRequest, AuthorizationResult, InteractiveParameters, SSO_REFRESH_TOKEN_HEADER,
	WebUi, WebUiFuture,
};

// self
use crate::{
	_prelude::*,
	auth::{Account, ClientId, ScopeSet, Subject, TokenSecret},
	authority::{AuthorityResolver, DefaultAuthorityResolver},
	broker::NativeBroker,
	cache::{CacheNotificationArgs, CacheQueryData, TokenCache},
	http::TokenHttpClient,
	oauth::{ClientCredential, TransportErrorMapper},
	obs::FlowMetrics,
	telemetry::TelemetryRecorder,
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Client specialized for the crate's default reqwest transport stack.
pub type ReqwestTokenClient = Client<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Application registered with an identity provider, plus the collaborators its acquisitions
/// share: HTTP transport, token cache, authority resolver, optional native broker, and
/// telemetry state.
///
/// Every acquisition runs through the [`handler`] state machine; the public methods only pick
/// the variant and build its cache query.
pub struct Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client wrapper used for every outbound request.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors before surfacing them to callers.
	pub transport_mapper: Arc<M>,
	/// Token cache consulted and updated by the flows.
	pub cache: Arc<TokenCache>,
	/// Application (client) id.
	pub client_id: ClientId,
	/// Confidential client credential, if any.
	pub credential: Option<ClientCredential>,
	/// Authority metadata resolver.
	pub resolver: Arc<dyn AuthorityResolver>,
	/// Native broker, if one is available on this platform.
	pub broker: Option<Arc<dyn NativeBroker>>,
	/// Server telemetry accumulated across requests.
	pub telemetry: Arc<TelemetryRecorder>,
	/// Shared counters for flow outcomes.
	pub metrics: Arc<FlowMetrics>,
	/// Serve extended-lifetime tokens while the identity provider is unavailable.
	pub extended_lifetime_enabled: bool,
	/// Poll pacing for [`Client::acquire_token_with_device_code`].
	pub device_code_policy: DeviceCodePolicy,
}
impl<C, M> Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		cache: Arc<TokenCache>,
		client_id: ClientId,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			cache,
			client_id,
			credential: None,
			resolver: Arc::new(DefaultAuthorityResolver),
			broker: None,
			telemetry: Default::default(),
			metrics: Default::default(),
			extended_lifetime_enabled: false,
			device_code_policy: Default::default(),
		}
	}

	/// Authenticates as a confidential client with a shared secret.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.credential = Some(ClientCredential::Secret(TokenSecret::new(secret)));

		self
	}

	/// Authenticates as a confidential client with a signed JWT assertion.
	pub fn with_client_assertion(mut self, assertion: impl Into<String>) -> Self {
		self.credential = Some(ClientCredential::Assertion(TokenSecret::new(assertion)));

		self
	}

	/// Replaces the authority resolver.
	pub fn with_resolver(mut self, resolver: Arc<dyn AuthorityResolver>) -> Self {
		self.resolver = resolver;

		self
	}

	/// Attaches a native broker.
	pub fn with_broker(mut self, broker: Arc<dyn NativeBroker>) -> Self {
		self.broker = Some(broker);

		self
	}

	/// Enables the extended-lifetime fallback.
	pub fn with_extended_lifetime(mut self, enabled: bool) -> Self {
		self.extended_lifetime_enabled = enabled;

		self
	}

	/// Replaces the device code poll pacing.
	pub fn with_device_code_policy(mut self, policy: DeviceCodePolicy) -> Self {
		self.device_code_policy = policy;

		self
	}

	/// Accounts known to the broker when one is invokable, otherwise to the cache.
	pub async fn accounts(&self) -> Result<Vec<Account>> {
		if let Some(broker) = self.invokable_broker() {
			return broker.get_accounts(&self.client_id).await.map_err(Error::from);
		}

		let access = self.cache.begin_access(self.account_args(None)).await?;
		let accounts = access.accounts();

		access.finish()?;

		Ok(accounts)
	}

	/// Removes `account` from the cache and, when one is invokable, from the broker.
	///
	/// Returns how many cache records were removed.
	pub async fn remove_account(&self, account: &Account) -> Result<usize> {
		if let Some(broker) = self.invokable_broker() {
			broker.remove_account(&self.client_id, account).await?;
		}

		let mut access = self.cache.begin_access(self.account_args(Some(account))).await?;
		let removed = access.remove_account(account)?;

		access.finish()?;

		Ok(removed)
	}

	pub(crate) fn query(
		&self,
		params: &AcquireTokenParameters,
		scope: ScopeSet,
		subject: Subject,
	) -> CacheQueryData {
		let mut query =
			CacheQueryData::new(params.authority.clone(), scope, self.client_id.clone(), subject);

		query.extended_lifetime_enabled = self.extended_lifetime_enabled;
		query.force_refresh = params.force_refresh;

		query
	}

	fn account_args(&self, account: Option<&Account>) -> CacheNotificationArgs {
		CacheNotificationArgs {
			client_id: Some(self.client_id.clone()),
			scope: None,
			unique_id: account.and_then(|account| account.unique_id.clone()),
			displayable_id: account.and_then(|account| account.username.clone()),
			has_state_changed: false,
		}
	}
}
#[cfg(feature = "reqwest")]
impl Client<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a client with its own reqwest-backed transport.
	///
	/// Use [`Client::with_client_secret`] to attach a confidential client credential.
	pub fn new(cache: Arc<TokenCache>, client_id: ClientId) -> Self {
		Self::with_http_client(
			cache,
			client_id,
			ReqwestHttpClient::default(),
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client")
			.field("client_id", &self.client_id)
			.field("credential", &self.credential)
			.field("cache", &self.cache)
			.field("broker_set", &self.broker.is_some())
			.field("extended_lifetime_enabled", &self.extended_lifetime_enabled)
			.finish()
	}
}
