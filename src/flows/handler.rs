//! Orchestration state machine shared by every acquisition variant.
//!
//! A request walks `Init → PreRun → CacheLookup → RefreshAttempt → BrokerOrNetwork → PostRun`
//! and ends in `Done` or `Error`. Variants plug in through [`FlowHooks`]: they fix their
//! [`FlowFlags`] up front, contribute the grant parameters, and may intercept the step right
//! before the token endpoint is called. Every failure funnels into one place where the
//! resiliency rule may still serve an extended-lifetime token.

// crates.io
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	auth::{AuthenticationResult, RefreshCandidate, ResultWrapper, ScopeSet, TokenSource},
	authority::{AuthorityEndpoints, AuthorityType},
	broker::{BrokerMode, BrokerRequest, NativeBroker},
	cache::{CacheLookup, CacheNotificationArgs, CacheQueryData, TokenCache},
	context::RequestContext,
	error::{ClientError, ConfigError, ServiceError},
	flows::{AcquireTokenParameters, Client},
	http::TokenHttpClient,
	oauth::{
		self, CLIENT_REQUEST_ID, RETURN_CLIENT_REQUEST_ID, TokenRequest, TokenResponse,
		TransportErrorMapper,
	},
	obs::{self, FlowKind, FlowOutcome, flow_event},
};

/// Boxed future returned by [`FlowHooks::pre_token_request`].
pub type HookFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Orchestration stages, logged on every transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
	/// Parameter validation.
	Init,
	/// Authority metadata resolution.
	PreRun,
	/// Cache consultation.
	CacheLookup,
	/// Redemption of a cached refresh token.
	RefreshAttempt,
	/// Broker delegation or token endpoint call.
	BrokerOrNetwork,
	/// Variant post-processing and cache write-back.
	PostRun,
	/// Success.
	Done,
	/// Failure.
	Error,
}
impl Stage {
	/// Returns a stable label suitable for span or log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Stage::Init => "init",
			Stage::PreRun => "pre_run",
			Stage::CacheLookup => "cache_lookup",
			Stage::RefreshAttempt => "refresh_attempt",
			Stage::BrokerOrNetwork => "broker_or_network",
			Stage::PostRun => "post_run",
			Stage::Done => "done",
			Stage::Error => "error",
		}
	}
}
impl Display for Stage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Behavior switches fixed by a variant before the state machine starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowFlags {
	/// Consult the cache (and attempt a refresh) before going to the network.
	pub load_from_cache: bool,
	/// Write the result back into the cache.
	pub store_to_cache: bool,
	/// Accept ADFS authorities.
	pub supports_adfs: bool,
	/// Require a confidential client credential.
	pub requires_credential: bool,
}

/// What the handler does after [`FlowHooks::pre_token_request`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PreTokenOutcome {
	/// Call the token endpoint with [`FlowHooks::token_request`].
	Continue,
	/// Delegate to the native broker in the given mode.
	UseBroker(BrokerMode),
}

/// Per-request state owned by the state machine.
#[derive(Debug)]
pub struct FlowState {
	/// Cache query for the request; its authority is pinned to the issuing tenant in `PostRun`.
	pub query: CacheQueryData,
	/// Failure captured during the refresh attempt.
	pub captured: Option<Error>,
	/// Extended-lifetime token kept for the resiliency rule.
	pub stale: Option<ResultWrapper>,
	stage: Stage,
}
impl FlowState {
	/// Fresh state positioned at [`Stage::Init`].
	pub fn new(query: CacheQueryData) -> Self {
		Self { query, captured: None, stale: None, stage: Stage::Init }
	}

	/// Current stage.
	pub fn stage(&self) -> Stage {
		self.stage
	}

	pub(crate) fn enter(&mut self, stage: Stage) {
		flow_event!(debug, "stage {} -> {}", self.stage, stage);

		self.stage = stage;
	}
}

/// Inputs available to [`FlowHooks::pre_token_request`].
pub struct PreTokenStep<'a> {
	/// Cache shared by the client, for lookups that need their own notification bracket.
	pub cache: &'a TokenCache,
	/// Client id of the application.
	pub client_id: &'a str,
	/// Mutable request state.
	pub state: &'a mut FlowState,
	/// Resolved endpoints.
	pub endpoints: &'a AuthorityEndpoints,
	/// Common parameters.
	pub params: &'a AcquireTokenParameters,
	/// Request context.
	pub ctx: &'a RequestContext,
}

/// Variant contract plugged into [`run`].
pub trait FlowHooks
where
	Self: Send,
{
	/// Flow kind (telemetry api id, metric and span label).
	fn kind(&self) -> FlowKind;

	/// Switches fixed for the whole request.
	fn flags(&self) -> FlowFlags;

	/// Broker mode the variant may delegate to, if any.
	fn broker_mode(&self) -> Option<BrokerMode> {
		None
	}

	/// Variant-specific parameter validation, run during `Init`.
	fn validate(&self) -> Result<(), ClientError> {
		Ok(())
	}

	/// Step run right before the token endpoint call.
	fn pre_token_request<'a>(
		&'a mut self,
		step: PreTokenStep<'a>,
	) -> HookFuture<'a, PreTokenOutcome> {
		let _ = step;

		Box::pin(async { Ok(PreTokenOutcome::Continue) })
	}

	/// Grant-specific form for the token endpoint call.
	fn token_request(&self, state: &FlowState) -> Result<TokenRequest>;

	/// Post-processing of a token endpoint result before it is cached.
	fn post_token_request(&self, state: &FlowState, wrapper: &mut ResultWrapper) -> Result<()> {
		let _ = (state, wrapper);

		Ok(())
	}
}

/// Runs `hooks` through the state machine.
pub(crate) async fn run<C, M, H>(
	client: &Client<C, M>,
	hooks: &mut H,
	params: &AcquireTokenParameters,
	query: CacheQueryData,
	ctx: &RequestContext,
) -> Result<AuthenticationResult>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
	H: FlowHooks,
{
	let mut state = FlowState::new(query);

	begin(client, hooks.kind());

	let outcome = ctx.span().instrument(drive(client, hooks, params, &mut state, ctx)).await;

	conclude(client, hooks.kind(), &mut state, ctx, outcome)
}

async fn drive<C, M, H>(
	client: &Client<C, M>,
	hooks: &mut H,
	params: &AcquireTokenParameters,
	state: &mut FlowState,
	ctx: &RequestContext,
) -> Result<ResultWrapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
	H: FlowHooks,
{
	validate(client, hooks.kind(), hooks.flags(), params, ctx)?;
	hooks.validate()?;

	let endpoints = resolve(client, params, state, ctx).await?;

	if hooks.flags().load_from_cache {
		state.enter(Stage::CacheLookup);

		match lookup(&client.cache, &state.query).await? {
			CacheLookup::Hit(mut wrapper) => {
				if hooks.kind() == FlowKind::Silent {
					client.telemetry.record_silent_success();
				}

				wrapper.result.correlation_id = ctx.correlation_id();

				return Ok(wrapper);
			},
			CacheLookup::RefreshNeeded { candidate, stale } => {
				state.stale = stale;
				state.enter(Stage::RefreshAttempt);

				match refresh(client, params, state, &endpoints, candidate, ctx).await {
					Ok(wrapper) => return post_run(client, hooks, state, wrapper).await,
					Err(e) if is_malformed_refresh(&e) => return Err(failed_to_refresh(e)),
					Err(e) => {
						flow_event!(info, "refresh attempt failed, continuing: {e}");

						state.captured = Some(e);
					},
				}
			},
			CacheLookup::Miss { stale } => state.stale = stale,
		}
	}

	state.enter(Stage::BrokerOrNetwork);

	if let Some(mode) = hooks.broker_mode()
		&& let Some(broker) = client.invokable_broker()
	{
		return acquire_from_broker(client, broker, mode, params, &state.query, ctx).await;
	}

	let step = PreTokenStep {
		cache: &client.cache,
		client_id: client.client_id.as_ref(),
		state: &mut *state,
		endpoints: &endpoints,
		params,
		ctx,
	};

	if let PreTokenOutcome::UseBroker(mode) = hooks.pre_token_request(step).await? {
		let broker = client.invokable_broker().ok_or(ClientError::BrokerUnavailable)?;

		return acquire_from_broker(client, broker, mode, params, &state.query, ctx).await;
	}

	let request = hooks.token_request(state)?;
	let response = client
		.send_token_request::<TokenResponse>(ctx, params, &endpoints.token, request)
		.await?;
	let wrapper = response.into_wrapper(
		&state.query.scope,
		&params.authority,
		ctx.correlation_id(),
		TokenSource::IdentityProvider,
	)?;

	post_run(client, hooks, state, wrapper).await
}

/// Records the attempt for `kind`.
pub(crate) fn begin<C, M>(client: &Client<C, M>, kind: FlowKind)
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	client.metrics.record(kind, FlowOutcome::Attempt);
}

/// `Init`: everything that can be rejected without I/O.
pub(crate) fn validate<C, M>(
	client: &Client<C, M>,
	kind: FlowKind,
	flags: FlowFlags,
	params: &AcquireTokenParameters,
	ctx: &RequestContext,
) -> Result<()>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	if params.scope.without_oidc_scopes().is_empty() {
		return Err(ClientError::MissingParameter { name: "scope" }.into());
	}

	oauth::validate_extra_query_parameters(&params.extra_query_parameters)?;

	if params.authority.kind() == AuthorityType::Adfs && !flags.supports_adfs {
		return Err(ClientError::InvalidAuthorityType {
			authority: params.authority.to_string(),
			flow: kind.as_str(),
		}
		.into());
	}
	if flags.requires_credential && client.credential.is_none() {
		return Err(ConfigError::MissingClientCredential { flow: kind.as_str() }.into());
	}
	if ctx.is_cancelled() {
		return Err(ClientError::Cancelled.into());
	}

	Ok(())
}

/// `PreRun`: authority metadata.
pub(crate) async fn resolve<C, M>(
	client: &Client<C, M>,
	params: &AcquireTokenParameters,
	state: &mut FlowState,
	ctx: &RequestContext,
) -> Result<AuthorityEndpoints>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	state.enter(Stage::PreRun);

	ctx.cancellable(client.resolver.resolve(&params.authority)).await
}

async fn lookup(cache: &TokenCache, query: &CacheQueryData) -> Result<CacheLookup> {
	let access = cache.begin_access(CacheNotificationArgs::for_query(query)).await?;
	let lookup = access.find(query, OffsetDateTime::now_utc())?;

	access.finish()?;

	Ok(lookup)
}

async fn refresh<C, M>(
	client: &Client<C, M>,
	params: &AcquireTokenParameters,
	state: &FlowState,
	endpoints: &AuthorityEndpoints,
	candidate: RefreshCandidate,
	ctx: &RequestContext,
) -> Result<ResultWrapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let request = refresh_request(candidate.refresh_token.expose(), &state.query.scope);
	let response = client
		.send_token_request::<TokenResponse>(ctx, params, &endpoints.token, request)
		.await?;
	let mut wrapper = response.into_wrapper(
		&state.query.scope,
		&params.authority,
		ctx.correlation_id(),
		TokenSource::Refresh,
	)?;

	if wrapper.refresh_token.is_none() {
		wrapper.refresh_token = Some(candidate.refresh_token);
	}

	wrapper.carry_over_identity(&candidate.identity);

	Ok(wrapper)
}

/// Refresh grant for `scope` plus the OIDC scopes.
pub(crate) fn refresh_request(refresh_token: &str, scope: &ScopeSet) -> TokenRequest {
	TokenRequest::new("refresh_token")
		.param("refresh_token", refresh_token)
		.scope(&scope.with_oidc_scopes())
		.param("client_info", "1")
}

fn is_malformed_refresh(err: &Error) -> bool {
	matches!(err, Error::Service(service) if service.code == "invalid_request")
}

fn failed_to_refresh(err: Error) -> Error {
	match err {
		Error::Service(service) =>
			ServiceError { code: ServiceError::FAILED_TO_REFRESH_TOKEN.into(), ..service }.into(),
		other => other,
	}
}

async fn acquire_from_broker<C, M>(
	client: &Client<C, M>,
	broker: &Arc<dyn NativeBroker>,
	mode: BrokerMode,
	params: &AcquireTokenParameters,
	query: &CacheQueryData,
	ctx: &RequestContext,
) -> Result<ResultWrapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let request = BrokerRequest {
		authority: params.authority.clone(),
		client_id: client.client_id.clone(),
		scope: params.scope.clone(),
		correlation_id: ctx.correlation_id(),
		login_hint: query.subject.displayable_id.clone(),
		unique_id: query.subject.unique_id.clone(),
		claims: params.claims.clone(),
		extra_query_parameters: params.extra_query_parameters.clone(),
		force_refresh: params.force_refresh,
	};

	flow_event!(debug, "delegating to the native broker ({mode:?})");

	let result = ctx
		.cancellable(async {
			let outcome = match mode {
				BrokerMode::Interactive => broker.acquire_token_interactive(&request).await,
				BrokerMode::Silent => broker.acquire_token_silent(&request).await,
			};

			outcome.map_err(Error::from)
		})
		.await?;

	Ok(ResultWrapper::new(result))
}

async fn post_run<C, M, H>(
	client: &Client<C, M>,
	hooks: &H,
	state: &mut FlowState,
	mut wrapper: ResultWrapper,
) -> Result<ResultWrapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
	H: FlowHooks,
{
	state.enter(Stage::PostRun);
	hooks.post_token_request(state, &mut wrapper)?;

	complete(client, state, hooks.flags().store_to_cache, wrapper).await
}

/// Pins the authority to the issuing tenant and writes the result back.
pub(crate) async fn complete<C, M>(
	client: &Client<C, M>,
	state: &mut FlowState,
	store_to_cache: bool,
	mut wrapper: ResultWrapper,
) -> Result<ResultWrapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	if let Some(tenant) = wrapper.result.tenant_id.as_deref() {
		state.query.authority = state.query.authority.with_tenant(tenant);
		wrapper.result.authority = state.query.authority.as_str().to_owned();
	}
	if store_to_cache {
		let mut access =
			client.cache.begin_access(CacheNotificationArgs::for_query(&state.query)).await?;

		access.store(&state.query, &wrapper)?;
		access.finish()?;
	}

	flow_event!(
		info,
		"token acquired from {} (sha256 {})",
		wrapper.result.source.as_str(),
		wrapper.result.access_token.fingerprint()
	);

	Ok(wrapper)
}

/// `Done` or `Error`: success bookkeeping, resiliency fallback, failure telemetry.
pub(crate) fn conclude<C, M>(
	client: &Client<C, M>,
	kind: FlowKind,
	state: &mut FlowState,
	ctx: &RequestContext,
	outcome: Result<ResultWrapper>,
) -> Result<AuthenticationResult>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let err = match outcome {
		Ok(wrapper) => {
			state.enter(Stage::Done);
			client.metrics.record(kind, FlowOutcome::Success);

			return Ok(wrapper.result);
		},
		Err(err) => err,
	};

	state.enter(Stage::Error);

	if err.is_resiliency_eligible()
		&& let Some(mut stale) = state.stale.take()
	{
		flow_event!(
			warn,
			"identity provider unavailable ({:?}), serving a token valid until {}",
			err.http_status(),
			stale.result.extended_expires_on
		);
		client.metrics.record(kind, FlowOutcome::StaleFallback);
		obs::record_cache_lookup("stale_fallback");

		stale.result.correlation_id = ctx.correlation_id();

		return Ok(stale.result);
	}

	flow_event!(warn, "{kind} flow failed: {err}");
	client.telemetry.record_failure(kind, ctx.correlation_id(), err.telemetry_code());
	client.metrics.record(kind, FlowOutcome::Failure);

	Err(err)
}

impl<C, M> Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Redeems a grant at `endpoint`; a success clears the pending last-request telemetry.
	pub(crate) async fn send_token_request<T>(
		&self,
		ctx: &RequestContext,
		params: &AcquireTokenParameters,
		endpoint: &Url,
		request: TokenRequest,
	) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let response = self.send_request(ctx, params, endpoint, request).await;

		if response.is_ok() {
			self.telemetry.record_success();
		}

		response
	}

	/// Sends a form to `endpoint` with the client id, credential, claims, correlation and
	/// telemetry headers, and the caller's extra query parameters.
	pub(crate) async fn send_request<T>(
		&self,
		ctx: &RequestContext,
		params: &AcquireTokenParameters,
		endpoint: &Url,
		request: TokenRequest,
	) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let mut request = request
			.param("client_id", self.client_id.as_ref())
			.credential(self.credential.as_ref())
			.header(CLIENT_REQUEST_ID, ctx.correlation_id().to_string())
			.header(RETURN_CLIENT_REQUEST_ID, "true");

		if let Some(claims) = &params.claims {
			request = request.param("claims", claims.as_str());
		}
		for (name, value) in self.telemetry.headers(ctx.kind(), params.force_refresh) {
			request = request.header(name, value);
		}

		let request = request.extra_query_parameters(&params.extra_query_parameters)?;

		ctx.cancellable(oauth::send_form(
			&*self.http_client,
			&*self.transport_mapper,
			ctx.kind(),
			endpoint,
			request,
		))
		.await
	}

	pub(crate) fn invokable_broker(&self) -> Option<&Arc<dyn NativeBroker>> {
		self.broker.as_ref().filter(|broker| broker.is_installed_and_invokable())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn malformed_refresh_is_renamed_but_keeps_its_payload() {
		let original = ServiceError {
			description: Some("AADSTS900144".into()),
			..ServiceError::new("invalid_request", Some(400))
		};
		let err = Error::from(original);

		assert!(is_malformed_refresh(&err));

		let Error::Service(renamed) = failed_to_refresh(err) else {
			panic!("Renamed error must stay a service error.");
		};

		assert_eq!(renamed.code, ServiceError::FAILED_TO_REFRESH_TOKEN);
		assert_eq!(renamed.description.as_deref(), Some("AADSTS900144"));
		assert_eq!(renamed.status, Some(400));
		assert!(!is_malformed_refresh(&Error::from(ServiceError::new("invalid_grant", Some(400)))));
	}

	#[test]
	fn refresh_request_adds_the_oidc_scopes() {
		let scope = ScopeSet::new(["user.read"]).expect("Scope fixture should be valid.");
		let request = refresh_request("rt-1", &scope);

		assert_eq!(request.param_value("grant_type"), Some("refresh_token"));
		assert_eq!(request.param_value("refresh_token"), Some("rt-1"));
		assert_eq!(
			request.param_value("scope"),
			Some("offline_access openid profile user.read")
		);
	}
}
