//! Device authorization grant (RFC 8628).
//!
//! Runs outside the generic state machine: one request obtains the user code, the caller shows
//! it, and a poll loop waits for the user to finish on another device. Validation, resolution,
//! write-back and the outcome bookkeeping are shared with [`handler`].

// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	auth::{
		AuthenticationResult, ClientId, ResultWrapper, ScopeSet, Subject, TokenSecret, TokenSource,
	},
	authority::AuthorityEndpoints,
	context::RequestContext,
	error::ClientError,
	flows::{
		AcquireTokenParameters, Client,
		handler::{self, FlowFlags, FlowState, Stage},
	},
	http::TokenHttpClient,
	oauth::{DeviceCodeResponse, TokenRequest, TokenResponse, TransportErrorMapper},
	obs::{FlowKind, flow_event},
};

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const FLAGS: FlowFlags = FlowFlags {
	load_from_cache: false,
	store_to_cache: true,
	supports_adfs: true,
	requires_credential: false,
};

/// Poll pacing for the device code flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCodePolicy {
	/// Interval used when the identity provider does not announce one.
	pub default_interval: StdDuration,
	/// Added to the interval on every `slow_down` answer.
	pub slow_down_increment: StdDuration,
}
impl Default for DeviceCodePolicy {
	fn default() -> Self {
		Self {
			default_interval: StdDuration::from_secs(5),
			slow_down_increment: StdDuration::from_secs(5),
		}
	}
}

/// Device code issued to the application, handed to the caller for display.
#[derive(Clone, Debug)]
pub struct DeviceCodeResult {
	/// Code the user types on the verification page.
	pub user_code: String,
	/// Page where the user enters [`DeviceCodeResult::user_code`].
	pub verification_uri: String,
	/// Instant after which the code is no longer redeemable.
	pub expires_on: OffsetDateTime,
	/// Initial poll interval.
	pub interval: StdDuration,
	/// Instructions to show the user.
	pub message: String,
	/// Application the code was issued to.
	pub client_id: ClientId,
	/// Requested scope.
	pub scope: ScopeSet,
	device_code: TokenSecret,
}
impl DeviceCodeResult {
	fn from_response(
		response: DeviceCodeResponse,
		client_id: &ClientId,
		scope: &ScopeSet,
		policy: &DeviceCodePolicy,
		now: OffsetDateTime,
	) -> Self {
		let interval = response
			.interval
			.and_then(|seconds| u64::try_from(seconds).ok())
			.filter(|seconds| *seconds > 0)
			.map(StdDuration::from_secs)
			.unwrap_or(policy.default_interval);
		let message = response.message.unwrap_or_else(|| {
			format!(
				"To sign in, use a web browser to open the page {} and enter the code {} to authenticate.",
				response.verification_uri, response.user_code
			)
		});

		Self {
			user_code: response.user_code,
			verification_uri: response.verification_uri,
			expires_on: now + Duration::seconds(response.expires_in.max(0)),
			interval,
			message,
			client_id: client_id.clone(),
			scope: scope.clone(),
			device_code: TokenSecret::new(response.device_code),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PollStep {
	Pending,
	SlowDown,
}

fn poll_step(err: Error) -> Result<PollStep> {
	if let Error::Service(service) = &err {
		match service.code.as_str() {
			"authorization_pending" => return Ok(PollStep::Pending),
			"slow_down" => return Ok(PollStep::SlowDown),
			"expired_token" | "code_expired" => return Err(ClientError::DeviceCodeExpired.into()),
			_ => (),
		}
	}

	Err(err)
}

impl<C, M> Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Acquires a token through the device authorization grant.
	///
	/// `callback` receives the user code once it is issued; polling starts after it resolves.
	/// An error from the callback aborts the flow. The result is written to the cache.
	pub async fn acquire_token_with_device_code<F, Fut>(
		&self,
		params: AcquireTokenParameters,
		callback: F,
	) -> Result<AuthenticationResult>
	where
		F: FnOnce(DeviceCodeResult) -> Fut,
		Fut: Future<Output = Result<()>>,
	{
		let kind = FlowKind::DeviceCode;
		let ctx = params.context(kind);
		let query = self.query(&params, params.scope.clone(), Subject::user(None, None));
		let mut state = FlowState::new(query);

		handler::begin(self, kind);

		let outcome =
			ctx.span().instrument(self.drive_device_code(&params, &mut state, &ctx, callback)).await;

		handler::conclude(self, kind, &mut state, &ctx, outcome)
	}

	async fn drive_device_code<F, Fut>(
		&self,
		params: &AcquireTokenParameters,
		state: &mut FlowState,
		ctx: &RequestContext,
		callback: F,
	) -> Result<ResultWrapper>
	where
		F: FnOnce(DeviceCodeResult) -> Fut,
		Fut: Future<Output = Result<()>>,
	{
		handler::validate(self, FlowKind::DeviceCode, FLAGS, params, ctx)?;

		let endpoints = handler::resolve(self, params, state, ctx).await?;

		state.enter(Stage::BrokerOrNetwork);

		let request = TokenRequest::form().scope(&state.query.scope.with_oidc_scopes());
		let response = self
			.send_request::<DeviceCodeResponse>(ctx, params, &endpoints.device_code, request)
			.await?;
		let device_code = DeviceCodeResult::from_response(
			response,
			&self.client_id,
			&state.query.scope,
			&self.device_code_policy,
			OffsetDateTime::now_utc(),
		);

		flow_event!(info, "device code issued, valid until {}", device_code.expires_on);

		ctx.cancellable(callback(device_code.clone())).await?;

		let token = self.poll_device_code(ctx, params, &endpoints, &device_code).await?;
		let wrapper = token.into_wrapper(
			&state.query.scope,
			&params.authority,
			ctx.correlation_id(),
			TokenSource::IdentityProvider,
		)?;

		state.enter(Stage::PostRun);

		handler::complete(self, state, FLAGS.store_to_cache, wrapper).await
	}

	async fn poll_device_code(
		&self,
		ctx: &RequestContext,
		params: &AcquireTokenParameters,
		endpoints: &AuthorityEndpoints,
		device_code: &DeviceCodeResult,
	) -> Result<TokenResponse> {
		let mut interval = device_code.interval;

		loop {
			ctx.sleep(interval).await?;

			if OffsetDateTime::now_utc() >= device_code.expires_on {
				return Err(ClientError::DeviceCodeExpired.into());
			}

			let request = TokenRequest::new(DEVICE_CODE_GRANT)
				.param("device_code", device_code.device_code.expose());
			let err = match self
				.send_token_request::<TokenResponse>(ctx, params, &endpoints.token, request)
				.await
			{
				Ok(token) => return Ok(token),
				Err(e) => e,
			};

			if poll_step(err)? == PollStep::SlowDown {
				interval += self.device_code_policy.slow_down_increment;

				flow_event!(debug, "device code poll slowed down to {interval:?}");
			}
		}
	}
}
