//! Silent acquisition: cache, then refresh token, then broker, never the user.

// self
use crate::{
	_prelude::*,
	auth::AuthenticationResult,
	broker::BrokerMode,
	flows::{
		AcquireTokenParameters, Client,
		handler::{
			self, FlowFlags, FlowHooks, FlowState, HookFuture, PreTokenOutcome, PreTokenStep,
		},
	},
	http::TokenHttpClient,
	oauth::{TokenRequest, TransportErrorMapper},
	obs::FlowKind,
};

struct SilentFlow;
impl FlowHooks for SilentFlow {
	fn kind(&self) -> FlowKind {
		FlowKind::Silent
	}

	fn flags(&self) -> FlowFlags {
		FlowFlags {
			load_from_cache: true,
			store_to_cache: true,
			supports_adfs: true,
			requires_credential: false,
		}
	}

	fn broker_mode(&self) -> Option<BrokerMode> {
		Some(BrokerMode::Silent)
	}

	fn pre_token_request<'a>(
		&'a mut self,
		step: PreTokenStep<'a>,
	) -> HookFuture<'a, PreTokenOutcome> {
		let cause = step.state.captured.take();

		Box::pin(async move { Err(Error::silent_failed(cause)) })
	}

	fn token_request(&self, _state: &FlowState) -> Result<TokenRequest> {
		Err(Error::silent_failed(None))
	}
}

impl<C, M> Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Acquires a token without user interaction.
	///
	/// Serves an unexpired cached token, redeems a cached refresh token, or asks an invokable
	/// broker. Anything else fails with [`Error::SilentFailed`] carrying the refresh failure, if
	/// one happened; callers fall back to an interactive flow on that error.
	pub async fn acquire_token_silent(
		&self,
		params: AcquireTokenParameters,
	) -> Result<AuthenticationResult> {
		let ctx = params.context(FlowKind::Silent);
		let query = self.query(&params, params.scope.clone(), params.user_subject());

		handler::run(self, &mut SilentFlow, &params, query, &ctx).await
	}
}
