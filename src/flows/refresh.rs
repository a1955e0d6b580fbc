//! Redemption of a caller-supplied refresh token.

// self
use crate::{
	_prelude::*,
	auth::{AuthenticationResult, ResultWrapper, Subject, TokenSecret},
	error::ClientError,
	flows::{
		AcquireTokenParameters, Client,
		handler::{self, FlowFlags, FlowHooks, FlowState},
	},
	http::TokenHttpClient,
	oauth::{TokenRequest, TransportErrorMapper},
	obs::FlowKind,
};

struct ByRefreshTokenFlow {
	refresh_token: TokenSecret,
}
impl FlowHooks for ByRefreshTokenFlow {
	fn kind(&self) -> FlowKind {
		FlowKind::ByRefreshToken
	}

	fn flags(&self) -> FlowFlags {
		FlowFlags {
			load_from_cache: false,
			store_to_cache: true,
			supports_adfs: true,
			requires_credential: false,
		}
	}

	fn validate(&self) -> Result<(), ClientError> {
		if self.refresh_token.expose().trim().is_empty() {
			return Err(ClientError::MissingParameter { name: "refresh_token" });
		}

		Ok(())
	}

	fn token_request(&self, state: &FlowState) -> Result<TokenRequest> {
		Ok(handler::refresh_request(self.refresh_token.expose(), &state.query.scope))
	}

	fn post_token_request(&self, _state: &FlowState, wrapper: &mut ResultWrapper) -> Result<()> {
		if wrapper.refresh_token.is_none() {
			wrapper.refresh_token = Some(self.refresh_token.clone());
		}

		Ok(())
	}
}

impl<C, M> Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Redeems `refresh_token` (for example one migrated from another library) and caches the
	/// result under the user the identity provider returns.
	pub async fn acquire_token_by_refresh_token(
		&self,
		params: AcquireTokenParameters,
		refresh_token: impl Into<String>,
	) -> Result<AuthenticationResult> {
		let ctx = params.context(FlowKind::ByRefreshToken);
		let query = self.query(&params, params.scope.clone(), Subject::user(None, None));
		let mut hooks = ByRefreshTokenFlow { refresh_token: TokenSecret::new(refresh_token) };

		handler::run(self, &mut hooks, &params, query, &ctx).await
	}
}
