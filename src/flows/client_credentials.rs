//! Client credentials grant: application tokens cached under the `Client` subject.

// self
use crate::{
	_prelude::*,
	auth::{AuthenticationResult, Subject},
	flows::{
		AcquireTokenParameters, Client,
		handler::{self, FlowFlags, FlowHooks, FlowState},
	},
	http::TokenHttpClient,
	oauth::{TokenRequest, TransportErrorMapper},
	obs::FlowKind,
};

struct ClientCredentialsFlow;
impl FlowHooks for ClientCredentialsFlow {
	fn kind(&self) -> FlowKind {
		FlowKind::ClientCredentials
	}

	fn flags(&self) -> FlowFlags {
		FlowFlags {
			load_from_cache: true,
			store_to_cache: true,
			supports_adfs: true,
			requires_credential: true,
		}
	}

	fn token_request(&self, state: &FlowState) -> Result<TokenRequest> {
		Ok(TokenRequest::new("client_credentials").scope(&state.query.scope))
	}
}

impl<C, M> Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Acquires an application token with the client's own credential.
	///
	/// Cached tokens are reused until they enter the expiry margin; application tokens never
	/// carry a refresh token.
	pub async fn acquire_token_for_client(
		&self,
		params: AcquireTokenParameters,
	) -> Result<AuthenticationResult> {
		let ctx = params.context(FlowKind::ClientCredentials);
		let query = self.query(&params, params.scope.clone(), Subject::client());

		handler::run(self, &mut ClientCredentialsFlow, &params, query, &ctx).await
	}
}
