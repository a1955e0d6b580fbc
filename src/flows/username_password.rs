//! Resource owner password credentials grant.

// self
use crate::{
	_prelude::*,
	auth::{AuthenticationResult, Subject, TokenSecret},
	error::ClientError,
	flows::{
		AcquireTokenParameters, Client,
		handler::{self, FlowFlags, FlowHooks, FlowState},
	},
	http::TokenHttpClient,
	oauth::{TokenRequest, TransportErrorMapper},
	obs::FlowKind,
};

struct UsernamePasswordFlow {
	username: String,
	password: TokenSecret,
}
impl FlowHooks for UsernamePasswordFlow {
	fn kind(&self) -> FlowKind {
		FlowKind::UsernamePassword
	}

	fn flags(&self) -> FlowFlags {
		FlowFlags {
			load_from_cache: true,
			store_to_cache: true,
			supports_adfs: true,
			requires_credential: false,
		}
	}

	fn validate(&self) -> Result<(), ClientError> {
		if self.username.trim().is_empty() {
			return Err(ClientError::MissingParameter { name: "username" });
		}
		if self.password.is_empty() {
			return Err(ClientError::MissingParameter { name: "password" });
		}

		Ok(())
	}

	fn token_request(&self, state: &FlowState) -> Result<TokenRequest> {
		Ok(TokenRequest::new("password")
			.param("username", self.username.as_str())
			.param("password", self.password.expose())
			.scope(&state.query.scope.with_oidc_scopes())
			.param("client_info", "1"))
	}
}

impl<C, M> Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Acquires a token with the user's password.
	///
	/// The cache is consulted first for tokens of the user whose displayable id is `username`.
	pub async fn acquire_token_by_username_password(
		&self,
		params: AcquireTokenParameters,
		username: impl Into<String>,
		password: impl Into<String>,
	) -> Result<AuthenticationResult> {
		let username = username.into();
		let ctx = params.context(FlowKind::UsernamePassword);
		let query = self.query(
			&params,
			params.scope.clone(),
			Subject::user(None, Some(username.clone())),
		);
		let mut hooks = UsernamePasswordFlow { username, password: TokenSecret::new(password) };

		handler::run(self, &mut hooks, &params, query, &ctx).await
	}
}
