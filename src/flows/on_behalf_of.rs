//! On-behalf-of exchange: a middle tier trades the caller's assertion for a downstream token.

// self
use crate::{
	_prelude::*,
	auth::{AuthenticationResult, Subject, SubjectType, TokenSecret},
	error::ClientError,
	flows::{
		AcquireTokenParameters, Client,
		handler::{self, FlowFlags, FlowHooks, FlowState},
	},
	http::TokenHttpClient,
	oauth::{TokenRequest, TransportErrorMapper},
	obs::FlowKind,
};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

struct OnBehalfOfFlow {
	assertion: TokenSecret,
}
impl FlowHooks for OnBehalfOfFlow {
	fn kind(&self) -> FlowKind {
		FlowKind::OnBehalfOf
	}

	fn flags(&self) -> FlowFlags {
		FlowFlags {
			load_from_cache: true,
			store_to_cache: true,
			supports_adfs: false,
			requires_credential: true,
		}
	}

	fn validate(&self) -> Result<(), ClientError> {
		if self.assertion.is_empty() {
			return Err(ClientError::MissingParameter { name: "assertion" });
		}

		Ok(())
	}

	fn token_request(&self, state: &FlowState) -> Result<TokenRequest> {
		Ok(TokenRequest::new(JWT_BEARER_GRANT)
			.param("assertion", self.assertion.expose())
			.param("requested_token_use", "on_behalf_of")
			.scope(&state.query.scope.with_oidc_scopes())
			.param("client_info", "1"))
	}
}

/// Cache subject for tokens obtained on behalf of the holder of `assertion`.
pub(crate) fn assertion_subject(assertion: &TokenSecret) -> Subject {
	Subject {
		kind: SubjectType::UserPlusClient,
		assertion_hash: Some(assertion.fingerprint()),
		..Default::default()
	}
}

impl<C, M> Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Exchanges the incoming `assertion` for a token to a downstream API.
	///
	/// Results are cached under the assertion's hash, so a repeated call with the same incoming
	/// token is served from the cache (or its refresh token) without another exchange.
	pub async fn acquire_token_on_behalf_of(
		&self,
		params: AcquireTokenParameters,
		assertion: impl Into<String>,
	) -> Result<AuthenticationResult> {
		let assertion = TokenSecret::new(assertion);
		let ctx = params.context(FlowKind::OnBehalfOf);
		let query = self.query(&params, params.scope.clone(), assertion_subject(&assertion));
		let mut hooks = OnBehalfOfFlow { assertion };

		handler::run(self, &mut hooks, &params, query, &ctx).await
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn subjects_differ_per_assertion() {
		let first = assertion_subject(&TokenSecret::new("header.payload-a.sig"));
		let second = assertion_subject(&TokenSecret::new("header.payload-b.sig"));

		assert_eq!(first.kind, SubjectType::UserPlusClient);
		assert!(first.selects(&first));
		assert!(!first.selects(&second));
	}
}
