//! Interactive authorization code flow with PKCE.
//!
//! The authorize URL is handed to a caller-provided [`WebUi`]; the returned code is redeemed at
//! the token endpoint. When the cache already knows the user, its refresh token travels to the
//! UI as the [`SSO_REFRESH_TOKEN_HEADER`] so the identity provider can skip the credential
//! prompt.

mod session;

// self
use crate::{
	_prelude::*,
	auth::{AuthenticationResult, ResultWrapper},
	broker::BrokerMode,
	cache::CacheNotificationArgs,
	error::{ClientError, ServiceError},
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
use session::{AuthorizationSession, AuthorizeUrlParts};

/// Header carrying a cached refresh token to the authorization UI.
pub const SSO_REFRESH_TOKEN_HEADER: &str = "x-ms-sso-RefreshToken";

/// Boxed future returned by [`WebUi::acquire_authorization`].
pub type WebUiFuture<'a> = Pin<Box<dyn Future<Output = Result<AuthorizationResult>> + 'a + Send>>;

/// Authorization user interface (system browser, embedded view, test double).
pub trait WebUi
where
	Self: Send + Sync,
{
	/// Navigates to `request.url` and resolves once the redirect URI is reached.
	fn acquire_authorization<'a>(&'a self, request: &'a AuthorizationRequest) -> WebUiFuture<'a>;
}

/// Navigation handed to the [`WebUi`].
#[derive(Clone)]
pub struct AuthorizationRequest {
	/// Authorize URL including PKCE challenge and state.
	pub url: Url,
	/// Redirect URI that ends the navigation.
	pub redirect_uri: Url,
	/// Extra headers for the first navigation.
	pub headers: Vec<(String, String)>,
}
impl AuthorizationRequest {
	/// Value of header `name` (case-insensitive).
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}
}
impl Debug for AuthorizationRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let headers = self.headers.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>();

		f.debug_struct("AuthorizationRequest")
			.field("url", &self.url)
			.field("redirect_uri", &self.redirect_uri)
			.field("headers", &headers)
			.finish()
	}
}

/// Outcome of the authorization navigation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthorizationResult {
	/// Redirect carried an authorization code.
	Code {
		/// Authorization code.
		code: String,
		/// Echoed `state`.
		state: Option<String>,
	},
	/// Redirect carried an OAuth error.
	Failed {
		/// OAuth `error`.
		error: String,
		/// OAuth `error_description`.
		description: Option<String>,
	},
	/// Identity provider asked for a native broker to complete sign-in.
	BrokerRequired,
	/// User closed the UI.
	Cancelled,
}

/// Inputs specific to the interactive flow.
#[derive(Clone, Debug)]
pub struct InteractiveParameters {
	/// Redirect URI registered for the application; must not carry a fragment.
	pub redirect_uri: Url,
	/// OIDC `prompt` value.
	pub prompt: Option<String>,
}
impl InteractiveParameters {
	/// Parameters for `redirect_uri`.
	pub fn new(redirect_uri: Url) -> Self {
		Self { redirect_uri, prompt: None }
	}

	/// Sets the OIDC `prompt` value.
	pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
		self.prompt = Some(prompt.into());

		self
	}
}

struct InteractiveFlow {
	interactive: InteractiveParameters,
	web_ui: Arc<dyn WebUi>,
	redeem: Option<(AuthorizationSession, String)>,
}
impl InteractiveFlow {
	async fn authorize(&mut self, step: PreTokenStep<'_>) -> Result<PreTokenOutcome> {
		let query = &step.state.query;
		let access = step.cache.begin_access(CacheNotificationArgs::for_query(query)).await?;
		let sso_refresh_token = access.find_refresh_token(query);

		access.finish()?;

		let scope = step.params.scope.with_oidc_scopes();
		let session = AuthorizationSession::start(
			&step.endpoints.authorization,
			&AuthorizeUrlParts {
				client_id: step.client_id,
				redirect_uri: &self.interactive.redirect_uri,
				scope: &scope,
				login_hint: query.subject.displayable_id.as_deref(),
				prompt: self.interactive.prompt.as_deref(),
				claims: step.params.claims.as_deref(),
				extra_query_parameters: &step.params.extra_query_parameters,
			},
		);
		let request = AuthorizationRequest {
			url: session.authorize_url.clone(),
			redirect_uri: self.interactive.redirect_uri.clone(),
			headers: sso_refresh_token
				.map(|token| vec![(SSO_REFRESH_TOKEN_HEADER.to_owned(), token)])
				.unwrap_or_default(),
		};
		let outcome = step.ctx.cancellable(self.web_ui.acquire_authorization(&request)).await?;

		match outcome {
			AuthorizationResult::Code { code, state } => {
				session.validate_state(state.as_deref())?;

				self.redeem = Some((session, code));

				Ok(PreTokenOutcome::Continue)
			},
			AuthorizationResult::Failed { error, description } =>
				Err(ServiceError { description, ..ServiceError::new(error, None) }.into()),
			AuthorizationResult::BrokerRequired =>
				Ok(PreTokenOutcome::UseBroker(BrokerMode::Interactive)),
			AuthorizationResult::Cancelled => Err(ClientError::Cancelled.into()),
		}
	}
}
impl FlowHooks for InteractiveFlow {
	fn kind(&self) -> FlowKind {
		FlowKind::Interactive
	}

	fn flags(&self) -> FlowFlags {
		FlowFlags {
			load_from_cache: false,
			store_to_cache: true,
			supports_adfs: true,
			requires_credential: false,
		}
	}

	fn broker_mode(&self) -> Option<BrokerMode> {
		Some(BrokerMode::Interactive)
	}

	fn validate(&self) -> Result<(), ClientError> {
		if self.interactive.redirect_uri.fragment().is_some() {
			return Err(ClientError::RedirectUriHasFragment);
		}

		Ok(())
	}

	fn pre_token_request<'a>(
		&'a mut self,
		step: PreTokenStep<'a>,
	) -> HookFuture<'a, PreTokenOutcome> {
		Box::pin(self.authorize(step))
	}

	fn token_request(&self, state: &FlowState) -> Result<TokenRequest> {
		let (session, code) =
			self.redeem.as_ref().ok_or(ClientError::MissingParameter { name: "code" })?;

		Ok(TokenRequest::new("authorization_code")
			.param("code", code.as_str())
			.param("code_verifier", session.code_verifier())
			.param("redirect_uri", self.interactive.redirect_uri.as_str())
			.scope(&state.query.scope.with_oidc_scopes())
			.param("client_info", "1"))
	}

	fn post_token_request(&self, state: &FlowState, wrapper: &mut ResultWrapper) -> Result<()> {
		let requested = state.query.subject.unique_id.as_deref();
		let returned =
			wrapper.result.user.as_ref().and_then(|user| user.unique_id.as_deref());

		if let (Some(requested), Some(returned)) = (requested, returned)
			&& requested != returned
		{
			return Err(ClientError::UserMismatch {
				requested: requested.to_owned(),
				returned: returned.to_owned(),
			}
			.into());
		}

		Ok(())
	}
}

impl<C, M> Client<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Acquires a token by letting the user sign in through `web_ui`.
	///
	/// An invokable broker takes over the whole interaction. Otherwise the cache is never read
	/// for tokens, only for the single sign-on hint of a known account.
	pub async fn acquire_token_interactive(
		&self,
		params: AcquireTokenParameters,
		interactive: InteractiveParameters,
		web_ui: Arc<dyn WebUi>,
	) -> Result<AuthenticationResult> {
		let ctx = params.context(FlowKind::Interactive);
		let query = self.query(&params, params.scope.clone(), params.user_subject());
		let mut hooks = InteractiveFlow { interactive, web_ui, redeem: None };

		handler::run(self, &mut hooks, &params, query, &ctx).await
	}
}
