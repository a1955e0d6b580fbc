//! Authority metadata resolution.
//!
//! Instance discovery and OpenID metadata fetches are external collaborators; the crate only
//! needs the three endpoints a flow talks to. [`DefaultAuthorityResolver`] derives them from the
//! well-known path layout of each authority type.

// self
use crate::{
	_prelude::*,
	authority::{Authority, AuthorityType},
	error::ConfigError,
};

/// Boxed future returned by [`AuthorityResolver::resolve`].
pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<AuthorityEndpoints>> + 'a + Send>>;

/// Endpoints a flow needs for one authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityEndpoints {
	/// Token endpoint.
	pub token: Url,
	/// Authorization endpoint used by interactive flows.
	pub authorization: Url,
	/// Device authorization endpoint.
	pub device_code: Url,
}

/// Resolves authority metadata; runs once per request during `PreRun`.
pub trait AuthorityResolver
where
	Self: Send + Sync,
{
	/// Resolves the endpoints for `authority`.
	fn resolve<'a>(&'a self, authority: &'a Authority) -> ResolveFuture<'a>;
}

/// Derives endpoints from the authority URL without any network round trip.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultAuthorityResolver;
impl DefaultAuthorityResolver {
	/// Computes the endpoints synchronously.
	pub fn endpoints_for(authority: &Authority) -> Result<AuthorityEndpoints> {
		let base = match authority.kind() {
			AuthorityType::Adfs => format!("https://{}/adfs/oauth2/", authority.environment()),
			AuthorityType::Aad | AuthorityType::B2c => format!("{}oauth2/v2.0/", authority.as_str()),
		};
		let join = |path: &str| {
			Url::parse(&format!("{base}{path}"))
				.map_err(|source| Error::from(ConfigError::InvalidEndpoint { source }))
		};

		Ok(AuthorityEndpoints {
			token: join("token")?,
			authorization: join("authorize")?,
			device_code: join("devicecode")?,
		})
	}
}
impl AuthorityResolver for DefaultAuthorityResolver {
	fn resolve<'a>(&'a self, authority: &'a Authority) -> ResolveFuture<'a> {
		Box::pin(async move { Self::endpoints_for(authority) })
	}
}

/// Routes every authority to a fixed endpoint set (private clouds, proxies, tests).
#[derive(Clone, Debug)]
pub struct StaticAuthorityResolver {
	endpoints: AuthorityEndpoints,
}
impl StaticAuthorityResolver {
	/// Creates a resolver that always returns `endpoints`.
	pub fn new(endpoints: AuthorityEndpoints) -> Self {
		Self { endpoints }
	}
}
impl AuthorityResolver for StaticAuthorityResolver {
	fn resolve<'a>(&'a self, _authority: &'a Authority) -> ResolveFuture<'a> {
		let endpoints = self.endpoints.clone();

		Box::pin(async move { Ok(endpoints) })
	}
}
