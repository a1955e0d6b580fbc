// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::ScopeSet, error::ClientError};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Supported PKCE challenge methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Inputs of the authorize URL beyond the endpoint and the generated secrets.
#[derive(Clone, Debug)]
pub(crate) struct AuthorizeUrlParts<'a> {
	pub(crate) client_id: &'a str,
	pub(crate) redirect_uri: &'a Url,
	pub(crate) scope: &'a ScopeSet,
	pub(crate) login_hint: Option<&'a str>,
	pub(crate) prompt: Option<&'a str>,
	pub(crate) claims: Option<&'a str>,
	pub(crate) extra_query_parameters: &'a BTreeMap<String, String>,
}

/// One authorization round trip: the authorize URL plus the secrets needed to redeem its code.
#[derive(Clone)]
pub(crate) struct AuthorizationSession {
	pub(crate) state: String,
	pub(crate) authorize_url: Url,
	pkce: PkcePair,
}
impl AuthorizationSession {
	pub(crate) fn start(authorization_endpoint: &Url, parts: &AuthorizeUrlParts<'_>) -> Self {
		let state = random_string(STATE_LEN);
		let pkce = PkcePair::generate();
		let authorize_url = build_authorize_url(authorization_endpoint, parts, &state, &pkce);

		Self { state, authorize_url, pkce }
	}

	pub(crate) fn code_verifier(&self) -> &str {
		&self.pkce.verifier
	}

	/// Validates the returned `state` parameter after the authorization redirect.
	pub(crate) fn validate_state(&self, returned_state: Option<&str>) -> Result<(), ClientError> {
		if returned_state == Some(self.state.as_str()) {
			Ok(())
		} else {
			Err(ClientError::AuthorizationStateMismatch)
		}
	}
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("state", &self.state)
			.field("authorize_url", &self.authorize_url)
			.field("code_challenge", &self.pkce.challenge)
			.field("code_challenge_method", &self.pkce.method)
			.finish()
	}
}

#[derive(Clone)]
struct PkcePair {
	verifier: String,
	challenge: String,
	method: PkceCodeChallengeMethod,
}
impl PkcePair {
	fn generate() -> Self {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		Self { verifier, challenge, method: PkceCodeChallengeMethod::S256 }
	}
}

fn build_authorize_url(
	endpoint: &Url,
	parts: &AuthorizeUrlParts<'_>,
	state: &str,
	pkce: &PkcePair,
) -> Url {
	let mut url = endpoint.clone();
	let mut pairs = url.query_pairs_mut();

	pairs.append_pair("response_type", "code");
	pairs.append_pair("client_id", parts.client_id);
	pairs.append_pair("redirect_uri", parts.redirect_uri.as_str());
	pairs.append_pair("scope", &parts.scope.normalized());
	pairs.append_pair("state", state);
	pairs.append_pair("code_challenge", &pkce.challenge);
	pairs.append_pair("code_challenge_method", pkce.method.as_str());
	pairs.append_pair("client_info", "1");

	if let Some(login_hint) = parts.login_hint {
		pairs.append_pair("login_hint", login_hint);
	}
	if let Some(prompt) = parts.prompt {
		pairs.append_pair("prompt", prompt);
	}
	if let Some(claims) = parts.claims {
		pairs.append_pair("claims", claims);
	}

	pairs.extend_pairs(parts.extra_query_parameters.iter());

	drop(pairs);

	url
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
