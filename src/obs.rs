//! Optional observability helpers for acquisition flows.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `oauth2_acquire.flow` with the `flow`,
//!   `api_id`, and `correlation_id` fields, plus stage and cache events inside them.
//! - Enable `metrics` to increment `oauth2_acquire_flow_total` (labeled by `flow` + `outcome`) and
//!   `oauth2_acquire_cache_total` (labeled by `outcome`).

mod metrics;
mod tracing;

/// Emits a `tracing` event at the given level; compiles to a no-op without the feature.
macro_rules! flow_event {
	($level:ident, $($arg:tt)+) => {{
		#[cfg(feature = "tracing")]
		{
			::tracing::$level!($($arg)+);
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = format_args!($($arg)+);
		}
	}};
}
pub(crate) use flow_event;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Acquisition flow kinds, one per public entry point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Silent acquisition from cache, refresh token, or broker.
	Silent,
	/// Interactive authorization code flow.
	Interactive,
	/// Redemption of a caller-supplied refresh token.
	ByRefreshToken,
	/// Device authorization grant.
	DeviceCode,
	/// On-behalf-of (JWT bearer) exchange.
	OnBehalfOf,
	/// Client credentials grant.
	ClientCredentials,
	/// Resource owner password grant.
	UsernamePassword,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Silent => "silent",
			FlowKind::Interactive => "interactive",
			FlowKind::ByRefreshToken => "by_refresh_token",
			FlowKind::DeviceCode => "device_code",
			FlowKind::OnBehalfOf => "on_behalf_of",
			FlowKind::ClientCredentials => "client_credentials",
			FlowKind::UsernamePassword => "username_password",
		}
	}

	/// Telemetry API id sent in the `current`/`last` headers.
	pub const fn api_id(self) -> u16 {
		match self {
			FlowKind::ByRefreshToken => 1001,
			FlowKind::UsernamePassword => 1003,
			FlowKind::ClientCredentials => 1004,
			FlowKind::Interactive => 1005,
			FlowKind::OnBehalfOf => 1006,
			FlowKind::Silent => 1007,
			FlowKind::DeviceCode => 1008,
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
	/// Failure absorbed by serving an extended-lifetime token.
	StaleFallback,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
			FlowOutcome::StaleFallback => "stale_fallback",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
