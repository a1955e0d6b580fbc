//! Per-request context threaded through every stage of an acquisition.

// crates.io
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	error::ClientError,
	obs::{FlowKind, FlowSpan},
};

/// Correlation id, span, telemetry api id, and cancellation signal for one logical request.
///
/// Built once per acquisition and passed by reference; never shared across requests.
#[derive(Clone, Debug)]
pub struct RequestContext {
	correlation_id: Uuid,
	kind: FlowKind,
	span: FlowSpan,
	cancellation: CancellationToken,
}
impl RequestContext {
	/// Creates a context with a random correlation id and a fresh cancellation token.
	pub fn new(kind: FlowKind) -> Self {
		Self::with_parts(kind, None, None)
	}

	/// Creates a context from optional caller-supplied parts.
	pub fn with_parts(
		kind: FlowKind,
		correlation_id: Option<Uuid>,
		cancellation: Option<CancellationToken>,
	) -> Self {
		let correlation_id = correlation_id.unwrap_or_else(Uuid::new_v4);

		Self {
			correlation_id,
			kind,
			span: FlowSpan::new(kind, correlation_id),
			cancellation: cancellation.unwrap_or_default(),
		}
	}

	/// Correlation id sent as `client-request-id` and recorded in telemetry.
	pub fn correlation_id(&self) -> Uuid {
		self.correlation_id
	}

	/// Flow kind (telemetry api id source).
	pub fn kind(&self) -> FlowKind {
		self.kind
	}

	/// Span used as the request's logger.
	pub fn span(&self) -> &FlowSpan {
		&self.span
	}

	/// Cancellation token observed by network, broker, UI, and polling awaits.
	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancellation
	}

	/// Returns `true` once cancellation was requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancellation.is_cancelled()
	}

	/// Drives `fut` unless cancellation fires first.
	pub async fn cancellable<T, Fut>(&self, fut: Fut) -> Result<T>
	where
		Fut: Future<Output = Result<T>>,
	{
		tokio::select! {
			biased;
			_ = self.cancellation.cancelled() => Err(ClientError::Cancelled.into()),
			result = fut => result,
		}
	}

	/// Sleeps for `delay` unless cancellation fires first.
	pub async fn sleep(&self, delay: std::time::Duration) -> Result<()> {
		self.cancellable(async move {
			tokio::time::sleep(delay).await;

			Ok(())
		})
		.await
	}
}
