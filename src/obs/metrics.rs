// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::obs::{FlowKind, FlowOutcome};

/// Outcome counters for the acquisitions run by one [`Client`](crate::flows::Client).
///
/// With the `metrics` feature every recorded outcome is also forwarded to the global recorder
/// as `oauth2_acquire_flow_total{flow, outcome}`.
#[derive(Debug, Default)]
pub struct FlowMetrics {
	attempts: AtomicU64,
	successes: AtomicU64,
	failures: AtomicU64,
	stale_fallbacks: AtomicU64,
}
impl FlowMetrics {
	/// Acquisitions started.
	pub fn attempts(&self) -> u64 {
		self.attempts.load(Ordering::Relaxed)
	}

	/// Acquisitions that returned a token.
	pub fn successes(&self) -> u64 {
		self.successes.load(Ordering::Relaxed)
	}

	/// Acquisitions that surfaced an error.
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	/// Failures absorbed by serving an extended-lifetime token.
	pub fn stale_fallbacks(&self) -> u64 {
		self.stale_fallbacks.load(Ordering::Relaxed)
	}

	pub(crate) fn record(&self, kind: FlowKind, outcome: FlowOutcome) {
		let counter = match outcome {
			FlowOutcome::Attempt => &self.attempts,
			FlowOutcome::Success => &self.successes,
			FlowOutcome::Failure => &self.failures,
			FlowOutcome::StaleFallback => &self.stale_fallbacks,
		};

		counter.fetch_add(1, Ordering::Relaxed);

		#[cfg(feature = "metrics")]
		{
			metrics::counter!(
				"oauth2_acquire_flow_total",
				"flow" => kind.as_str(),
				"outcome" => outcome.as_str()
			)
			.increment(1);
		}
		#[cfg(not(feature = "metrics"))]
		{
			let _ = kind;
		}
	}
}

/// Records a cache lookup outcome (`hit`, `refresh`, `miss`, `stale_fallback`).
pub fn record_cache_lookup(outcome: &'static str) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("oauth2_acquire_cache_total", "outcome" => outcome).increment(1);
	}
	#[cfg(not(feature = "metrics"))]
	{
		let _ = outcome;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn outcomes_land_in_their_own_counter() {
		let metrics = FlowMetrics::default();

		metrics.record(FlowKind::Silent, FlowOutcome::Attempt);
		metrics.record(FlowKind::Silent, FlowOutcome::Attempt);
		metrics.record(FlowKind::Silent, FlowOutcome::StaleFallback);
		metrics.record(FlowKind::ClientCredentials, FlowOutcome::Failure);
		record_cache_lookup("miss");

		assert_eq!(metrics.attempts(), 2);
		assert_eq!(metrics.successes(), 0);
		assert_eq!(metrics.failures(), 1);
		assert_eq!(metrics.stale_fallbacks(), 1);
	}
}
