//! Server telemetry headers attached to every token endpoint request.
//!
//! The `current` header describes the request being sent; the `last` header reports what
//! happened since the previous successful token endpoint response: how many silent calls were
//! served from the cache and which calls failed with which error code.

// self
use crate::{_prelude::*, obs::FlowKind};

/// Header describing the request being sent.
pub const CURRENT_HEADER: &str = "x-client-current-telemetry";
/// Header describing failures since the last successful token endpoint response.
pub const LAST_HEADER: &str = "x-client-last-telemetry";
/// Wire schema version prefix.
pub const SCHEMA_VERSION: u8 = 2;
/// Upper bound for the `last` header value in bytes.
pub const MAX_LAST_HEADER_BYTES: usize = 3800;

/// One failed request awaiting report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedRequest {
	/// Telemetry API id of the failing call.
	pub api_id: u16,
	/// Correlation id of the failing call.
	pub correlation_id: Uuid,
	/// Error code reported by the failure.
	pub error: String,
}

#[derive(Debug, Default)]
struct TelemetryState {
	silent_successes: u32,
	failed: VecDeque<FailedRequest>,
}

/// Accumulates telemetry between token endpoint calls; shared by every request of one client.
#[derive(Debug, Default)]
pub struct TelemetryRecorder {
	state: Mutex<TelemetryState>,
}
impl TelemetryRecorder {
	/// Formats `2|{api_id},{force_refresh}|`.
	pub fn current_header(kind: FlowKind, force_refresh: bool) -> String {
		format!("{SCHEMA_VERSION}|{},{}|", kind.api_id(), u8::from(force_refresh))
	}

	/// Formats `2|{silent_count}|{api_id},{correlation_id},...|{error},...|`, dropping the oldest
	/// failures until the value fits [`MAX_LAST_HEADER_BYTES`].
	pub fn last_header(&self) -> String {
		let mut state = self.state.lock();

		loop {
			let header = Self::format_last(&state);

			if header.len() <= MAX_LAST_HEADER_BYTES || state.failed.is_empty() {
				return header;
			}

			state.failed.pop_front();
		}
	}

	fn format_last(state: &TelemetryState) -> String {
		let calls = state
			.failed
			.iter()
			.map(|f| format!("{},{}", f.api_id, f.correlation_id))
			.collect::<Vec<_>>()
			.join(",");
		let errors = state.failed.iter().map(|f| f.error.as_str()).collect::<Vec<_>>().join(",");

		format!("{SCHEMA_VERSION}|{}|{calls}|{errors}|", state.silent_successes)
	}

	/// Returns both header name/value pairs for a request.
	pub fn headers(&self, kind: FlowKind, force_refresh: bool) -> [(&'static str, String); 2] {
		[
			(CURRENT_HEADER, Self::current_header(kind, force_refresh)),
			(LAST_HEADER, self.last_header()),
		]
	}

	/// Counts a silent call answered from the cache.
	pub fn record_silent_success(&self) {
		let mut state = self.state.lock();

		state.silent_successes = state.silent_successes.saturating_add(1);
	}

	/// Appends a failed call.
	pub fn record_failure(&self, kind: FlowKind, correlation_id: Uuid, error: impl Into<String>) {
		let mut error = error.into();

		// Separators must not leak into the wire format.
		error.retain(|c| c != ',' && c != '|');

		self.state.lock().failed.push_back(FailedRequest {
			api_id: kind.api_id(),
			correlation_id,
			error,
		});
	}

	/// Clears pending data after a successful token endpoint response.
	pub fn record_success(&self) {
		let mut state = self.state.lock();

		state.silent_successes = 0;
		state.failed.clear();
	}

	/// Number of failures awaiting report.
	pub fn pending_failures(&self) -> usize {
		self.state.lock().failed.len()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn current_header_encodes_api_id_and_force_refresh() {
		assert_eq!(TelemetryRecorder::current_header(FlowKind::Silent, false), "2|1007,0|");
		assert_eq!(TelemetryRecorder::current_header(FlowKind::DeviceCode, true), "2|1008,1|");
	}

	#[test]
	fn last_header_lists_failures_in_order() {
		let recorder = TelemetryRecorder::default();
		let first = Uuid::new_v4();
		let second = Uuid::new_v4();

		recorder.record_failure(FlowKind::Silent, first, "invalid_grant");
		recorder.record_failure(FlowKind::Silent, second, "interaction_required");

		assert_eq!(
			recorder.last_header(),
			format!("2|0|1007,{first},1007,{second}|invalid_grant,interaction_required|")
		);
	}

	#[test]
	fn success_clears_pending_data() {
		let recorder = TelemetryRecorder::default();

		recorder.record_silent_success();
		recorder.record_silent_success();
		recorder.record_failure(FlowKind::Interactive, Uuid::nil(), "access_denied");

		assert!(recorder.last_header().starts_with("2|2|1005,"));

		recorder.record_success();

		assert_eq!(recorder.last_header(), "2|0|||");
	}

	#[test]
	fn oversized_headers_drop_the_oldest_failures() {
		let recorder = TelemetryRecorder::default();
		let oldest = Uuid::new_v4();

		recorder.record_failure(FlowKind::Silent, oldest, "first_error");

		for _ in 0..200 {
			recorder.record_failure(FlowKind::Silent, Uuid::new_v4(), "invalid_grant");
		}

		let header = recorder.last_header();

		assert!(header.len() <= MAX_LAST_HEADER_BYTES);
		assert!(!header.contains(&oldest.to_string()));
		assert!(recorder.pending_failures() < 201);
	}
}
