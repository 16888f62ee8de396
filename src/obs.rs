//! Optional observability helpers for token acquisition flows.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `token_broker.acquire` with the `server`,
//!   `flavor`, and `stage` fields.
//! - Enable `metrics` to increment the `token_broker_acquire_total` counter for every
//!   attempt/success/failure, labeled by `flavor` + `outcome`.
//!
//! Span and metric fields never carry secret material; tokens appear only as fingerprints.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Outcome labels recorded for each acquisition attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AcquireOutcome {
	/// Entry to the refresh path.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl AcquireOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			AcquireOutcome::Attempt => "attempt",
			AcquireOutcome::Success => "success",
			AcquireOutcome::Failure => "failure",
		}
	}
}
impl Display for AcquireOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
