// self
use crate::{
	config::ProviderKind,
	obs::AcquireOutcome,
};

/// Records an acquisition outcome via the global metrics recorder (when enabled).
pub fn record_acquire_outcome(flavor: ProviderKind, outcome: AcquireOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"token_broker_acquire_total",
			"flavor" => flavor.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (flavor, outcome);
	}
}
