//! Sliding-window request rate limiting keyed by client identifier.
//!
//! Exact counting over a trailing window via a per-client timestamp log: no fixed-window
//! boundary bursts, at the cost of O(window) memory per client. Denial is a pure boolean
//! signal; emitting the HTTP 429 and the security-event log entry is the caller's job.

// std
use std::collections::VecDeque;
// self
use crate::{_prelude::*, ids::ClientKey};

/// Default cap on requests per client within one window.
pub const DEFAULT_MAX_REQUESTS: usize = 10;
/// Default trailing window length.
pub const DEFAULT_WINDOW: Duration = Duration::seconds(60);

/// Global limiter policy applied to every client identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RatePolicy {
	/// Maximum requests a client may issue within the trailing window.
	pub max_requests: usize,
	/// Trailing window length.
	pub window: Duration,
}
impl Default for RatePolicy {
	fn default() -> Self {
		Self { max_requests: DEFAULT_MAX_REQUESTS, window: DEFAULT_WINDOW }
	}
}

// Retained request instants for one client, oldest first. After a check completes the log never
// holds more than `max_requests` entries: an overflowing request is rejected, not recorded.
#[derive(Debug, Default)]
struct RateWindow {
	hits: VecDeque<OffsetDateTime>,
}
impl RateWindow {
	fn check(&mut self, policy: &RatePolicy, now: OffsetDateTime) -> bool {
		let cutoff = now - policy.window;

		while self.hits.front().is_some_and(|hit| *hit <= cutoff) {
			self.hits.pop_front();
		}

		if self.hits.len() < policy.max_requests {
			self.hits.push_back(now);

			true
		} else {
			false
		}
	}
}

/// Sliding-window rate limiter with fine-grained per-client locking.
///
/// The shared map is read-locked on the hot path; each client's log sits behind its own mutex
/// so concurrent checks for different clients never contend.
#[derive(Debug)]
pub struct RateLimiter {
	policy: RatePolicy,
	windows: RwLock<HashMap<ClientKey, Arc<Mutex<RateWindow>>>>,
}
impl RateLimiter {
	/// Creates a limiter with the provided policy.
	pub fn new(policy: RatePolicy) -> Self {
		Self { policy, windows: RwLock::new(HashMap::new()) }
	}

	/// Checks and records a request for `client` against the current clock.
	pub fn allow(&self, client: &ClientKey) -> bool {
		self.allow_at(client, OffsetDateTime::now_utc())
	}

	/// Checks and records a request for `client` as of `now`.
	pub fn allow_at(&self, client: &ClientKey, now: OffsetDateTime) -> bool {
		let window = {
			let windows = self.windows.read();

			windows.get(client).cloned()
		};
		let window = window.unwrap_or_else(|| {
			self.windows.write().entry(client.clone()).or_default().clone()
		});

		window.lock().check(&self.policy, now)
	}

	/// Drops clients whose logs hold no request newer than `now − window`.
	///
	/// Long-running deployments call this periodically to bound memory across churning client
	/// populations; correctness never depends on it.
	pub fn forget_idle(&self, now: OffsetDateTime) {
		let cutoff = now - self.policy.window;

		self.windows
			.write()
			.retain(|_, window| window.lock().hits.back().is_some_and(|hit| *hit > cutoff));
	}

	/// Number of client identifiers currently tracked.
	pub fn tracked_clients(&self) -> usize {
		self.windows.read().len()
	}

	/// The limiter's policy.
	pub fn policy(&self) -> &RatePolicy {
		&self.policy
	}
}
impl Default for RateLimiter {
	fn default() -> Self {
		Self::new(RatePolicy::default())
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn client(value: &str) -> ClientKey {
		ClientKey::new(value).expect("Client fixture should be valid.")
	}

	#[test]
	fn limit_is_exact_within_the_window() {
		let limiter = RateLimiter::default();
		let caller = client("10.1.2.3");
		let start = macros::datetime!(2025-06-01 12:00 UTC);

		for i in 0..10 {
			assert!(
				limiter.allow_at(&caller, start + Duration::seconds(i)),
				"Request {i} should be allowed.",
			);
		}

		assert!(!limiter.allow_at(&caller, start + Duration::seconds(10)));
	}

	#[test]
	fn window_slides_past_old_requests() {
		let limiter = RateLimiter::default();
		let caller = client("10.1.2.4");
		let start = macros::datetime!(2025-06-01 12:00 UTC);

		for _ in 0..10 {
			assert!(limiter.allow_at(&caller, start));
		}

		assert!(!limiter.allow_at(&caller, start + Duration::seconds(59)));
		assert!(limiter.allow_at(&caller, start + Duration::seconds(61)));
	}

	#[test]
	fn denied_requests_do_not_extend_the_window() {
		let limiter = RateLimiter::new(RatePolicy { max_requests: 1, window: Duration::seconds(60) });
		let caller = client("10.1.2.5");
		let start = macros::datetime!(2025-06-01 12:00 UTC);

		assert!(limiter.allow_at(&caller, start));
		// Denials must not be recorded; only the first hit ages out.
		assert!(!limiter.allow_at(&caller, start + Duration::seconds(30)));
		assert!(limiter.allow_at(&caller, start + Duration::seconds(61)));
	}

	#[test]
	fn clients_are_limited_independently() {
		let limiter = RateLimiter::new(RatePolicy { max_requests: 2, window: Duration::seconds(60) });
		let first = client("172.16.0.1");
		let second = client("172.16.0.2");
		let start = macros::datetime!(2025-06-01 12:00 UTC);

		assert!(limiter.allow_at(&first, start));
		assert!(limiter.allow_at(&first, start));
		assert!(!limiter.allow_at(&first, start));
		assert!(limiter.allow_at(&second, start));
	}

	#[test]
	fn idle_clients_can_be_forgotten() {
		let limiter = RateLimiter::default();
		let start = macros::datetime!(2025-06-01 12:00 UTC);

		assert!(limiter.allow_at(&client("10.9.9.1"), start));
		assert!(limiter.allow_at(&client("10.9.9.2"), start + Duration::seconds(45)));
		assert_eq!(limiter.tracked_clients(), 2);

		limiter.forget_idle(start + Duration::seconds(70));

		assert_eq!(limiter.tracked_clients(), 1);
	}
}
