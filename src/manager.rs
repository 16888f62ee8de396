//! Token manager: per-server caching, proactive refresh, and single-flight coordination.
//!
//! Each configured server owns a cache slot, an async refresh gate, and a completed-flight
//! counter. The cache-hit path takes only a read lock and never touches the gate; refreshes for
//! different servers never block each other. When K callers race an expired server, the first
//! through the gate performs the one network round-trip and the rest share its outcome, token
//! and error alike. A waiter whose future is dropped while queued on the gate abandons its wait
//! without disturbing the in-flight acquisition.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{
	_prelude::*,
	config::{ServerConfig, ServerRegistry},
	error::ConfigError,
	ids::ServerName,
	jwt::JwtValidator,
	obs::{self, AcquireOutcome, AcquireSpan},
	provider::ProviderClient,
	token::{BearerToken, CachedToken},
	vault::SecretVault,
};

/// Cache-or-refresh query for one server.
#[derive(Clone, Debug)]
pub struct TokenQuery {
	/// Server to obtain a token for.
	pub server: ServerName,
	/// Forces cache bypass when true.
	pub force: bool,
	/// Instant treated as "now" for freshness checks; defaults to the current clock.
	pub evaluated_at: Option<OffsetDateTime>,
}
impl TokenQuery {
	/// Creates a query for the provided server.
	pub fn new(server: ServerName) -> Self {
		Self { server, force: false, evaluated_at: None }
	}

	/// Forces the manager to bypass cache checks.
	pub fn force_refresh(mut self) -> Self {
		self.force = true;

		self
	}

	/// Overrides the force flag.
	pub fn with_force(mut self, force: bool) -> Self {
		self.force = force;

		self
	}

	/// Overrides the instant used for freshness and expiry calculations.
	pub fn with_evaluated_at(mut self, instant: OffsetDateTime) -> Self {
		self.evaluated_at = Some(instant);

		self
	}

	fn now(&self) -> OffsetDateTime {
		self.evaluated_at.unwrap_or_else(OffsetDateTime::now_utc)
	}
}

struct ServerEntry {
	config: ServerConfig,
	client: ProviderClient,
	validator: Option<JwtValidator>,
	cached: RwLock<Option<CachedToken>>,
	gate: AsyncMutex<()>,
	// Counts completed flights; queued waiters compare against it to recognize an outcome they
	// should share instead of dialing out again.
	epoch: AtomicU64,
	last_failure: Mutex<Option<(u64, Error)>>,
}
impl ServerEntry {
	fn shared_failure(&self) -> Option<Error> {
		let guard = self.last_failure.lock();

		guard
			.as_ref()
			.filter(|(epoch, _)| *epoch == self.epoch.load(Ordering::Acquire))
			.map(|(_, error)| error.clone())
	}
}

/// Long-lived token engine owned by the host's composition root.
///
/// Construction validates every server's provider wiring and JWT key material; steady-state
/// operation is [`get_token`](Self::get_token) per outbound request and
/// [`invalidate`](Self::invalidate) when an upstream rejects a token as unauthorized.
pub struct TokenManager {
	vault: Arc<SecretVault>,
	registry: ServerRegistry,
	entries: HashMap<ServerName, ServerEntry>,
}
impl TokenManager {
	/// Builds the engine from a validated registry.
	pub fn new(registry: ServerRegistry) -> Result<Self> {
		let vault = Arc::new(SecretVault::new());
		let mut entries = HashMap::new();

		for config in registry.iter() {
			let client = ProviderClient::from_config(config, vault.clone())?;
			let validator = config
				.jwt
				.clone()
				.map(|params| JwtValidator::new(config.name.clone(), params))
				.transpose()?;

			entries.insert(config.name.clone(), ServerEntry {
				config: config.clone(),
				client,
				validator,
				cached: RwLock::new(None),
				gate: AsyncMutex::new(()),
				epoch: AtomicU64::new(0),
				last_failure: Mutex::new(None),
			});
		}

		Ok(Self { vault, registry, entries })
	}

	/// The validated registry the engine was built from.
	pub fn registry(&self) -> &ServerRegistry {
		&self.registry
	}

	/// Returns a currently valid token for the server, refreshing if needed.
	pub async fn get_token(&self, server: &ServerName) -> Result<BearerToken> {
		self.get_token_with(TokenQuery::new(server.clone())).await
	}

	/// Returns a token for the query, honoring its force flag and evaluation instant.
	pub async fn get_token_with(&self, query: TokenQuery) -> Result<BearerToken> {
		let entry = self.entry(&query.server)?;
		let now = query.now();

		// Fast path: snapshot read only, no gate.
		if !query.force {
			if let Some(token) = self.fresh_snapshot(entry, now)? {
				return Ok(token);
			}
		}

		let observed = entry.epoch.load(Ordering::Acquire);
		let _flight = entry.gate.lock().await;
		let now = query.now();

		// Re-check under the gate: the previous holder may have refreshed already.
		if !query.force {
			if let Some(token) = self.fresh_snapshot(entry, now)? {
				return Ok(token);
			}
		}
		// A flight completed while this caller queued; share its outcome instead of dialing
		// out again.
		if entry.epoch.load(Ordering::Acquire) != observed {
			if let Some(error) = entry.shared_failure() {
				return self.degrade_or(entry, now, query.force, error);
			}
			if let Some(token) = self.unexpired_snapshot(entry, now)? {
				return Ok(token);
			}
		}

		// This caller owns the flight.
		let flavor = entry.client.kind();
		let span = AcquireSpan::new(&entry.config.name, flavor, "get_token");

		obs::record_acquire_outcome(flavor, AcquireOutcome::Attempt);

		let result = span
			.instrument(async {
				let issued = entry.client.acquire().await?;

				if let Some(validator) = &entry.validator {
					validator.validate(issued.access_token.expose())?;
				}

				CachedToken::seal(&self.vault, issued, now).map_err(Error::from)
			})
			.await;

		match result {
			Ok(cached) => {
				*entry.cached.write() = Some(cached.clone());
				*entry.last_failure.lock() = None;

				entry.epoch.fetch_add(1, Ordering::AcqRel);
				obs::record_acquire_outcome(flavor, AcquireOutcome::Success);

				Ok(cached.open(&self.vault)?)
			},
			Err(error) => {
				// The cache is left untouched; retry policy belongs to the caller.
				let epoch = entry.epoch.fetch_add(1, Ordering::AcqRel) + 1;

				*entry.last_failure.lock() = Some((epoch, error.clone()));

				obs::record_acquire_outcome(flavor, AcquireOutcome::Failure);

				self.degrade_or(entry, now, query.force, error)
			},
		}
	}

	/// Drops the cached token so the next call acquires fresh.
	///
	/// Called after the remote endpoint rejects a token as unauthorized.
	pub fn invalidate(&self, server: &ServerName) -> Result<()> {
		let entry = self.entry(server)?;

		*entry.cached.write() = None;
		*entry.last_failure.lock() = None;

		Ok(())
	}

	/// Shreds the vault key, rendering every sealed secret unreadable; used at shutdown.
	pub fn shutdown(&self) {
		self.vault.shred();
	}

	fn entry(&self, server: &ServerName) -> Result<&ServerEntry, ConfigError> {
		self.entries
			.get(server)
			.ok_or_else(|| ConfigError::UnknownServer { server: server.clone() })
	}

	fn fresh_snapshot(
		&self,
		entry: &ServerEntry,
		now: OffsetDateTime,
	) -> Result<Option<BearerToken>> {
		let guard = entry.cached.read();

		match guard.as_ref() {
			Some(cached) if cached.is_fresh_at(entry.config.refresh_buffer, now) =>
				Ok(Some(cached.open(&self.vault)?)),
			_ => Ok(None),
		}
	}

	fn unexpired_snapshot(
		&self,
		entry: &ServerEntry,
		now: OffsetDateTime,
	) -> Result<Option<BearerToken>> {
		let guard = entry.cached.read();

		match guard.as_ref() {
			Some(cached) if cached.is_unexpired_at(now) => Ok(Some(cached.open(&self.vault)?)),
			_ => Ok(None),
		}
	}

	// Degraded mode: a failed refresh does not invalidate a token that has not actually
	// expired; unforced callers keep working on the stale token while retries proceed.
	fn degrade_or(
		&self,
		entry: &ServerEntry,
		now: OffsetDateTime,
		force: bool,
		error: Error,
	) -> Result<BearerToken> {
		if !force {
			if let Some(token) = self.unexpired_snapshot(entry, now)? {
				#[cfg(feature = "tracing")]
				tracing::warn!(
					server = %entry.config.name,
					fingerprint = %token.fingerprint,
					error = %error,
					"Refresh failed; serving the stale, unexpired token.",
				);

				return Ok(token);
			}
		}

		Err(error)
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager").field("servers", &self.entries.len()).finish()
	}
}
