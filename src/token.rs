//! Bearer token models: provider issuance, sealed cache records, and caller-facing tokens.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	error::VaultError,
	vault::{SealedSecret, SecretString, SecretVault},
};

const FINGERPRINT_LEN: usize = 16;

/// Default `token_type` when the provider response omits one.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Log-safe fingerprint of a token value.
///
/// A truncated base64 (no padding) SHA-256 digest; stable for a given token, useless for
/// recovering it. Diagnostics identify tokens exclusively through this value.
pub fn fingerprint(value: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(value.as_bytes());

	let digest = hasher.finalize();
	let mut encoded = STANDARD_NO_PAD.encode(digest);

	encoded.truncate(FINGERPRINT_LEN);

	encoded
}

/// Token material as returned by a provider client, before caching.
#[derive(Clone)]
pub struct IssuedToken {
	/// The access token value.
	pub access_token: SecretString,
	/// Relative lifetime reported by the provider.
	pub expires_in: Duration,
	/// Token type reported by the provider, when present.
	pub token_type: Option<String>,
}
impl Debug for IssuedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("IssuedToken")
			.field("access_token", &"<redacted>")
			.field("expires_in", &self.expires_in)
			.field("token_type", &self.token_type)
			.finish()
	}
}

/// Cache record for one upstream; the token value rests sealed between uses.
///
/// Records are replaced wholesale on refresh and never partially mutated.
#[derive(Clone)]
pub struct CachedToken {
	sealed: SealedSecret,
	/// Token type to place in front of the credential in `Authorization` headers.
	pub token_type: String,
	/// Instant the token was acquired.
	pub acquired_at: OffsetDateTime,
	/// Absolute expiry instant derived from the provider's `expires_in`.
	pub expires_at: OffsetDateTime,
	/// Log-safe fingerprint of the token value.
	pub fingerprint: String,
}
impl CachedToken {
	/// Seals a freshly issued token into a cache record.
	pub fn seal(
		vault: &SecretVault,
		issued: IssuedToken,
		acquired_at: OffsetDateTime,
	) -> Result<Self, VaultError> {
		let fingerprint = fingerprint(issued.access_token.expose());
		let sealed = vault.seal(issued.access_token.expose())?;

		Ok(Self {
			sealed,
			token_type: issued.token_type.unwrap_or_else(|| DEFAULT_TOKEN_TYPE.into()),
			acquired_at,
			expires_at: acquired_at + issued.expires_in,
			fingerprint,
		})
	}

	/// Opens the record back into a caller-facing [`BearerToken`].
	pub fn open(&self, vault: &SecretVault) -> Result<BearerToken, VaultError> {
		Ok(BearerToken {
			access_token: vault.open(&self.sealed)?,
			token_type: self.token_type.clone(),
			acquired_at: self.acquired_at,
			expires_at: self.expires_at,
			fingerprint: self.fingerprint.clone(),
		})
	}

	/// Returns `true` while the record needs no proactive refresh at `instant`.
	///
	/// Fresh means strictly more than `refresh_buffer` of lifetime remains; a record exactly at
	/// the buffer boundary is due for refresh.
	pub fn is_fresh_at(&self, refresh_buffer: Duration, instant: OffsetDateTime) -> bool {
		self.expires_at - instant > refresh_buffer
	}

	/// Returns `true` while the record has not reached its expiry instant.
	pub fn is_unexpired_at(&self, instant: OffsetDateTime) -> bool {
		instant < self.expires_at
	}
}
impl Debug for CachedToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CachedToken")
			.field("token_type", &self.token_type)
			.field("acquired_at", &self.acquired_at)
			.field("expires_at", &self.expires_at)
			.field("fingerprint", &self.fingerprint)
			.finish()
	}
}

/// Valid bearer token handed to the request interceptor.
#[derive(Clone)]
pub struct BearerToken {
	access_token: SecretString,
	/// Token type to place in front of the credential in `Authorization` headers.
	pub token_type: String,
	/// Instant the token was acquired.
	pub acquired_at: OffsetDateTime,
	/// Absolute expiry instant; valid at the moment of return, best-effort afterwards.
	pub expires_at: OffsetDateTime,
	/// Log-safe fingerprint of the token value.
	pub fingerprint: String,
}
impl BearerToken {
	/// The raw token value. Callers must avoid logging this.
	pub fn secret(&self) -> &SecretString {
		&self.access_token
	}

	/// Renders the complete `Authorization` header value.
	pub fn header_value(&self) -> String {
		format!("{} {}", self.token_type, self.access_token.expose())
	}

	/// Lifetime remaining at `instant`; negative once expired.
	pub fn remaining_at(&self, instant: OffsetDateTime) -> Duration {
		self.expires_at - instant
	}
}
impl Debug for BearerToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BearerToken")
			.field("access_token", &"<redacted>")
			.field("token_type", &self.token_type)
			.field("expires_at", &self.expires_at)
			.field("fingerprint", &self.fingerprint)
			.finish()
	}
}
