//! Engine-level error types shared across the manager, providers, validator, and vault.
//!
//! Every failure a caller can observe is cloneable: single-flight waiters piggy-backing on an
//! in-flight acquisition receive the identical error value, so underlying causes are carried
//! behind [`Arc`] instead of boxed trait objects.

// self
use crate::{_prelude::*, config::ProviderKind, ids::ServerName};

/// Engine-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Canonical engine error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Local configuration problem; fatal at the call site, never retried.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Upstream token acquisition failure; retryable by the caller with backoff.
	#[error(transparent)]
	Acquisition(#[from] AcquisitionError),
	/// Freshly acquired token failed validation; the token was not cached.
	#[error(transparent)]
	Validation(#[from] ValidationError),
	/// In-memory secret vault failure.
	#[error(transparent)]
	Vault(#[from] VaultError),
}
impl Error {
	/// Returns `true` when a retry with backoff may succeed.
	///
	/// Acquisition failures are transient by nature (network, upstream outage, timeout);
	/// configuration and validation failures are not. Interceptors typically map retryable
	/// errors to HTTP 502 and validation failures to 401.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Acquisition(_))
	}
}

/// Configuration and semantic-validation failures raised while building the registry or engine.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// The requested server name is not part of the registry.
	#[error("Server `{server}` is not configured.")]
	UnknownServer {
		/// Requested server name.
		server: ServerName,
	},
	/// Two configs share the same server name.
	#[error("Server `{server}` is configured more than once.")]
	DuplicateServer {
		/// Duplicated server name.
		server: ServerName,
	},
	/// Two base URLs are prefixes of each other, making request routing ambiguous.
	#[error("Base URLs of `{first}` and `{second}` are prefix-ambiguous.")]
	AmbiguousBaseUrl {
		/// First server of the ambiguous pair.
		first: ServerName,
		/// Second server of the ambiguous pair.
		second: ServerName,
	},
	/// A URL field failed to parse.
	#[error("Server `{server}` has an invalid {field} URL: `{value}`.")]
	InvalidUrl {
		/// Server the URL belongs to.
		server: ServerName,
		/// Which field failed validation.
		field: &'static str,
		/// Offending URL text.
		value: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A URL uses a scheme other than HTTP(S).
	#[error("Server `{server}` has a non-HTTP(S) {field} URL: `{value}`.")]
	UnsupportedScheme {
		/// Server the URL belongs to.
		server: ServerName,
		/// Which field failed validation.
		field: &'static str,
		/// Offending URL text.
		value: String,
	},
	/// The flavor requires a token endpoint but none was configured.
	#[error("Server `{server}` ({flavor}) requires a token endpoint.")]
	MissingTokenEndpoint {
		/// Server missing the field.
		server: ServerName,
		/// Resolved provider flavor.
		flavor: ProviderKind,
	},
	/// The flavor requires a client identifier but none was configured.
	#[error("Server `{server}` ({flavor}) requires a client ID.")]
	MissingClientId {
		/// Server missing the field.
		server: ServerName,
		/// Resolved provider flavor.
		flavor: ProviderKind,
	},
	/// The flavor requires a client secret but none was configured.
	#[error("Server `{server}` ({flavor}) requires a client secret.")]
	MissingClientSecret {
		/// Server missing the field.
		server: ServerName,
		/// Resolved provider flavor.
		flavor: ProviderKind,
	},
	/// Managed-identity acquisition needs a scope/resource to request.
	#[error("Server `{server}` ({flavor}) requires a scope.")]
	MissingScope {
		/// Server missing the field.
		server: ServerName,
		/// Resolved provider flavor.
		flavor: ProviderKind,
	},
	/// `auto` detection needs a token endpoint to inspect.
	#[error("Server `{server}` uses provider auto-detection but has no token endpoint.")]
	AutoDetectWithoutEndpoint {
		/// Server missing the field.
		server: ServerName,
	},
	/// HTTP client could not be constructed for a server.
	#[error("HTTP client could not be constructed for `{server}`.")]
	HttpClientBuild {
		/// Server the client belongs to.
		server: ServerName,
		/// Underlying transport builder failure.
		#[source]
		source: Arc<ReqwestError>,
	},
	/// The configured CA bundle could not be read or parsed.
	#[error("CA bundle `{path}` for `{server}` is unusable: {message}.")]
	CaBundle {
		/// Server the bundle belongs to.
		server: ServerName,
		/// Configured bundle path.
		path: String,
		/// Human-readable failure summary.
		message: String,
	},
	/// JWT validation was configured with an empty algorithm allow-list.
	#[error("Server `{server}` configures JWT validation with no allowed algorithms.")]
	EmptyJwtAlgorithms {
		/// Server with the offending config.
		server: ServerName,
	},
	/// The JWT allow-list mixes algorithm families that need different key types.
	#[error("Server `{server}` mixes JWT algorithm families in one allow-list.")]
	MixedJwtAlgorithmFamilies {
		/// Server with the offending config.
		server: ServerName,
	},
	/// The configured JWT public key could not be parsed for the allowed algorithms.
	#[error("Server `{server}` has an unusable JWT public key.")]
	InvalidJwtKey {
		/// Server with the offending key.
		server: ServerName,
		/// Underlying key-parsing failure.
		#[source]
		source: Arc<jsonwebtoken::errors::Error>,
	},
	/// A Google client secret looked like a service-account key but failed to parse.
	#[error("Server `{server}` has a malformed service-account key document.")]
	InvalidServiceAccountKey {
		/// Server with the offending secret.
		server: ServerName,
	},
}

/// Upstream token acquisition failure, carrying the server, flavor, and concrete cause.
#[derive(Clone, Debug, ThisError)]
#[error("Token acquisition failed for `{server}` via the {flavor} provider: {cause}")]
pub struct AcquisitionError {
	/// Server whose acquisition failed.
	pub server: ServerName,
	/// Provider flavor that performed the attempt.
	pub flavor: ProviderKind,
	/// Concrete failure cause.
	#[source]
	pub cause: AcquireCause,
}

/// Concrete causes behind an [`AcquisitionError`].
#[derive(Clone, Debug, ThisError)]
pub enum AcquireCause {
	/// Transport-level failure (DNS, TCP, TLS) while calling the endpoint.
	#[error("Network error while calling the token endpoint.")]
	Network {
		/// Transport failure reported by the HTTP client.
		#[source]
		source: Arc<ReqwestError>,
	},
	/// The acquisition call exceeded the configured request timeout.
	#[error("Request timed out after {after}.")]
	Timeout {
		/// Configured timeout that elapsed.
		after: Duration,
	},
	/// The endpoint answered with a non-2xx status.
	#[error("Token endpoint returned HTTP {status}: {body_preview}.")]
	Endpoint {
		/// HTTP status code of the response.
		status: u16,
		/// Size-limited, secret-free preview of the response body.
		body_preview: String,
	},
	/// The endpoint answered 2xx with a body that does not parse as a token response.
	#[error("Token endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
	},
	/// The token response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// The token response carried a non-positive `expires_in`.
	#[error("The expires_in value must be positive, got {value}.")]
	NonPositiveExpiresIn {
		/// Offending value.
		value: i64,
	},
	/// The token response carried an implausibly large `expires_in`.
	#[error("The expires_in value {value} exceeds the supported range.")]
	ExpiresInOutOfRange {
		/// Offending value.
		value: i64,
	},
	/// An identity source (instance metadata, workload identity, key document) misbehaved.
	#[error("Identity source failed: {message}.")]
	IdentitySource {
		/// Human-readable failure summary, free of secret material.
		message: String,
	},
	/// Signing the service-account assertion failed.
	#[error("Failed to sign the token request assertion.")]
	AssertionSigning {
		/// Underlying signing failure.
		#[source]
		source: Arc<jsonwebtoken::errors::Error>,
	},
	/// A platform credential carried an unparseable expiration instant.
	#[error("Credential expiration `{value}` could not be parsed.")]
	InvalidExpiration {
		/// Offending timestamp text.
		value: String,
	},
}

/// Rejection of a freshly acquired bearer token by the JWT validator.
#[derive(Clone, Debug, ThisError)]
#[error("Token validation failed for `{server}`: {reason}")]
pub struct ValidationError {
	/// Server whose token was rejected.
	pub server: ServerName,
	/// The specific check that failed.
	#[source]
	pub reason: ValidationReason,
}

/// The single check that aborted validation; validation is all-or-nothing.
#[derive(Clone, Debug, ThisError)]
pub enum ValidationReason {
	/// The header declared an algorithm outside the allow-list.
	#[error("Algorithm {found:?} is not allowed (allowed: {allowed:?}).")]
	DisallowedAlgorithm {
		/// Algorithm declared by the token header.
		found: jsonwebtoken::Algorithm,
		/// Configured allow-list.
		allowed: Vec<jsonwebtoken::Algorithm>,
	},
	/// The cryptographic signature did not verify against the configured key.
	#[error("Signature verification failed.")]
	BadSignature,
	/// The `exp` claim is in the past (beyond the leeway).
	#[error("Token is expired.")]
	Expired,
	/// The `nbf` claim is in the future (beyond the leeway).
	#[error("Token is not yet valid.")]
	NotYetValid,
	/// The `aud` claim does not contain the configured audience.
	#[error("Token audience does not include `{expected}`.")]
	AudienceMismatch {
		/// Audience the config demands.
		expected: String,
	},
	/// The `iss` claim does not equal the configured issuer.
	#[error("Token issuer does not equal `{expected}`.")]
	IssuerMismatch {
		/// Issuer the config demands.
		expected: String,
	},
	/// The token could not be parsed, or failed a check not covered above.
	#[error("Token is malformed.")]
	Malformed {
		/// Underlying decoding failure.
		#[source]
		source: Arc<jsonwebtoken::errors::Error>,
	},
}

/// Failures raised by the in-memory secret vault.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
pub enum VaultError {
	/// The vault key was shredded; no further seal/open operations are possible.
	#[error("Vault key has been shredded.")]
	KeyShredded,
	/// Symmetric encryption failed.
	#[error("Sealing the secret failed.")]
	SealFailure,
	/// Symmetric decryption failed (wrong key, tampered ciphertext, or truncation).
	#[error("Opening the sealed secret failed.")]
	OpenFailure,
	/// Decrypted bytes were not valid UTF-8.
	#[error("Opened secret is not valid UTF-8.")]
	NotUtf8,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::ids::ServerName;

	#[test]
	fn retryability_follows_the_taxonomy() {
		let server = ServerName::new("pacs-a").expect("Server fixture should be valid.");
		let acquisition: Error = AcquisitionError {
			server: server.clone(),
			flavor: ProviderKind::Generic,
			cause: AcquireCause::Endpoint { status: 503, body_preview: "upstream down".into() },
		}
		.into();
		let config: Error = ConfigError::UnknownServer { server: server.clone() }.into();
		let validation: Error =
			ValidationError { server, reason: ValidationReason::Expired }.into();

		assert!(acquisition.is_retryable());
		assert!(!config.is_retryable());
		assert!(!validation.is_retryable());
	}

	#[test]
	fn errors_clone_for_singleflight_sharing() {
		let server = ServerName::new("pacs-b").expect("Server fixture should be valid.");
		let original: Error = AcquisitionError {
			server,
			flavor: ProviderKind::Keycloak,
			cause: AcquireCause::MissingExpiresIn,
		}
		.into();
		let shared = original.clone();

		assert_eq!(original.to_string(), shared.to_string());
	}
}
