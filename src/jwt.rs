//! JWT validation pipeline for freshly acquired bearer tokens.
//!
//! The header is parsed without trusting its claims, and the declared algorithm must sit inside
//! the configured allow-list before any cryptography runs; asserting `none` or swapping an
//! asymmetric algorithm for an HMAC against the public key is rejected up front. Validation is
//! all-or-nothing: the first failed check aborts with its specific reason.

// crates.io
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
// self
use crate::{
	_prelude::*,
	error::{ConfigError, ValidationError, ValidationReason},
	ids::ServerName,
};

const CLOCK_SKEW_LEEWAY_SECS: u64 = 30;

/// Per-server token validation parameters.
///
/// Servers without a public key skip validation entirely; that opt-out is deliberate but not
/// recommended for production deployments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JwtParams {
	/// PEM-encoded public key (or certificate) used for signature verification.
	pub public_key: String,
	/// When set, the token's `aud` claim must contain this value.
	pub audience: Option<String>,
	/// When set, the token's `iss` claim must equal this value exactly.
	pub issuer: Option<String>,
	/// Algorithms the token header may declare; non-empty, single key family.
	pub allowed_algorithms: Vec<Algorithm>,
}
impl JwtParams {
	/// Creates parameters for the provided PEM public key with the default `RS256` allow-list.
	pub fn new(public_key: impl Into<String>) -> Self {
		Self {
			public_key: public_key.into(),
			audience: None,
			issuer: None,
			allowed_algorithms: vec![Algorithm::RS256],
		}
	}

	/// Requires the token audience to contain the provided value.
	pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
		self.audience = Some(audience.into());

		self
	}

	/// Requires the token issuer to equal the provided value.
	pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
		self.issuer = Some(issuer.into());

		self
	}

	/// Replaces the algorithm allow-list.
	pub fn with_algorithms(mut self, algorithms: impl Into<Vec<Algorithm>>) -> Self {
		self.allowed_algorithms = algorithms.into();

		self
	}
}

// Key families determine which PEM parser applies; mixing them in one allow-list would make the
// configured key ambiguous.
#[derive(Clone, Copy, PartialEq, Eq)]
enum KeyFamily {
	Rsa,
	Ec,
	Ed,
	Hmac,
}

fn family(algorithm: Algorithm) -> KeyFamily {
	match algorithm {
		Algorithm::RS256
		| Algorithm::RS384
		| Algorithm::RS512
		| Algorithm::PS256
		| Algorithm::PS384
		| Algorithm::PS512 => KeyFamily::Rsa,
		Algorithm::ES256 | Algorithm::ES384 => KeyFamily::Ec,
		Algorithm::EdDSA => KeyFamily::Ed,
		Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => KeyFamily::Hmac,
	}
}

/// Prebuilt validator for one server's tokens.
///
/// Key parsing happens once at engine construction so a broken PEM surfaces as a
/// [`ConfigError`] at startup rather than on the first refresh.
#[derive(Clone)]
pub struct JwtValidator {
	server: ServerName,
	key: DecodingKey,
	params: JwtParams,
}
impl JwtValidator {
	/// Parses the configured key and builds a validator for `server`.
	pub fn new(server: ServerName, params: JwtParams) -> Result<Self, ConfigError> {
		if params.allowed_algorithms.is_empty() {
			return Err(ConfigError::EmptyJwtAlgorithms { server });
		}

		let families: Vec<_> = params.allowed_algorithms.iter().map(|alg| family(*alg)).collect();

		if families.windows(2).any(|pair| pair[0] != pair[1]) {
			return Err(ConfigError::MixedJwtAlgorithmFamilies { server });
		}

		let pem = params.public_key.as_bytes();
		let key = match families[0] {
			KeyFamily::Rsa => DecodingKey::from_rsa_pem(pem),
			KeyFamily::Ec => DecodingKey::from_ec_pem(pem),
			KeyFamily::Ed => DecodingKey::from_ed_pem(pem),
			// The validator is public-key based; symmetric allow-lists would turn the public
			// key into a signing secret.
			KeyFamily::Hmac =>
				Err(jsonwebtoken::errors::Error::from(ErrorKind::InvalidAlgorithm)),
		}
		.map_err(|e| ConfigError::InvalidJwtKey { server: server.clone(), source: Arc::new(e) })?;

		Ok(Self { server, key, params })
	}

	/// Verifies signature, algorithm, time claims, audience, and issuer.
	pub fn validate(&self, token: &str) -> Result<(), ValidationError> {
		let header = jsonwebtoken::decode_header(token)
			.map_err(|e| self.reject(ValidationReason::Malformed { source: Arc::new(e) }))?;

		if !self.params.allowed_algorithms.contains(&header.alg) {
			return Err(self.reject(ValidationReason::DisallowedAlgorithm {
				found: header.alg,
				allowed: self.params.allowed_algorithms.clone(),
			}));
		}

		let mut validation = Validation::new(header.alg);

		validation.algorithms = self.params.allowed_algorithms.clone();
		validation.leeway = CLOCK_SKEW_LEEWAY_SECS;
		validation.validate_nbf = true;

		if let Some(audience) = self.params.audience.as_deref() {
			validation.set_audience(&[audience]);
		} else {
			validation.validate_aud = false;
		}
		if let Some(issuer) = self.params.issuer.as_deref() {
			validation.set_issuer(&[issuer]);
		}

		jsonwebtoken::decode::<serde_json::Value>(token, &self.key, &validation)
			.map_err(|e| self.reject(self.classify(e)))?;

		Ok(())
	}

	fn classify(&self, error: jsonwebtoken::errors::Error) -> ValidationReason {
		let reason = match error.kind() {
			ErrorKind::ExpiredSignature => Some(ValidationReason::Expired),
			ErrorKind::ImmatureSignature => Some(ValidationReason::NotYetValid),
			ErrorKind::InvalidSignature => Some(ValidationReason::BadSignature),
			ErrorKind::InvalidAudience => Some(ValidationReason::AudienceMismatch {
				expected: self.params.audience.clone().unwrap_or_default(),
			}),
			ErrorKind::InvalidIssuer => Some(ValidationReason::IssuerMismatch {
				expected: self.params.issuer.clone().unwrap_or_default(),
			}),
			_ => None,
		};

		reason.unwrap_or_else(|| ValidationReason::Malformed { source: Arc::new(error) })
	}

	fn reject(&self, reason: ValidationReason) -> ValidationError {
		ValidationError { server: self.server.clone(), reason }
	}
}
impl Debug for JwtValidator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("JwtValidator")
			.field("server", &self.server)
			.field("audience", &self.params.audience)
			.field("issuer", &self.params.issuer)
			.field("allowed_algorithms", &self.params.allowed_algorithms)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use jsonwebtoken::{EncodingKey, Header};
	use serde_json::json;
	// self
	use super::*;

	const SIGNING_PEM: &str = include_str!("../tests/fixtures/rsa_signing.pem");
	const PUBLIC_PEM: &str = include_str!("../tests/fixtures/rsa_signing.pub.pem");
	const OTHER_PUBLIC_PEM: &str = include_str!("../tests/fixtures/rsa_other.pub.pem");

	fn server() -> ServerName {
		ServerName::new("pacs-jwt").expect("Server fixture should be valid.")
	}

	fn validator(params: JwtParams) -> JwtValidator {
		JwtValidator::new(server(), params).expect("Validator fixture should build.")
	}

	fn sign(claims: serde_json::Value) -> String {
		let key = EncodingKey::from_rsa_pem(SIGNING_PEM.as_bytes())
			.expect("Signing key fixture should parse.");

		jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
			.expect("Token fixture should sign.")
	}

	fn base_claims() -> serde_json::Value {
		let now = OffsetDateTime::now_utc().unix_timestamp();

		json!({
			"sub": "service-account",
			"aud": "dicomweb-proxy",
			"iss": "https://idp.example.test",
			"exp": now + 3_600,
			"iat": now,
		})
	}

	#[test]
	fn valid_token_passes_all_checks() {
		let params = JwtParams::new(PUBLIC_PEM)
			.with_audience("dicomweb-proxy")
			.with_issuer("https://idp.example.test");

		validator(params)
			.validate(&sign(base_claims()))
			.expect("A well-formed token should validate.");
	}

	#[test]
	fn expired_token_is_rejected() {
		let mut claims = base_claims();

		claims["exp"] = json!(OffsetDateTime::now_utc().unix_timestamp() - 3_600);

		let err = validator(JwtParams::new(PUBLIC_PEM))
			.validate(&sign(claims))
			.expect_err("Expired tokens must be rejected.");

		assert!(matches!(err.reason, ValidationReason::Expired));
	}

	#[test]
	fn future_nbf_is_rejected() {
		let mut claims = base_claims();

		claims["nbf"] = json!(OffsetDateTime::now_utc().unix_timestamp() + 3_600);

		let err = validator(JwtParams::new(PUBLIC_PEM))
			.validate(&sign(claims))
			.expect_err("Not-yet-valid tokens must be rejected.");

		assert!(matches!(err.reason, ValidationReason::NotYetValid));
	}

	#[test]
	fn wrong_audience_is_rejected() {
		let err = validator(JwtParams::new(PUBLIC_PEM).with_audience("other-service"))
			.validate(&sign(base_claims()))
			.expect_err("Audience mismatches must be rejected.");

		assert!(matches!(err.reason, ValidationReason::AudienceMismatch { .. }));
	}

	#[test]
	fn wrong_issuer_is_rejected() {
		let err = validator(JwtParams::new(PUBLIC_PEM).with_issuer("https://evil.example.test"))
			.validate(&sign(base_claims()))
			.expect_err("Issuer mismatches must be rejected.");

		assert!(matches!(err.reason, ValidationReason::IssuerMismatch { .. }));
	}

	#[test]
	fn disallowed_algorithm_is_rejected_before_verification() {
		let hmac_key = EncodingKey::from_secret(b"attacker-controlled");
		let token =
			jsonwebtoken::encode(&Header::new(Algorithm::HS256), &base_claims(), &hmac_key)
				.expect("HMAC token fixture should sign.");
		let err = validator(JwtParams::new(PUBLIC_PEM))
			.validate(&token)
			.expect_err("Algorithm downgrades must be rejected.");

		assert!(matches!(err.reason, ValidationReason::DisallowedAlgorithm { .. }));
	}

	#[test]
	fn tampered_signature_is_rejected() {
		let mut token = sign(base_claims());
		let flipped = if token.ends_with('A') { 'B' } else { 'A' };

		token.pop();
		token.push(flipped);

		let err = validator(JwtParams::new(PUBLIC_PEM))
			.validate(&token)
			.expect_err("Tampered signatures must be rejected.");

		assert!(matches!(
			err.reason,
			ValidationReason::BadSignature | ValidationReason::Malformed { .. },
		));
	}

	#[test]
	fn token_signed_by_another_key_is_rejected() {
		let err = validator(JwtParams::new(OTHER_PUBLIC_PEM))
			.validate(&sign(base_claims()))
			.expect_err("A signature from a different key must be rejected.");

		assert!(matches!(err.reason, ValidationReason::BadSignature));
	}

	#[test]
	fn garbage_input_is_malformed() {
		let err = validator(JwtParams::new(PUBLIC_PEM))
			.validate("not-a-jwt")
			.expect_err("Garbage input must be rejected.");

		assert!(matches!(err.reason, ValidationReason::Malformed { .. }));
	}

	#[test]
	fn config_errors_surface_at_construction() {
		let err =
			JwtValidator::new(server(), JwtParams::new(PUBLIC_PEM).with_algorithms(Vec::new()))
				.expect_err("Empty allow-lists must be rejected.");

		assert!(matches!(err, ConfigError::EmptyJwtAlgorithms { .. }));

		let err = JwtValidator::new(
			server(),
			JwtParams::new(PUBLIC_PEM).with_algorithms([Algorithm::RS256, Algorithm::ES256]),
		)
		.expect_err("Mixed key families must be rejected.");

		assert!(matches!(err, ConfigError::MixedJwtAlgorithmFamilies { .. }));

		let err = JwtValidator::new(server(), JwtParams::new("not a pem"))
			.expect_err("Unparseable keys must be rejected.");

		assert!(matches!(err, ConfigError::InvalidJwtKey { .. }));
	}
}
