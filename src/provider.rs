//! Provider clients: one variant per identity-provider flavor, one capability (acquire a token).
//!
//! The set is closed on purpose: adding a flavor is a compile-time-checked addition of one
//! variant here plus its acquisition source, never a new conditional scattered through the
//! manager. Which variant a server gets is decided once, when the engine is built.

pub mod detect;
pub mod exchange;
pub mod platform;

pub use detect::*;
pub use exchange::*;
pub use platform::*;

// self
use crate::{
	_prelude::*,
	config::{ProviderKind, ServerConfig},
	error::{AcquireCause, AcquisitionError, ConfigError},
	ids::ServerName,
	token::IssuedToken,
	vault::{SecretString, SecretVault},
};

const BODY_PREVIEW_LIMIT: usize = 256;
// A token claiming to outlive a year is assumed to be a provider bug.
const MAX_EXPIRES_IN_SECS: i64 = 31_536_000;

/// Provider client bound to one configured server.
#[derive(Debug)]
pub enum ProviderClient {
	/// Plain OAuth2 client-credentials exchange.
	Generic(ClientCredentialsExchange),
	/// Azure AD client-credentials exchange with `/.default` scope normalization.
	Azure(ClientCredentialsExchange),
	/// Azure platform-managed identity.
	AzureManagedIdentity(ManagedIdentitySource),
	/// Google service-account assertion or client-credentials exchange.
	Google(GoogleTokenSource),
	/// AWS platform role credentials.
	Aws(AwsRoleSource),
	/// Keycloak realm-scoped client-credentials exchange.
	Keycloak(ClientCredentialsExchange),
}
impl ProviderClient {
	/// Builds the client matching the config's resolved flavor.
	///
	/// Configs that still carry [`ProviderKind::Auto`] (i.e., that skipped registry
	/// validation) are resolved here with the default detection rules.
	pub fn from_config(config: &ServerConfig, vault: Arc<SecretVault>) -> Result<Self> {
		let flavor = match config.provider {
			ProviderKind::Auto => {
				let endpoint = config.token_endpoint.as_ref().ok_or_else(|| {
					ConfigError::AutoDetectWithoutEndpoint { server: config.name.clone() }
				})?;

				FlavorDetector::default().detect(endpoint)
			},
			resolved => resolved,
		};

		Ok(match flavor {
			ProviderKind::Generic =>
				Self::Generic(ClientCredentialsExchange::from_config(config, flavor, vault)?),
			ProviderKind::Azure =>
				Self::Azure(ClientCredentialsExchange::from_config(config, flavor, vault)?),
			ProviderKind::AzureManagedIdentity =>
				Self::AzureManagedIdentity(ManagedIdentitySource::from_config(config, vault)?),
			ProviderKind::Google => Self::Google(GoogleTokenSource::from_config(config, vault)?),
			ProviderKind::Aws => Self::Aws(AwsRoleSource::from_config(config)?),
			ProviderKind::Keycloak =>
				Self::Keycloak(ClientCredentialsExchange::from_config(config, flavor, vault)?),
			ProviderKind::Auto => unreachable!("Auto flavor is resolved above."),
		})
	}

	/// The flavor this client implements.
	pub fn kind(&self) -> ProviderKind {
		match self {
			Self::Generic(_) => ProviderKind::Generic,
			Self::Azure(_) => ProviderKind::Azure,
			Self::AzureManagedIdentity(_) => ProviderKind::AzureManagedIdentity,
			Self::Google(_) => ProviderKind::Google,
			Self::Aws(_) => ProviderKind::Aws,
			Self::Keycloak(_) => ProviderKind::Keycloak,
		}
	}

	/// Performs one outbound token acquisition.
	pub async fn acquire(&self) -> Result<IssuedToken> {
		match self {
			Self::Generic(exchange) | Self::Azure(exchange) | Self::Keycloak(exchange) =>
				exchange.acquire().await,
			Self::AzureManagedIdentity(source) => source.acquire().await,
			Self::Google(source) => source.acquire().await,
			Self::Aws(source) => source.acquire().await,
		}
	}
}

/// Wire shape every token endpoint is expected to answer with.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenEndpointPayload {
	pub access_token: String,
	#[serde(default)]
	pub token_type: Option<String>,
	#[serde(default)]
	pub expires_in: Option<ExpiresIn>,
}

// Azure's instance-metadata endpoint reports `expires_in` as a JSON string; everyone else uses
// an integer. Both must parse.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ExpiresIn {
	Seconds(i64),
	Text(String),
}

pub(crate) fn acquisition_failure(
	server: &ServerName,
	flavor: ProviderKind,
	cause: AcquireCause,
) -> Error {
	AcquisitionError { server: server.clone(), flavor, cause }.into()
}

pub(crate) fn map_transport_error(error: ReqwestError, timeout: Duration) -> AcquireCause {
	if error.is_timeout() {
		AcquireCause::Timeout { after: timeout }
	} else {
		AcquireCause::Network { source: Arc::new(error) }
	}
}

/// Turns an HTTP token-endpoint response into an [`IssuedToken`] or an [`AcquireCause`].
pub(crate) async fn read_token_response(
	response: reqwest::Response,
	timeout: Duration,
) -> Result<IssuedToken, AcquireCause> {
	let status = response.status();
	let body =
		response.text().await.map_err(|e| map_transport_error(e, timeout))?;

	if !status.is_success() {
		return Err(AcquireCause::Endpoint {
			status: status.as_u16(),
			body_preview: truncate_preview(body),
		});
	}

	let mut deserializer = serde_json::Deserializer::from_str(&body);
	let payload: TokenEndpointPayload = serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|e| AcquireCause::ResponseParse { source: Arc::new(e) })?;
	let expires_in = match payload.expires_in {
		None => return Err(AcquireCause::MissingExpiresIn),
		Some(ExpiresIn::Seconds(value)) => value,
		Some(ExpiresIn::Text(text)) => text
			.trim()
			.parse::<i64>()
			.map_err(|_| AcquireCause::InvalidExpiration { value: text.clone() })?,
	};

	if expires_in <= 0 {
		return Err(AcquireCause::NonPositiveExpiresIn { value: expires_in });
	}
	if expires_in > MAX_EXPIRES_IN_SECS {
		return Err(AcquireCause::ExpiresInOutOfRange { value: expires_in });
	}

	Ok(IssuedToken {
		access_token: SecretString::new(payload.access_token),
		expires_in: Duration::seconds(expires_in),
		token_type: payload.token_type,
	})
}

pub(crate) fn truncate_preview(body: String) -> String {
	if body.chars().count() <= BODY_PREVIEW_LIMIT {
		return body;
	}

	let mut buf = String::new();

	for (idx, ch) in body.chars().enumerate() {
		if idx >= BODY_PREVIEW_LIMIT {
			buf.push('…');

			break;
		}
		buf.push(ch);
	}

	buf
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn preview_truncation_is_character_safe() {
		let short = truncate_preview("plain failure body".into());

		assert_eq!(short, "plain failure body");

		let long = truncate_preview("ü".repeat(BODY_PREVIEW_LIMIT + 10));

		assert_eq!(long.chars().count(), BODY_PREVIEW_LIMIT + 1);
		assert!(long.ends_with('…'));
	}

	#[test]
	fn expires_in_parses_both_wire_shapes() {
		let numeric: TokenEndpointPayload =
			serde_json::from_str(r#"{"access_token":"a","expires_in":3600}"#)
				.expect("Numeric expires_in should parse.");
		let text: TokenEndpointPayload =
			serde_json::from_str(r#"{"access_token":"a","expires_in":"3599"}"#)
				.expect("String expires_in should parse.");

		assert!(matches!(numeric.expires_in, Some(ExpiresIn::Seconds(3600))));
		assert!(matches!(text.expires_in, Some(ExpiresIn::Text(ref s)) if s == "3599"));
	}
}
