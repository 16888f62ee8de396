//! Client-credentials token exchanges: the generic form POST plus the Azure and Google
//! specializations layered on top of it.

// crates.io
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;
// self
use crate::{
	_prelude::*,
	config::{ProviderKind, ServerConfig},
	error::{AcquireCause, ConfigError},
	http,
	ids::ServerName,
	provider::{acquisition_failure, map_transport_error, read_token_response},
	token::IssuedToken,
	vault::{SealedSecret, SecretVault},
};

const CLIENT_CREDENTIALS_GRANT: &str = "client_credentials";
const ASSERTION_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const AZURE_DEFAULT_SCOPE_SUFFIX: &str = "/.default";
const ASSERTION_LIFETIME: Duration = Duration::seconds(3_600);

/// Form-encoded `client_credentials` exchange against a configured token endpoint.
///
/// Shared by the generic, Azure, and Keycloak flavors (and Google's non-assertion mode); the
/// flavor only influences scope normalization and diagnostics.
pub struct ClientCredentialsExchange {
	server: ServerName,
	flavor: ProviderKind,
	http: ReqwestClient,
	vault: Arc<SecretVault>,
	token_endpoint: Url,
	client_id: String,
	client_secret: SealedSecret,
	scope: Option<String>,
	timeout: Duration,
}
impl ClientCredentialsExchange {
	/// Builds the exchange from a server config, sealing the client secret into the vault.
	pub fn from_config(
		config: &ServerConfig,
		flavor: ProviderKind,
		vault: Arc<SecretVault>,
	) -> Result<Self> {
		let server = config.name.clone();
		let token_endpoint = config
			.token_endpoint
			.clone()
			.ok_or_else(|| ConfigError::MissingTokenEndpoint { server: server.clone(), flavor })?;
		let client_id = config
			.client_id
			.clone()
			.ok_or_else(|| ConfigError::MissingClientId { server: server.clone(), flavor })?;
		let secret = config
			.client_secret
			.as_ref()
			.ok_or_else(|| ConfigError::MissingClientSecret { server: server.clone(), flavor })?;
		let client_secret = vault.seal(secret.expose())?;
		let scope = match flavor {
			ProviderKind::Azure => config.scope.as_deref().map(azure_scope),
			_ => config.scope.clone(),
		};
		let http = http::build_acquisition_client(&server, &config.tls, config.request_timeout)?;

		Ok(Self {
			server,
			flavor,
			http,
			vault,
			token_endpoint,
			client_id,
			client_secret,
			scope,
			timeout: config.request_timeout,
		})
	}

	/// Performs the exchange and parses the token response.
	pub async fn acquire(&self) -> Result<IssuedToken> {
		let secret = self.vault.open(&self.client_secret)?;
		let mut form = vec![
			("grant_type", CLIENT_CREDENTIALS_GRANT.to_owned()),
			("client_id", self.client_id.clone()),
			("client_secret", secret.expose().to_owned()),
		];

		if let Some(scope) = &self.scope {
			form.push(("scope", scope.clone()));
		}

		let response = self
			.http
			.post(self.token_endpoint.clone())
			.form(&form)
			.send()
			.await
			.map_err(|e| self.fail(map_transport_error(e, self.timeout)))?;

		read_token_response(response, self.timeout).await.map_err(|cause| self.fail(cause))
	}

	fn fail(&self, cause: AcquireCause) -> Error {
		acquisition_failure(&self.server, self.flavor, cause)
	}
}
impl Debug for ClientCredentialsExchange {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientCredentialsExchange")
			.field("server", &self.server)
			.field("flavor", &self.flavor)
			.field("token_endpoint", &self.token_endpoint.as_str())
			.field("client_id", &self.client_id)
			.field("scope", &self.scope)
			.finish()
	}
}

// Azure's client-credentials grant expects resource-style scopes ending in `/.default`.
fn azure_scope(scope: &str) -> String {
	if scope.ends_with(AZURE_DEFAULT_SCOPE_SUFFIX) {
		scope.to_owned()
	} else {
		format!("{}{}", scope.trim_end_matches('/'), AZURE_DEFAULT_SCOPE_SUFFIX)
	}
}

/// Google token source: signed service-account assertion, or the plain exchange.
#[derive(Debug)]
pub enum GoogleTokenSource {
	/// JWT-bearer assertion signed with a service-account key document.
	Assertion(GoogleAssertion),
	/// Plain client-credentials exchange for non-service-account setups.
	Exchange(ClientCredentialsExchange),
}
impl GoogleTokenSource {
	/// Chooses the mode from the secret's shape: a JSON document selects the assertion flow.
	pub fn from_config(config: &ServerConfig, vault: Arc<SecretVault>) -> Result<Self> {
		let secret = config.client_secret.as_ref().ok_or_else(|| {
			ConfigError::MissingClientSecret {
				server: config.name.clone(),
				flavor: ProviderKind::Google,
			}
		})?;

		if secret.expose().trim_start().starts_with('{') {
			Ok(Self::Assertion(GoogleAssertion::from_config(config, vault)?))
		} else {
			Ok(Self::Exchange(ClientCredentialsExchange::from_config(
				config,
				ProviderKind::Google,
				vault,
			)?))
		}
	}

	/// Performs the acquisition via the selected mode.
	pub async fn acquire(&self) -> Result<IssuedToken> {
		match self {
			Self::Assertion(assertion) => assertion.acquire().await,
			Self::Exchange(exchange) => exchange.acquire().await,
		}
	}
}

// Subset of a Google service-account key document the assertion flow needs.
#[derive(Deserialize)]
struct ServiceAccountKey {
	client_email: String,
	private_key: String,
	#[serde(default)]
	token_uri: Option<String>,
}

/// Signed JWT-bearer assertion grant against Google's token endpoint.
pub struct GoogleAssertion {
	server: ServerName,
	http: ReqwestClient,
	vault: Arc<SecretVault>,
	token_endpoint: Url,
	key_document: SealedSecret,
	scope: Option<String>,
	timeout: Duration,
}
impl GoogleAssertion {
	/// Parses and validates the key document, then seals it into the vault.
	pub fn from_config(config: &ServerConfig, vault: Arc<SecretVault>) -> Result<Self> {
		let server = config.name.clone();
		let invalid_key = || ConfigError::InvalidServiceAccountKey { server: server.clone() };
		let secret = config
			.client_secret
			.as_ref()
			.ok_or_else(|| ConfigError::MissingClientSecret {
				server: server.clone(),
				flavor: ProviderKind::Google,
			})?;
		let key: ServiceAccountKey =
			serde_json::from_str(secret.expose()).map_err(|_| invalid_key())?;

		// Surface an unusable signing key at startup, not on the first refresh.
		EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|_| invalid_key())?;

		let token_endpoint = match (config.token_endpoint.clone(), key.token_uri.as_deref()) {
			(Some(endpoint), _) => endpoint,
			(None, Some(uri)) => Url::parse(uri).map_err(|_| invalid_key())?,
			(None, None) => Url::parse(GOOGLE_TOKEN_ENDPOINT).map_err(|_| invalid_key())?,
		};
		let key_document = vault.seal(secret.expose())?;
		let http = http::build_acquisition_client(&server, &config.tls, config.request_timeout)?;

		Ok(Self {
			server,
			http,
			vault,
			token_endpoint,
			key_document,
			scope: config.scope.clone(),
			timeout: config.request_timeout,
		})
	}

	/// Signs a fresh assertion and exchanges it for an access token.
	pub async fn acquire(&self) -> Result<IssuedToken> {
		let document = self.vault.open(&self.key_document)?;
		let key: ServiceAccountKey =
			serde_json::from_str(document.expose()).map_err(|_| {
				self.fail(AcquireCause::IdentitySource {
					message: "sealed service-account key did not re-parse".into(),
				})
			})?;
		let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
			.map_err(|e| self.fail(AcquireCause::AssertionSigning { source: Arc::new(e) }))?;
		let now = OffsetDateTime::now_utc().unix_timestamp();
		let mut claims = json!({
			"iss": key.client_email,
			"aud": self.token_endpoint.as_str(),
			"iat": now,
			"exp": now + ASSERTION_LIFETIME.whole_seconds(),
		});

		if let Some(scope) = &self.scope {
			claims["scope"] = json!(scope);
		}

		let assertion =
			jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
				.map_err(|e| self.fail(AcquireCause::AssertionSigning { source: Arc::new(e) }))?;
		let form =
			vec![("grant_type", ASSERTION_GRANT.to_owned()), ("assertion", assertion)];
		let response = self
			.http
			.post(self.token_endpoint.clone())
			.form(&form)
			.send()
			.await
			.map_err(|e| self.fail(map_transport_error(e, self.timeout)))?;

		read_token_response(response, self.timeout).await.map_err(|cause| self.fail(cause))
	}

	fn fail(&self, cause: AcquireCause) -> Error {
		acquisition_failure(&self.server, ProviderKind::Google, cause)
	}
}
impl Debug for GoogleAssertion {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("GoogleAssertion")
			.field("server", &self.server)
			.field("token_endpoint", &self.token_endpoint.as_str())
			.field("scope", &self.scope)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn azure_scopes_gain_the_default_suffix_once() {
		assert_eq!(azure_scope("api://dicomweb-proxy"), "api://dicomweb-proxy/.default");
		assert_eq!(azure_scope("api://dicomweb-proxy/"), "api://dicomweb-proxy/.default");
		assert_eq!(azure_scope("api://dicomweb-proxy/.default"), "api://dicomweb-proxy/.default");
	}

	#[test]
	fn google_mode_selection_follows_the_secret_shape() {
		let json_secret = r#"{"private_key":"not-a-real-key"}"#;

		assert!(json_secret.trim_start().starts_with('{'));
		assert!(!"plain-client-secret".trim_start().starts_with('{'));
	}
}
