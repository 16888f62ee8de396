//! Server configuration model and the validated registry the engine is built from.
//!
//! Configs arrive fully resolved (environment substitution applied) from an external loader;
//! this module owns only the semantic validation: URL well-formedness, per-flavor required
//! fields, name uniqueness, and base-URL prefix ambiguity.

// std
use std::path::PathBuf;
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	ids::ServerName,
	jwt::JwtParams,
	provider::FlavorDetector,
	vault::SecretString,
};

/// Seconds of lifetime left at which a proactive refresh is triggered.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::seconds(300);
/// Upper bound on any single provider acquisition call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::seconds(30);

/// Identity-provider flavor a server authenticates against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
	/// Plain OAuth2 client-credentials exchange.
	#[default]
	Generic,
	/// Azure AD client-credentials exchange.
	Azure,
	/// Azure platform-managed identity; no client secret involved.
	AzureManagedIdentity,
	/// Google OAuth2, via service-account assertion or client credentials.
	Google,
	/// AWS platform role credentials.
	Aws,
	/// Keycloak realm-scoped client-credentials exchange.
	Keycloak,
	/// Infer the flavor from the token endpoint at registry build time.
	Auto,
}
impl ProviderKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Generic => "generic",
			Self::Azure => "azure",
			Self::AzureManagedIdentity => "azure-managed-identity",
			Self::Google => "google",
			Self::Aws => "aws",
			Self::Keycloak => "keycloak",
			Self::Auto => "auto",
		}
	}

	/// Flavors that exchange a client secret at a configured token endpoint.
	pub const fn uses_client_secret(self) -> bool {
		matches!(self, Self::Generic | Self::Azure | Self::Google | Self::Keycloak)
	}
}
impl Display for ProviderKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// TLS behavior for a server's outbound acquisition calls.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum TlsMode {
	/// Verify certificates against the system roots.
	#[default]
	Verify,
	/// Accept any certificate. Test environments only.
	NoVerify,
	/// Verify against a custom CA bundle at the given path.
	CaBundle(PathBuf),
}

/// Static per-upstream configuration, immutable once registered.
#[derive(Clone, Debug)]
pub struct ServerConfig {
	/// Unique server identifier; the registry map key.
	pub name: ServerName,
	/// DICOMweb endpoint this config applies to; matched by longest prefix against request URLs.
	pub base_url: Url,
	/// Identity-provider flavor; never [`ProviderKind::Auto`] after registry validation.
	pub provider: ProviderKind,
	/// OAuth2 token endpoint, when the flavor exchanges credentials itself.
	pub token_endpoint: Option<Url>,
	/// OAuth2 client identifier.
	pub client_id: Option<String>,
	/// OAuth2 client secret; redacted in all diagnostic output.
	pub client_secret: Option<SecretString>,
	/// Scope (or resource, for platform identities) to request.
	pub scope: Option<String>,
	/// Remaining lifetime below which a refresh is triggered proactively.
	pub refresh_buffer: Duration,
	/// Upper bound on any single acquisition call.
	pub request_timeout: Duration,
	/// TLS behavior for acquisition calls.
	pub tls: TlsMode,
	/// Optional JWT validation parameters for freshly acquired tokens.
	pub jwt: Option<JwtParams>,
}
impl ServerConfig {
	/// Returns a builder seeded with the two mandatory fields.
	pub fn builder(name: ServerName, base_url: impl Into<String>) -> ServerConfigBuilder {
		ServerConfigBuilder::new(name, base_url)
	}
}

/// Builder for [`ServerConfig`]; URL fields are validated in [`build`](Self::build).
#[derive(Clone, Debug)]
pub struct ServerConfigBuilder {
	name: ServerName,
	base_url: String,
	provider: ProviderKind,
	token_endpoint: Option<String>,
	client_id: Option<String>,
	client_secret: Option<SecretString>,
	scope: Option<String>,
	refresh_buffer: Duration,
	request_timeout: Duration,
	tls: TlsMode,
	jwt: Option<JwtParams>,
}
impl ServerConfigBuilder {
	fn new(name: ServerName, base_url: impl Into<String>) -> Self {
		Self {
			name,
			base_url: base_url.into(),
			provider: ProviderKind::Auto,
			token_endpoint: None,
			client_id: None,
			client_secret: None,
			scope: None,
			refresh_buffer: DEFAULT_REFRESH_BUFFER,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			tls: TlsMode::default(),
			jwt: None,
		}
	}

	/// Sets the provider flavor (defaults to auto-detection).
	pub fn provider(mut self, provider: ProviderKind) -> Self {
		self.provider = provider;

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: impl Into<String>) -> Self {
		self.token_endpoint = Some(url.into());

		self
	}

	/// Sets the client identifier.
	pub fn client_id(mut self, id: impl Into<String>) -> Self {
		self.client_id = Some(id.into());

		self
	}

	/// Sets the client secret.
	pub fn client_secret(mut self, secret: impl Into<SecretString>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Sets the scope (or resource) to request.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = Some(scope.into());

		self
	}

	/// Overrides the proactive refresh buffer (defaults to 300 seconds).
	pub fn refresh_buffer(mut self, buffer: Duration) -> Self {
		self.refresh_buffer = if buffer.is_negative() { Duration::ZERO } else { buffer };

		self
	}

	/// Overrides the acquisition request timeout (defaults to 30 seconds).
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Overrides the TLS mode.
	pub fn tls(mut self, tls: TlsMode) -> Self {
		self.tls = tls;

		self
	}

	/// Enables JWT validation with the provided parameters.
	pub fn jwt(mut self, params: JwtParams) -> Self {
		self.jwt = Some(params);

		self
	}

	/// Consumes the builder, parsing and checking the URL fields.
	pub fn build(self) -> Result<ServerConfig, ConfigError> {
		let base_url = parse_url(&self.name, "base", &self.base_url)?;
		let token_endpoint = self
			.token_endpoint
			.as_deref()
			.map(|raw| parse_url(&self.name, "token endpoint", raw))
			.transpose()?;

		Ok(ServerConfig {
			name: self.name,
			base_url,
			provider: self.provider,
			token_endpoint,
			client_id: self.client_id,
			client_secret: self.client_secret,
			scope: self.scope,
			refresh_buffer: self.refresh_buffer,
			request_timeout: self.request_timeout,
			tls: self.tls,
			jwt: self.jwt,
		})
	}
}

/// Validated, immutable mapping from server name to config, with request-URL routing.
#[derive(Clone, Debug)]
pub struct ServerRegistry {
	configs: HashMap<ServerName, ServerConfig>,
	// Normalized base-URL prefixes, longest first.
	prefixes: Vec<(String, ServerName)>,
}
impl ServerRegistry {
	/// Builds a registry with the default flavor-detection rules.
	pub fn new<I>(configs: I) -> Result<Self, ConfigError>
	where
		I: IntoIterator<Item = ServerConfig>,
	{
		Self::with_detector(configs, &FlavorDetector::default())
	}

	/// Builds a registry, resolving `auto` flavors through the provided detector.
	pub fn with_detector<I>(configs: I, detector: &FlavorDetector) -> Result<Self, ConfigError>
	where
		I: IntoIterator<Item = ServerConfig>,
	{
		let mut map = HashMap::new();
		let mut prefixes: Vec<(String, ServerName)> = Vec::new();

		for mut config in configs {
			if config.provider == ProviderKind::Auto {
				let endpoint = config.token_endpoint.as_ref().ok_or_else(|| {
					ConfigError::AutoDetectWithoutEndpoint { server: config.name.clone() }
				})?;

				config.provider = detector.detect(endpoint);
			}

			validate_required_fields(&config)?;

			if map.contains_key(&config.name) {
				return Err(ConfigError::DuplicateServer { server: config.name });
			}

			let prefix = normalize_prefix(config.base_url.as_str());

			for (existing_prefix, existing_name) in &prefixes {
				if prefix.starts_with(existing_prefix.as_str())
					|| existing_prefix.starts_with(prefix.as_str())
				{
					return Err(ConfigError::AmbiguousBaseUrl {
						first: existing_name.clone(),
						second: config.name.clone(),
					});
				}
			}

			prefixes.push((prefix, config.name.clone()));
			map.insert(config.name.clone(), config);
		}

		prefixes.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));

		Ok(Self { configs: map, prefixes })
	}

	/// Looks up a config by server name.
	pub fn get(&self, name: &ServerName) -> Option<&ServerConfig> {
		self.configs.get(name)
	}

	/// Looks up a config, failing with [`ConfigError::UnknownServer`] when absent.
	pub fn require(&self, name: &ServerName) -> Result<&ServerConfig, ConfigError> {
		self.get(name).ok_or_else(|| ConfigError::UnknownServer { server: name.clone() })
	}

	/// Resolves an outgoing request URL to its server by longest-prefix match.
	pub fn resolve(&self, request_url: &str) -> Option<&ServerName> {
		let normalized = normalize_prefix(request_url);

		self.prefixes
			.iter()
			.find(|(prefix, _)| normalized.starts_with(prefix.as_str()))
			.map(|(_, name)| name)
	}

	/// Iterates over all registered configs.
	pub fn iter(&self) -> impl Iterator<Item = &ServerConfig> {
		self.configs.values()
	}

	/// Iterates over all registered server names.
	pub fn names(&self) -> impl Iterator<Item = &ServerName> {
		self.configs.keys()
	}

	/// Number of registered servers.
	pub fn len(&self) -> usize {
		self.configs.len()
	}

	/// Returns `true` when no servers are registered.
	pub fn is_empty(&self) -> bool {
		self.configs.is_empty()
	}
}

fn parse_url(server: &ServerName, field: &'static str, raw: &str) -> Result<Url, ConfigError> {
	let url = Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
		server: server.clone(),
		field,
		value: raw.into(),
		source,
	})?;

	if !matches!(url.scheme(), "http" | "https") {
		return Err(ConfigError::UnsupportedScheme {
			server: server.clone(),
			field,
			value: raw.into(),
		});
	}

	Ok(url)
}

fn validate_required_fields(config: &ServerConfig) -> Result<(), ConfigError> {
	let server = || config.name.clone();
	let flavor = config.provider;

	if flavor.uses_client_secret() {
		let secret = config
			.client_secret
			.as_ref()
			.ok_or_else(|| ConfigError::MissingClientSecret { server: server(), flavor })?;
		// Google's assertion mode carries both the identity and the token URI inside the
		// service-account key document.
		let google_assertion = flavor == ProviderKind::Google
			&& secret.expose().trim_start().starts_with('{');

		if config.token_endpoint.is_none() && !google_assertion {
			return Err(ConfigError::MissingTokenEndpoint { server: server(), flavor });
		}
		if flavor != ProviderKind::Google && config.client_id.is_none() {
			return Err(ConfigError::MissingClientId { server: server(), flavor });
		}
	}
	if flavor == ProviderKind::AzureManagedIdentity && config.scope.is_none() {
		return Err(ConfigError::MissingScope { server: server(), flavor });
	}

	Ok(())
}

// Trailing slash keeps `/dicom-web` from matching `/dicom-web2` requests.
fn normalize_prefix(url: &str) -> String {
	let trimmed = url.trim_end_matches('/');

	format!("{trimmed}/")
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn name(value: &str) -> ServerName {
		ServerName::new(value).expect("Server fixture should be valid.")
	}

	fn generic(server: &str, base: &str) -> ServerConfig {
		ServerConfig::builder(name(server), base)
			.provider(ProviderKind::Generic)
			.token_endpoint("https://idp.example.test/token")
			.client_id("client")
			.client_secret("secret")
			.build()
			.expect("Generic config fixture should build.")
	}

	#[test]
	fn builder_applies_defaults_and_parses_urls() {
		let config = generic("pacs-a", "https://pacs-a.example.test/dicom-web");

		assert_eq!(config.refresh_buffer, DEFAULT_REFRESH_BUFFER);
		assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
		assert_eq!(config.tls, TlsMode::Verify);
		assert_eq!(config.base_url.host_str(), Some("pacs-a.example.test"));
	}

	#[test]
	fn builder_rejects_malformed_and_non_http_urls() {
		let err = ServerConfig::builder(name("bad"), "not a url")
			.build()
			.expect_err("Malformed base URL must be rejected.");

		assert!(matches!(err, ConfigError::InvalidUrl { field: "base", .. }));

		let err = ServerConfig::builder(name("bad"), "ftp://pacs.example.test/")
			.build()
			.expect_err("Non-HTTP schemes must be rejected.");

		assert!(matches!(err, ConfigError::UnsupportedScheme { .. }));
	}

	#[test]
	fn registry_rejects_duplicates_and_ambiguous_prefixes() {
		let err = ServerRegistry::new([
			generic("pacs-a", "https://pacs.example.test/a"),
			generic("pacs-a", "https://pacs.example.test/b"),
		])
		.expect_err("Duplicate names must be rejected.");

		assert!(matches!(err, ConfigError::DuplicateServer { .. }));

		let err = ServerRegistry::new([
			generic("outer", "https://pacs.example.test/dicom-web"),
			generic("inner", "https://pacs.example.test/dicom-web/studies"),
		])
		.expect_err("Prefix-ambiguous base URLs must be rejected.");

		assert!(matches!(err, ConfigError::AmbiguousBaseUrl { .. }));
	}

	#[test]
	fn sibling_paths_are_not_ambiguous() {
		let registry = ServerRegistry::new([
			generic("a", "https://pacs.example.test/dicom-web"),
			generic("b", "https://pacs.example.test/dicom-web2"),
		])
		.expect("Sibling paths should be accepted.");

		assert_eq!(
			registry.resolve("https://pacs.example.test/dicom-web/studies/1.2.3"),
			Some(&name("a")),
		);
		assert_eq!(
			registry.resolve("https://pacs.example.test/dicom-web2/studies/1.2.3"),
			Some(&name("b")),
		);
		assert_eq!(registry.resolve("https://unrelated.example.test/studies"), None);
	}

	#[test]
	fn auto_detection_requires_an_endpoint() {
		let config = ServerConfig::builder(name("auto"), "https://pacs.example.test/dw")
			.client_id("client")
			.client_secret("secret")
			.build()
			.expect("Config should build before registry validation.");
		let err = ServerRegistry::new([config])
			.expect_err("Auto detection without an endpoint must be rejected.");

		assert!(matches!(err, ConfigError::AutoDetectWithoutEndpoint { .. }));
	}

	#[test]
	fn auto_detection_resolves_known_hosts() {
		let config = ServerConfig::builder(name("azure-pacs"), "https://pacs.example.test/dw")
			.token_endpoint("https://login.microsoftonline.com/tenant-id/oauth2/v2.0/token")
			.client_id("client")
			.client_secret("secret")
			.build()
			.expect("Config should build.");
		let registry = ServerRegistry::new([config]).expect("Registry should validate.");
		let resolved = registry
			.require(&name("azure-pacs"))
			.expect("The registered server should be present.");

		assert_eq!(resolved.provider, ProviderKind::Azure);
	}

	#[test]
	fn required_fields_follow_the_flavor() {
		let err = ServerRegistry::new([ServerConfig::builder(
			name("no-secret"),
			"https://pacs.example.test/dw",
		)
		.provider(ProviderKind::Keycloak)
		.token_endpoint("https://kc.example.test/realms/pacs/protocol/openid-connect/token")
		.client_id("client")
		.build()
		.expect("Config should build.")])
		.expect_err("Missing secret must be rejected.");

		assert!(matches!(err, ConfigError::MissingClientSecret { .. }));

		let err = ServerRegistry::new([ServerConfig::builder(
			name("no-scope"),
			"https://pacs.example.test/dw",
		)
		.provider(ProviderKind::AzureManagedIdentity)
		.build()
		.expect("Config should build.")])
		.expect_err("Managed identity without scope must be rejected.");

		assert!(matches!(err, ConfigError::MissingScope { .. }));

		ServerRegistry::new([ServerConfig::builder(name("aws"), "https://pacs.example.test/dw")
			.provider(ProviderKind::Aws)
			.build()
			.expect("Config should build.")])
		.expect("AWS flavor needs no endpoint fields.");
	}

	#[test]
	fn unknown_server_lookup_fails() {
		let registry =
			ServerRegistry::new(Vec::<ServerConfig>::new()).expect("Empty registry should validate.");
		let err = registry
			.require(&name("ghost"))
			.expect_err("Unknown server lookups must fail.");

		assert!(matches!(err, ConfigError::UnknownServer { .. }));
	}
}
