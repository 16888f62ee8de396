//! Platform identity sources: Azure managed identity and AWS role credentials.
//!
//! Neither flavor holds a client secret; the platform vouches for the workload. Metadata
//! endpoints default to the well-known link-local addresses and can be overridden for
//! hermetic tests.

// std
use std::env;
// crates.io
use time::format_description::well_known::Rfc3339;
// self
use crate::{
	_prelude::*,
	config::{ProviderKind, ServerConfig},
	error::{AcquireCause, ConfigError},
	http,
	ids::ServerName,
	provider::{
		acquisition_failure, map_transport_error, read_token_response, truncate_preview,
	},
	token::IssuedToken,
	vault::{SealedSecret, SecretVault},
};

const IMDS_IDENTITY_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_IDENTITY_API_VERSION: &str = "2018-02-01";
const WORKLOAD_IDENTITY_API_VERSION: &str = "2019-08-01";
const IDENTITY_HEADER_NAME: &str = "X-IDENTITY-HEADER";
const AZURE_DEFAULT_SCOPE_SUFFIX: &str = "/.default";

const ECS_CREDENTIALS_BASE: &str = "http://169.254.170.2";
const EC2_METADATA_BASE: &str = "http://169.254.169.254";
const IMDS_TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const IMDS_TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const IMDS_SESSION_TTL_SECS: &str = "21600";

/// Azure managed-identity token source.
///
/// Prefers the workload-identity endpoint announced through `IDENTITY_ENDPOINT` /
/// `IDENTITY_HEADER`; falls back to the instance-metadata service otherwise. The only
/// configured input is the scope, which is translated to a `resource` query parameter.
pub struct ManagedIdentitySource {
	server: ServerName,
	http: ReqwestClient,
	vault: Arc<SecretVault>,
	endpoint: Url,
	api_version: &'static str,
	identity_header: Option<SealedSecret>,
	resource: String,
	timeout: Duration,
}
impl ManagedIdentitySource {
	/// Builds the source, reading the platform environment once.
	pub fn from_config(config: &ServerConfig, vault: Arc<SecretVault>) -> Result<Self> {
		let server = config.name.clone();
		let scope = config.scope.as_deref().ok_or_else(|| ConfigError::MissingScope {
			server: server.clone(),
			flavor: ProviderKind::AzureManagedIdentity,
		})?;
		let resource = scope.strip_suffix(AZURE_DEFAULT_SCOPE_SUFFIX).unwrap_or(scope).to_owned();
		let workload = match (env::var("IDENTITY_ENDPOINT"), env::var("IDENTITY_HEADER")) {
			(Ok(endpoint), Ok(header)) => Some((endpoint, header)),
			_ => None,
		};
		let (endpoint, api_version, identity_header) = match workload {
			Some((raw, header)) => {
				let endpoint =
					Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl {
						server: server.clone(),
						field: "identity endpoint",
						value: raw.clone(),
						source,
					})?;

				(endpoint, WORKLOAD_IDENTITY_API_VERSION, Some(vault.seal(&header)?))
			},
			None => {
				let endpoint = Url::parse(IMDS_IDENTITY_ENDPOINT).map_err(|source| {
					ConfigError::InvalidUrl {
						server: server.clone(),
						field: "identity endpoint",
						value: IMDS_IDENTITY_ENDPOINT.into(),
						source,
					}
				})?;

				(endpoint, IMDS_IDENTITY_API_VERSION, None)
			},
		};
		let http = http::build_acquisition_client(&server, &config.tls, config.request_timeout)?;

		Ok(Self {
			server,
			http,
			vault,
			endpoint,
			api_version,
			identity_header,
			resource,
			timeout: config.request_timeout,
		})
	}

	/// Overrides the identity endpoint; used by tests to point at a mock service.
	pub fn with_endpoint(mut self, endpoint: Url) -> Self {
		self.endpoint = endpoint;

		self
	}

	/// Queries the identity endpoint for a token scoped to the configured resource.
	pub async fn acquire(&self) -> Result<IssuedToken> {
		let mut request = self
			.http
			.get(self.endpoint.clone())
			.query(&[("api-version", self.api_version), ("resource", self.resource.as_str())]);

		request = match &self.identity_header {
			Some(sealed) => {
				let header = self.vault.open(sealed)?;

				request.header(IDENTITY_HEADER_NAME, header.expose())
			},
			None => request.header("Metadata", "true"),
		};

		let response = request
			.send()
			.await
			.map_err(|e| self.fail(map_transport_error(e, self.timeout)))?;

		read_token_response(response, self.timeout).await.map_err(|cause| self.fail(cause))
	}

	fn fail(&self, cause: AcquireCause) -> Error {
		acquisition_failure(&self.server, ProviderKind::AzureManagedIdentity, cause)
	}
}
impl Debug for ManagedIdentitySource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ManagedIdentitySource")
			.field("server", &self.server)
			.field("endpoint", &self.endpoint.as_str())
			.field("api_version", &self.api_version)
			.field("workload_identity", &self.identity_header.is_some())
			.field("resource", &self.resource)
			.finish()
	}
}

/// How AWS role credentials are reached.
#[derive(Clone, Debug)]
pub enum AwsCredentialRoute {
	/// Container credentials endpoint (ECS/EKS task roles).
	Container {
		/// Full credentials URI.
		endpoint: Url,
	},
	/// EC2 instance-role credentials via IMDSv2.
	InstanceRole {
		/// Metadata service base URL.
		base: Url,
	},
}

// The subset of an AWS credentials document the engine forwards. The static key material in the
// same document is deliberately never deserialized.
#[derive(Deserialize)]
struct RoleCredentials {
	#[serde(rename = "Token")]
	token: String,
	#[serde(rename = "Expiration")]
	expiration: String,
}

/// AWS role-credential token source.
pub struct AwsRoleSource {
	server: ServerName,
	http: ReqwestClient,
	route: AwsCredentialRoute,
	timeout: Duration,
}
impl AwsRoleSource {
	/// Builds the source, choosing the route from the container environment.
	pub fn from_config(config: &ServerConfig) -> Result<Self> {
		let server = config.name.clone();
		let parse = |raw: &str| {
			Url::parse(raw).map_err(|source| ConfigError::InvalidUrl {
				server: server.clone(),
				field: "credentials endpoint",
				value: raw.into(),
				source,
			})
		};
		let route = if let Ok(full) = env::var("AWS_CONTAINER_CREDENTIALS_FULL_URI") {
			AwsCredentialRoute::Container { endpoint: parse(&full)? }
		} else if let Ok(relative) = env::var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI") {
			AwsCredentialRoute::Container {
				endpoint: parse(&format!("{ECS_CREDENTIALS_BASE}{relative}"))?,
			}
		} else {
			AwsCredentialRoute::InstanceRole { base: parse(EC2_METADATA_BASE)? }
		};
		let http = http::build_acquisition_client(&server, &config.tls, config.request_timeout)?;

		Ok(Self { server, http, route, timeout: config.request_timeout })
	}

	/// Overrides the credential route; used by tests to point at a mock service.
	pub fn with_route(mut self, route: AwsCredentialRoute) -> Self {
		self.route = route;

		self
	}

	/// Obtains role credentials and surfaces the session token as a bearer credential.
	pub async fn acquire(&self) -> Result<IssuedToken> {
		let response = match &self.route {
			AwsCredentialRoute::Container { endpoint } => self
				.http
				.get(endpoint.clone())
				.send()
				.await
				.map_err(|e| self.fail(map_transport_error(e, self.timeout)))?,
			AwsCredentialRoute::InstanceRole { base } => {
				let session = self.imds_session(base).await?;
				let role = self.role_name(base, &session).await?;
				let url = self.join(base, &format!(
					"/latest/meta-data/iam/security-credentials/{role}"
				))?;

				self.http
					.get(url)
					.header(IMDS_TOKEN_HEADER, session.as_str())
					.send()
					.await
					.map_err(|e| self.fail(map_transport_error(e, self.timeout)))?
			},
		};

		self.read_credentials(response).await
	}

	// IMDSv2 requires a short-lived session token before any metadata read.
	async fn imds_session(&self, base: &Url) -> Result<String> {
		let url = self.join(base, "/latest/api/token")?;
		let response = self
			.http
			.put(url)
			.header(IMDS_TOKEN_TTL_HEADER, IMDS_SESSION_TTL_SECS)
			.send()
			.await
			.map_err(|e| self.fail(map_transport_error(e, self.timeout)))?;
		let status = response.status();

		if !status.is_success() {
			return Err(self.fail(AcquireCause::IdentitySource {
				message: format!("metadata session request returned HTTP {}", status.as_u16()),
			}));
		}

		response.text().await.map_err(|e| self.fail(map_transport_error(e, self.timeout)))
	}

	async fn role_name(&self, base: &Url, session: &str) -> Result<String> {
		let url = self.join(base, "/latest/meta-data/iam/security-credentials/")?;
		let response = self
			.http
			.get(url)
			.header(IMDS_TOKEN_HEADER, session)
			.send()
			.await
			.map_err(|e| self.fail(map_transport_error(e, self.timeout)))?;
		let status = response.status();

		if !status.is_success() {
			return Err(self.fail(AcquireCause::IdentitySource {
				message: format!("role listing returned HTTP {}", status.as_u16()),
			}));
		}

		let listing =
			response.text().await.map_err(|e| self.fail(map_transport_error(e, self.timeout)))?;
		let role = listing.lines().next().unwrap_or("").trim().to_owned();

		if role.is_empty() {
			return Err(self.fail(AcquireCause::IdentitySource {
				message: "no IAM role is attached to this instance".into(),
			}));
		}

		Ok(role)
	}

	async fn read_credentials(&self, response: reqwest::Response) -> Result<IssuedToken> {
		let status = response.status();
		let body =
			response.text().await.map_err(|e| self.fail(map_transport_error(e, self.timeout)))?;

		if !status.is_success() {
			return Err(self.fail(AcquireCause::Endpoint {
				status: status.as_u16(),
				body_preview: truncate_preview(body),
			}));
		}

		let mut deserializer = serde_json::Deserializer::from_str(&body);
		let credentials: RoleCredentials = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|e| self.fail(AcquireCause::ResponseParse { source: Arc::new(e) }))?;
		let expires_at =
			OffsetDateTime::parse(&credentials.expiration, &Rfc3339).map_err(|_| {
				self.fail(AcquireCause::InvalidExpiration { value: credentials.expiration.clone() })
			})?;
		let expires_in = expires_at - OffsetDateTime::now_utc();

		if !expires_in.is_positive() {
			return Err(self.fail(AcquireCause::NonPositiveExpiresIn {
				value: expires_in.whole_seconds(),
			}));
		}

		Ok(IssuedToken {
			access_token: credentials.token.into(),
			expires_in,
			token_type: Some("Bearer".into()),
		})
	}

	fn join(&self, base: &Url, path: &str) -> Result<Url> {
		base.join(path).map_err(|_| {
			self.fail(AcquireCause::IdentitySource {
				message: format!("metadata path `{path}` does not join onto the base URL"),
			})
		})
	}

	fn fail(&self, cause: AcquireCause) -> Error {
		acquisition_failure(&self.server, ProviderKind::Aws, cause)
	}
}
impl Debug for AwsRoleSource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AwsRoleSource")
			.field("server", &self.server)
			.field("route", &self.route)
			.finish()
	}
}
