//! HTTP transport construction for provider acquisition calls.
//!
//! Token requests do not follow redirects, matching OAuth 2.0 guidance that token endpoints
//! return results directly instead of delegating to another URI. Every client is bounded by the
//! server's configured request timeout so a hung endpoint cannot pin the refresh gate.

// std
use std::fs;
// crates.io
use reqwest::{Certificate, redirect::Policy};
// self
use crate::{_prelude::*, config::TlsMode, error::ConfigError, ids::ServerName};

/// Builds the per-server HTTP client used for token acquisition.
pub fn build_acquisition_client(
	server: &ServerName,
	tls: &TlsMode,
	timeout: Duration,
) -> Result<ReqwestClient, ConfigError> {
	let mut builder =
		ReqwestClient::builder().redirect(Policy::none()).timeout(timeout.unsigned_abs());

	match tls {
		TlsMode::Verify => {},
		TlsMode::NoVerify => builder = builder.danger_accept_invalid_certs(true),
		TlsMode::CaBundle(path) => {
			let bytes = fs::read(path).map_err(|e| ConfigError::CaBundle {
				server: server.clone(),
				path: path.display().to_string(),
				message: e.to_string(),
			})?;
			let certificates =
				Certificate::from_pem_bundle(&bytes).map_err(|e| ConfigError::CaBundle {
					server: server.clone(),
					path: path.display().to_string(),
					message: e.to_string(),
				})?;

			for certificate in certificates {
				builder = builder.add_root_certificate(certificate);
			}
		},
	}

	builder.build().map_err(|e| ConfigError::HttpClientBuild {
		server: server.clone(),
		source: Arc::new(e),
	})
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::ids::ServerName;

	#[test]
	fn verify_and_noverify_modes_build() {
		let server = ServerName::new("pacs-http").expect("Server fixture should be valid.");

		build_acquisition_client(&server, &TlsMode::Verify, Duration::seconds(30))
			.expect("Default TLS mode should build.");
		build_acquisition_client(&server, &TlsMode::NoVerify, Duration::seconds(30))
			.expect("Insecure TLS mode should build.");
	}

	#[test]
	fn missing_ca_bundle_is_a_config_error() {
		let server = ServerName::new("pacs-http").expect("Server fixture should be valid.");
		let err = build_acquisition_client(
			&server,
			&TlsMode::CaBundle("/nonexistent/bundle.pem".into()),
			Duration::seconds(30),
		)
		.expect_err("A missing bundle must surface as a config error.");

		assert!(matches!(err, ConfigError::CaBundle { .. }));
	}
}
