//! Token lifecycle engine for DICOMweb gateways—per-upstream caching, single-flight refresh,
//! pluggable identity providers, JWT validation, and request rate limiting in one crate.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod config;
pub mod error;
pub mod http;
pub mod ids;
pub mod jwt;
pub mod manager;
pub mod obs;
pub mod provider;
pub mod rate_limit;
pub mod token;
pub mod vault;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		config::{ProviderKind, ServerConfig, ServerRegistry, TlsMode},
		ids::ServerName,
		manager::TokenManager,
	};

	/// Builds a generic client-credentials [`ServerConfig`] aimed at a mock token endpoint.
	pub fn test_server_config(name: &str, token_endpoint: &str) -> ServerConfig {
		ServerConfig::builder(
			ServerName::new(name).expect("Test server name should be valid."),
			format!("https://pacs.example.test/{name}/dicom-web"),
		)
		.provider(ProviderKind::Generic)
		.token_endpoint(token_endpoint)
		.client_id("test-client")
		.client_secret("test-secret")
		.tls(TlsMode::NoVerify)
		.build()
		.expect("Test server config should build successfully.")
	}

	/// Constructs a [`TokenManager`] from the provided configs with default detection rules.
	pub fn build_test_manager<I>(configs: I) -> TokenManager
	where
		I: IntoIterator<Item = ServerConfig>,
	{
		let registry =
			ServerRegistry::new(configs).expect("Test server registry should validate cleanly.");

		TokenManager::new(registry).expect("Test token manager should build successfully.")
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use time;
pub use url;
#[cfg(test)] use {dicomweb_token_broker as _, httpmock as _, tokio as _};
