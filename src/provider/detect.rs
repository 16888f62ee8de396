//! Deterministic provider-flavor detection from token endpoint URLs.
//!
//! Misclassification silently changes the request shape, so the rules are an ordered,
//! caller-overridable list instead of hard-coded branches: the first matching rule wins, and
//! rules added through [`FlavorDetector::with_rule`] are consulted before the defaults.

// self
use crate::{_prelude::*, config::ProviderKind};

/// One host- or path-matching rule.
///
/// A needle containing `/` matches against the endpoint path (substring); any other needle
/// matches the endpoint host exactly or as a parent domain (`example.com` covers
/// `login.example.com`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectionRule {
	needle: String,
	kind: ProviderKind,
}
impl DetectionRule {
	/// Creates a rule mapping the needle to a provider flavor.
	pub fn new(needle: impl Into<String>, kind: ProviderKind) -> Self {
		Self { needle: needle.into(), kind }
	}

	fn matches(&self, endpoint: &Url) -> bool {
		if self.needle.contains('/') {
			return endpoint.path().contains(&self.needle);
		}

		endpoint
			.host_str()
			.is_some_and(|host| host == self.needle || host.ends_with(&format!(".{}", self.needle)))
	}
}

/// Ordered rule list resolving `auto` provider configs to a concrete flavor.
#[derive(Clone, Debug)]
pub struct FlavorDetector {
	rules: Vec<DetectionRule>,
}
impl FlavorDetector {
	/// Creates a detector from a caller-supplied rule list, replacing the defaults entirely.
	pub fn new(rules: Vec<DetectionRule>) -> Self {
		Self { rules }
	}

	/// Prepends a rule so it takes precedence over every existing one.
	pub fn with_rule(mut self, rule: DetectionRule) -> Self {
		self.rules.insert(0, rule);

		self
	}

	/// Maps a token endpoint to a flavor; unmatched endpoints fall back to generic.
	pub fn detect(&self, endpoint: &Url) -> ProviderKind {
		self.rules
			.iter()
			.find(|rule| rule.matches(endpoint))
			.map_or(ProviderKind::Generic, |rule| rule.kind)
	}
}
impl Default for FlavorDetector {
	fn default() -> Self {
		Self::new(vec![
			DetectionRule::new("login.microsoftonline.com", ProviderKind::Azure),
			DetectionRule::new("login.windows.net", ProviderKind::Azure),
			DetectionRule::new("sts.windows.net", ProviderKind::Azure),
			DetectionRule::new("oauth2.googleapis.com", ProviderKind::Google),
			DetectionRule::new("accounts.google.com", ProviderKind::Google),
			DetectionRule::new("amazonaws.com", ProviderKind::Aws),
			DetectionRule::new("/realms/", ProviderKind::Keycloak),
		])
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("Detection fixture URL should parse.")
	}

	#[test]
	fn default_rules_cover_the_known_hosts() {
		let detector = FlavorDetector::default();

		assert_eq!(
			detector.detect(&url("https://login.microsoftonline.com/tenant/oauth2/v2.0/token")),
			ProviderKind::Azure,
		);
		assert_eq!(
			detector.detect(&url("https://oauth2.googleapis.com/token")),
			ProviderKind::Google,
		);
		assert_eq!(
			detector.detect(&url("https://sts.eu-west-1.amazonaws.com/")),
			ProviderKind::Aws,
		);
		assert_eq!(
			detector.detect(&url(
				"https://kc.example.test/realms/pacs/protocol/openid-connect/token"
			)),
			ProviderKind::Keycloak,
		);
		assert_eq!(
			detector.detect(&url("https://idp.example.test/oauth/token")),
			ProviderKind::Generic,
		);
	}

	#[test]
	fn host_rules_do_not_match_substrings() {
		let detector = FlavorDetector::default();

		// A look-alike host must not be classified as the real provider.
		assert_eq!(
			detector.detect(&url("https://evillogin.microsoftonline.com.attacker.test/token")),
			ProviderKind::Generic,
		);
	}

	#[test]
	fn custom_rules_take_precedence() {
		let detector = FlavorDetector::default()
			.with_rule(DetectionRule::new("login.microsoftonline.com", ProviderKind::Generic));

		assert_eq!(
			detector.detect(&url("https://login.microsoftonline.com/tenant/token")),
			ProviderKind::Generic,
		);
	}
}
