use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::Result;

/// Hand-maintained expectations for the deployment, loaded from
/// `expected.yaml`. The `global` section describes how node URLs are
/// assembled; the per-environment sections pin the values the checks
/// compare against.
#[derive(Debug, Clone, Deserialize)]
pub struct Expected {
    pub global: Global,
    /// App version pins, keyed by app id and then by environment name.
    #[serde(default)]
    pub apps: HashMap<String, HashMap<String, AppExpectation>>,
    /// Per-environment expectations keyed by environment name
    /// (`test`, `prod`, `localhost`, `custom`).
    #[serde(flatten)]
    pub environments: HashMap<String, Environment>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Global {
    pub base_url: String,
    pub test_prefix: String,
    /// Empty for deployments where the node name is the whole host prefix.
    #[serde(default)]
    pub node_prefix: String,
    #[serde(default)]
    pub doc_prefix: String,
    #[serde(default)]
    pub index_suffix: String,
    /// Whether the deployment runs a global site selector frontend.
    #[serde(default)]
    pub test_gss: bool,
    pub allnodes: Vec<String>,
    pub fullnodes: Vec<String>,
    #[serde(default)]
    pub multinodes: Vec<String>,
    /// Numeric suffixes of the Collabora document servers.
    #[serde(default)]
    pub doc_nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Environment {
    pub status: StatusExpectation,
    #[serde(default)]
    pub ocs_capabilities: Option<CapabilitiesExpectation>,
    #[serde(default)]
    pub saml: Option<SamlExpectation>,
    #[serde(default)]
    pub collabora: Option<CollaboraExpectation>,
}

/// Field-for-field expectations for `status.php`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusExpectation {
    pub maintenance: bool,
    pub needs_db_upgrade: bool,
    pub version: String,
    pub versionstring: String,
    pub edition: String,
    pub extended_support: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapabilitiesExpectation {
    pub ocs_meta_status: String,
    /// Meta statuscode on authenticated v1 calls.
    pub ocs_meta_statuscode: i64,
    /// Meta statuscode on the anonymous capabilities call.
    pub ocs_meta_statuscode_2: i64,
    pub ocs_meta_message: String,
    pub ocs_data_version_string: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamlExpectation {
    /// Lowercase hex SHA-256 of the base64 certificate body in the
    /// SP metadata.
    pub cert_digest: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollaboraExpectation {
    #[serde(default)]
    pub product_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppExpectation {
    pub version: String,
}

impl Expected {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let expected: Expected = serde_yaml::from_str(&raw)?;
        debug!(
            "Loaded expectations from {} ({} nodes, {} environments)",
            path.display(),
            expected.global.allnodes.len(),
            expected.environments.len()
        );
        Ok(expected)
    }

    pub fn environment(&self, name: &str) -> Option<&Environment> {
        self.environments.get(name)
    }

    /// Pinned version for `app` in `environment`, if any.
    pub fn app_version(&self, app: &str, environment: &str) -> Option<&str> {
        self.apps
            .get(app)
            .and_then(|per_env| per_env.get(environment))
            .map(|a| a.version.as_str())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const EXPECTED_YAML: &str = r#"
global:
  baseUrl: sunet.se
  testPrefix: test
  nodePrefix: drive
  docPrefix: doc
  indexSuffix: /index.php
  testGss: true
  allnodes: [extern, sunet, su, kth]
  fullnodes: [extern, sunet, su]
  multinodes: [sunet, su]
  docNodes: ["1", "2"]
test:
  status:
    maintenance: false
    needsDbUpgrade: false
    version: 29.0.16.1
    versionstring: 29.0.16
    edition: ''
    extendedSupport: false
  ocs_capabilities:
    ocs_meta_status: ok
    ocs_meta_statuscode: 100
    ocs_meta_statuscode_2: 200
    ocs_meta_message: OK
    ocs_data_version_string: 29.0.16
  saml:
    cert_digest: 6a0f1f4b4cc9f0312a119b38fd3b4d2be8b1c2b0a41f7f0a9f6d9a3a1b5c7d8e
prod:
  status:
    maintenance: false
    needsDbUpgrade: false
    version: 29.0.16.1
    versionstring: 29.0.16
    edition: ''
    extendedSupport: false
  ocs_capabilities:
    ocs_meta_status: ok
    ocs_meta_statuscode: 100
    ocs_meta_statuscode_2: 200
    ocs_meta_message: OK
    ocs_data_version_string: 29.0.16
apps:
  user_saml:
    test:
      version: 6.5.0
    prod:
      version: 6.5.0
"#;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse() -> Expected {
        serde_yaml::from_str(fixtures::EXPECTED_YAML).expect("fixture should parse")
    }

    #[test]
    fn load_reads_a_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expected.yaml");
        std::fs::write(&path, fixtures::EXPECTED_YAML).unwrap();

        let expected = Expected::load(&path).unwrap();
        assert_eq!(expected.global.base_url, "sunet.se");
        assert!(Expected::load(dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn global_section_parses() {
        let expected = parse();
        assert_eq!(expected.global.base_url, "sunet.se");
        assert_eq!(expected.global.node_prefix, "drive");
        assert_eq!(expected.global.index_suffix, "/index.php");
        assert!(expected.global.test_gss);
        assert_eq!(expected.global.allnodes.len(), 4);
        assert_eq!(expected.global.fullnodes, vec!["extern", "sunet", "su"]);
        assert_eq!(expected.global.doc_nodes, vec!["1", "2"]);
    }

    #[test]
    fn environments_are_keyed_by_name() {
        let expected = parse();
        assert!(expected.environment("test").is_some());
        assert!(expected.environment("prod").is_some());
        assert!(expected.environment("localhost").is_none());

        let test_env = expected.environment("test").unwrap();
        assert!(!test_env.status.maintenance);
        assert_eq!(test_env.status.versionstring, "29.0.16");
        let caps = test_env.ocs_capabilities.as_ref().unwrap();
        assert_eq!(caps.ocs_meta_statuscode, 100);
        assert_eq!(caps.ocs_meta_statuscode_2, 200);
    }

    #[test]
    fn app_versions_resolve_per_environment() {
        let expected = parse();
        assert_eq!(expected.app_version("user_saml", "test"), Some("6.5.0"));
        assert_eq!(expected.app_version("user_saml", "custom"), None);
        assert_eq!(expected.app_version("richdocuments", "test"), None);
    }

    #[test]
    fn saml_expectation_is_optional() {
        let expected = parse();
        assert!(expected.environment("test").unwrap().saml.is_some());

        let minimal: Expected = serde_yaml::from_str(
            r#"
global:
  baseUrl: localhost
  testPrefix: test
  allnodes: [nextcloud]
  fullnodes: [nextcloud]
localhost:
  status:
    maintenance: false
    needsDbUpgrade: false
    version: 29.0.16.1
    versionstring: 29.0.16
    edition: ''
    extendedSupport: false
"#,
        )
        .unwrap();
        assert!(minimal.environment("localhost").unwrap().saml.is_none());
        assert!(minimal.global.node_prefix.is_empty());
    }
}
