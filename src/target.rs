use std::env;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use tracing::{debug, info};

use crate::config::Expected;
use crate::error::{DriveError, Result};

/// Environment selector, normally taken from `NEXTCLOUD_TEST_TARGET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum TargetEnv {
    Test,
    Prod,
    Localhost,
    Custom,
}

impl TargetEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetEnv::Test => "test",
            TargetEnv::Prod => "prod",
            TargetEnv::Localhost => "localhost",
            TargetEnv::Custom => "custom",
        }
    }
}

impl fmt::Display for TargetEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetEnv {
    type Err = DriveError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "test" => Ok(TargetEnv::Test),
            "prod" => Ok(TargetEnv::Prod),
            "localhost" => Ok(TargetEnv::Localhost),
            "custom" => Ok(TargetEnv::Custom),
            other => Err(DriveError::InvalidTarget(other.to_string())),
        }
    }
}

/// Account role a credential belongs to. The role tag is part of the
/// environment variable name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Ocs,
    Selenium,
    SeleniumMfa,
    Saml,
}

impl Role {
    fn tag(&self) -> &'static str {
        match self {
            Role::Ocs => "OCS",
            Role::Selenium => "SELENIUM",
            Role::SeleniumMfa => "SELENIUM_MFA",
            Role::Saml => "SAML",
        }
    }
}

/// Username/password pair resolved for one node and role.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Process-wide test target. Holds the node lists and the URL building
/// blocks from `expected.yaml`, and resolves per-node credentials from
/// environment variables named
/// `NEXTCLOUD_<ROLE>_<FIELD>_<NODE>_<TARGET>`.
///
/// URL construction is pure string concatenation over the stored
/// prefix/suffix fields; no network access happens here.
#[derive(Debug, Clone)]
pub struct TestTarget {
    pub target: TargetEnv,
    pub base_url: String,
    pub node_prefix: String,
    pub doc_prefix: String,
    pub index_suffix: String,
    pub test_gss: bool,
    pub allnodes: Vec<String>,
    pub fullnodes: Vec<String>,
    pub multinodes: Vec<String>,
    pub doc_nodes: Vec<String>,
    pub expected: Expected,
    /// ".{testPrefix}" for non-prod targets, empty for prod.
    target_prefix: String,
}

impl TestTarget {
    pub fn new(expected: Expected, target: TargetEnv) -> Self {
        let global = &expected.global;
        let target_prefix = match target {
            TargetEnv::Prod => String::new(),
            _ => format!(".{}", global.test_prefix),
        };
        Self {
            target,
            base_url: global.base_url.clone(),
            node_prefix: global.node_prefix.clone(),
            doc_prefix: global.doc_prefix.clone(),
            index_suffix: global.index_suffix.clone(),
            test_gss: global.test_gss,
            allnodes: global.allnodes.clone(),
            fullnodes: global.fullnodes.clone(),
            multinodes: global.multinodes.clone(),
            doc_nodes: global.doc_nodes.clone(),
            expected,
            target_prefix,
        }
    }

    /// Builds the target from `NEXTCLOUD_TEST_TARGET` (default `test`).
    /// `NEXTCLOUD_TEST_CUSTOMERS` narrows all node lists to one node when
    /// it names a configured node.
    pub fn from_env(expected: Expected) -> Result<Self> {
        let target = match env::var("NEXTCLOUD_TEST_TARGET") {
            Ok(raw) => raw.parse()?,
            Err(_) => TargetEnv::Test,
        };
        let mut resolved = Self::new(expected, target);
        if let Ok(customer) = env::var("NEXTCLOUD_TEST_CUSTOMERS") {
            resolved.restrict_nodes(&[customer])?;
        }
        info!(
            "Test target: {} ({} nodes, {} full nodes)",
            resolved.target,
            resolved.allnodes.len(),
            resolved.fullnodes.len()
        );
        Ok(resolved)
    }

    /// Narrows the node lists to the given subset. Every requested node
    /// must be part of `allnodes`.
    pub fn restrict_nodes(&mut self, nodes: &[String]) -> Result<()> {
        for node in nodes {
            if !self.allnodes.iter().any(|n| n == node) {
                return Err(DriveError::UnknownNode { node: node.clone() });
            }
        }
        debug!("Restricting node lists to {:?}", nodes);
        self.allnodes = nodes.to_vec();
        self.fullnodes = nodes.to_vec();
        self.multinodes = nodes.to_vec();
        Ok(())
    }

    /// Expectations for the active environment, if the fixture has them.
    pub fn expectations(&self) -> Option<&crate::config::Environment> {
        self.expected.environment(self.target.as_str())
    }

    // ------------------------------------------------------------------
    // URL construction
    // ------------------------------------------------------------------

    /// Host prefix for a node: `gss` and `none` resolve to the bare node
    /// prefix, otherwise the node name is prepended.
    fn host_prefix(&self, node: &str) -> String {
        if node == "gss" || node == "none" {
            self.node_prefix.clone()
        } else if self.node_prefix.is_empty() {
            node.to_string()
        } else {
            format!("{}.{}", node, self.node_prefix)
        }
    }

    pub fn node_url(&self, node: &str) -> String {
        format!(
            "https://{}{}.{}",
            self.host_prefix(node),
            self.target_prefix,
            self.base_url
        )
    }

    pub fn gss_url(&self) -> String {
        format!(
            "https://{}{}.{}",
            self.node_prefix, self.target_prefix, self.base_url
        )
    }

    pub fn login_url(&self, node: &str) -> String {
        format!(
            "{}{}/login?redirect_url=&direct=1",
            self.node_url(node),
            self.index_suffix
        )
    }

    pub fn post_logout_url(&self, node: &str) -> String {
        format!("{}{}/login?clear=1", self.node_url(node), self.index_suffix)
    }

    pub fn post_logout_simple_url(&self, node: &str) -> String {
        format!("{}{}/login", self.node_url(node), self.index_suffix)
    }

    pub fn post_logout_saml_url(&self, node: &str) -> String {
        format!(
            "{}{}/apps/user_saml/saml/selectUserBackEnd?redirectUrl=",
            self.node_url(node),
            self.index_suffix
        )
    }

    pub fn gss_post_logout_url(&self) -> String {
        format!(
            "{}{}/apps/user_saml/saml/selectUserBackEnd?redirectUrl=",
            self.gss_url(),
            self.index_suffix
        )
    }

    pub fn dashboard_url(&self, node: &str) -> String {
        format!("{}{}/apps/dashboard/", self.node_url(node), self.index_suffix)
    }

    pub fn folder_url(&self, node: &str, folder: &str) -> String {
        format!(
            "{}{}/apps/files/?dir=/{}",
            self.node_url(node),
            self.index_suffix,
            folder
        )
    }

    pub fn status_url(&self, node: &str) -> String {
        format!("{}/status.php", self.node_url(node))
    }

    pub fn status_urls(&self, nodes: &[String]) -> Vec<String> {
        nodes.iter().map(|node| self.status_url(node)).collect()
    }

    pub fn allnode_status_urls(&self) -> Vec<String> {
        self.status_urls(&self.allnodes)
    }

    pub fn fullnode_status_urls(&self) -> Vec<String> {
        self.status_urls(&self.fullnodes)
    }

    pub fn multinode_status_urls(&self) -> Vec<String> {
        self.status_urls(&self.multinodes)
    }

    pub fn ocs_capabilities_url(&self, node: &str) -> String {
        format!(
            "{}/ocs/v1.php/cloud/capabilities?format=json",
            self.node_url(node)
        )
    }

    pub fn users_url(&self, node: &str) -> String {
        format!("{}/ocs/v1.php/cloud/users?format=json", self.node_url(node))
    }

    pub fn user_url(&self, node: &str, username: &str) -> String {
        format!(
            "{}/ocs/v1.php/cloud/users/{}?format=json",
            self.node_url(node),
            username
        )
    }

    pub fn disable_user_url(&self, node: &str, username: &str) -> String {
        format!(
            "{}/ocs/v1.php/cloud/users/{}/disable?format=json",
            self.node_url(node),
            username
        )
    }

    pub fn groups_url(&self, node: &str) -> String {
        format!("{}/ocs/v1.php/cloud/groups?format=json", self.node_url(node))
    }

    pub fn apps_url(&self, node: &str) -> String {
        format!("{}/ocs/v2.php/cloud/apps?format=json", self.node_url(node))
    }

    pub fn app_url(&self, node: &str, app: &str) -> String {
        format!(
            "{}/ocs/v2.php/cloud/apps/{}?format=json",
            self.node_url(node),
            app
        )
    }

    pub fn shares_url(&self, node: &str) -> String {
        format!(
            "{}/ocs/v1.php/apps/files_sharing/api/v1/shares?format=json",
            self.node_url(node)
        )
    }

    pub fn share_url(&self, node: &str, share_id: &str) -> String {
        format!(
            "{}/ocs/v1.php/apps/files_sharing/api/v1/shares/{}?format=json",
            self.node_url(node),
            share_id
        )
    }

    pub fn remote_shares_url(&self, node: &str) -> String {
        format!(
            "{}/ocs/v1.php/apps/files_sharing/api/v1/remote_shares?format=json",
            self.node_url(node)
        )
    }

    pub fn serverinfo_url(&self, node: &str) -> String {
        format!(
            "{}/ocs/v2.php/apps/serverinfo/api/v1/info?format=json",
            self.node_url(node)
        )
    }

    pub fn webdav_url(&self, node: &str, username: &str) -> String {
        format!("{}/remote.php/dav/files/{}/", self.node_url(node), username)
    }

    pub fn webdav_root(&self, username: &str) -> String {
        format!("/remote.php/dav/files/{}/", username)
    }

    pub fn metadata_url(&self, node: &str) -> String {
        format!(
            "{}{}/apps/user_saml/saml/metadata?idp=1",
            self.node_url(node),
            self.index_suffix
        )
    }

    pub fn entity_id(&self, node: &str) -> String {
        format!(
            "{}{}/apps/user_saml/saml/metadata",
            self.node_url(node),
            self.index_suffix
        )
    }

    pub fn gss_metadata_url(&self) -> String {
        format!(
            "{}{}/apps/user_saml/saml/metadata?idp=1",
            self.gss_url(),
            self.index_suffix
        )
    }

    pub fn gss_entity_id(&self) -> String {
        format!("{}{}/apps/user_saml/saml/metadata", self.gss_url(), self.index_suffix)
    }

    /// Document servers live on their own hosts: `doc1.drive.test.sunet.se`
    /// when a node prefix is configured, `doc1.test.<base>` otherwise.
    pub fn collabora_url(&self, doc_node: &str) -> String {
        if self.node_prefix.is_empty() {
            format!(
                "https://{}{}{}.{}",
                self.doc_prefix, doc_node, self.target_prefix, self.base_url
            )
        } else {
            format!(
                "https://{}{}.{}{}.{}",
                self.doc_prefix, doc_node, self.node_prefix, self.target_prefix, self.base_url
            )
        }
    }

    pub fn collabora_capabilities_url(&self, doc_node: &str) -> String {
        format!("{}/hosting/capabilities", self.collabora_url(doc_node))
    }

    // ------------------------------------------------------------------
    // Credential resolution
    // ------------------------------------------------------------------

    /// Name of the environment variable carrying `field` for `role` on
    /// `node` in the active target.
    pub fn credential_var(&self, role: Role, field: &str, node: &str) -> String {
        format!(
            "NEXTCLOUD_{}_{}_{}_{}",
            role.tag(),
            field,
            node.to_uppercase().replace('-', "_"),
            self.target.as_str().to_uppercase()
        )
    }

    fn lookup(&self, var: String) -> Result<String> {
        env::var(&var).map_err(|_| DriveError::MissingCredential(var))
    }

    pub fn username(&self, role: Role, node: &str) -> Result<String> {
        self.lookup(self.credential_var(role, "USER", node))
    }

    pub fn password(&self, role: Role, node: &str) -> Result<String> {
        self.lookup(self.credential_var(role, "PASSWORD", node))
    }

    pub fn app_password(&self, role: Role, node: &str) -> Result<String> {
        self.lookup(self.credential_var(role, "APP_PASSWORD", node))
    }

    pub fn totp_secret(&self, role: Role, node: &str) -> Result<String> {
        self.lookup(self.credential_var(role, "SECRET", node))
    }

    /// Lenient variants for callers that probe optional credentials.
    pub fn try_username(&self, role: Role, node: &str) -> Option<String> {
        self.username(role, node).ok()
    }

    pub fn try_password(&self, role: Role, node: &str) -> Option<String> {
        self.password(role, node).ok()
    }

    /// Username plus login password for `role` on `node`.
    pub fn credentials(&self, role: Role, node: &str) -> Result<Credentials> {
        Ok(Credentials {
            username: self.username(role, node)?,
            password: self.password(role, node)?,
        })
    }

    /// Username plus app password for `role` on `node`.
    pub fn app_credentials(&self, role: Role, node: &str) -> Result<Credentials> {
        Ok(Credentials {
            username: self.username(role, node)?,
            password: self.app_password(role, node)?,
        })
    }

    /// All credential variables the configured full-node list needs,
    /// paired with whether they are currently set. MFA secrets are only
    /// required for the MFA role.
    pub fn credential_inventory(&self) -> Vec<(String, bool)> {
        let mut inventory = Vec::new();
        for node in &self.fullnodes {
            for role in [Role::Ocs, Role::Selenium, Role::SeleniumMfa] {
                for field in ["USER", "PASSWORD", "APP_PASSWORD"] {
                    let var = self.credential_var(role, field, node);
                    let present = env::var(&var).is_ok();
                    inventory.push((var, present));
                }
            }
            let secret = self.credential_var(Role::SeleniumMfa, "SECRET", node);
            let present = env::var(&secret).is_ok();
            inventory.push((secret, present));
        }
        inventory
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::fixtures::EXPECTED_YAML;

    fn target(env: TargetEnv) -> TestTarget {
        let expected: Expected = serde_yaml::from_str(EXPECTED_YAML).unwrap();
        TestTarget::new(expected, env)
    }

    #[test]
    fn node_urls_match_handwritten_values() {
        let t = target(TargetEnv::Test);
        assert_eq!(t.node_url("sunet"), "https://sunet.drive.test.sunet.se");
        assert_eq!(t.node_url("extern"), "https://extern.drive.test.sunet.se");
        assert_eq!(t.node_url("gss"), "https://drive.test.sunet.se");
        assert_eq!(t.gss_url(), "https://drive.test.sunet.se");
        assert_eq!(t.status_url("su"), "https://su.drive.test.sunet.se/status.php");
    }

    #[test]
    fn prod_urls_drop_the_test_prefix() {
        let t = target(TargetEnv::Prod);
        assert_eq!(t.node_url("sunet"), "https://sunet.drive.sunet.se");
        assert_eq!(t.gss_url(), "https://drive.sunet.se");
        assert_eq!(
            t.webdav_url("sunet", "alice"),
            "https://sunet.drive.sunet.se/remote.php/dav/files/alice/"
        );
    }

    #[test]
    fn login_and_saml_urls() {
        let t = target(TargetEnv::Test);
        assert_eq!(
            t.login_url("sunet"),
            "https://sunet.drive.test.sunet.se/index.php/login?redirect_url=&direct=1"
        );
        assert_eq!(
            t.post_logout_url("sunet"),
            "https://sunet.drive.test.sunet.se/index.php/login?clear=1"
        );
        assert_eq!(
            t.entity_id("su"),
            "https://su.drive.test.sunet.se/index.php/apps/user_saml/saml/metadata"
        );
        assert_eq!(
            t.metadata_url("su"),
            "https://su.drive.test.sunet.se/index.php/apps/user_saml/saml/metadata?idp=1"
        );
        assert_eq!(
            t.gss_entity_id(),
            "https://drive.test.sunet.se/index.php/apps/user_saml/saml/metadata"
        );
    }

    #[test]
    fn ocs_urls() {
        let t = target(TargetEnv::Test);
        assert_eq!(
            t.ocs_capabilities_url("sunet"),
            "https://sunet.drive.test.sunet.se/ocs/v1.php/cloud/capabilities?format=json"
        );
        assert_eq!(
            t.user_url("sunet", "__cli_user_sunet"),
            "https://sunet.drive.test.sunet.se/ocs/v1.php/cloud/users/__cli_user_sunet?format=json"
        );
        assert_eq!(
            t.disable_user_url("sunet", "bob"),
            "https://sunet.drive.test.sunet.se/ocs/v1.php/cloud/users/bob/disable?format=json"
        );
        assert_eq!(
            t.app_url("sunet", "user_saml"),
            "https://sunet.drive.test.sunet.se/ocs/v2.php/cloud/apps/user_saml?format=json"
        );
        assert_eq!(
            t.share_url("sunet", "42"),
            "https://sunet.drive.test.sunet.se/ocs/v1.php/apps/files_sharing/api/v1/shares/42?format=json"
        );
    }

    #[test]
    fn browser_flow_urls() {
        let t = target(TargetEnv::Test);
        assert_eq!(
            t.dashboard_url("sunet"),
            "https://sunet.drive.test.sunet.se/index.php/apps/dashboard/"
        );
        assert_eq!(
            t.folder_url("sunet", "selenium-personal"),
            "https://sunet.drive.test.sunet.se/index.php/apps/files/?dir=/selenium-personal"
        );
        assert_eq!(
            t.post_logout_simple_url("sunet"),
            "https://sunet.drive.test.sunet.se/index.php/login"
        );
        assert_eq!(
            t.post_logout_saml_url("sunet"),
            "https://sunet.drive.test.sunet.se/index.php/apps/user_saml/saml/selectUserBackEnd?redirectUrl="
        );
        assert_eq!(
            t.gss_post_logout_url(),
            "https://drive.test.sunet.se/index.php/apps/user_saml/saml/selectUserBackEnd?redirectUrl="
        );
    }

    #[test]
    fn status_url_lists_cover_each_node_set() {
        let t = target(TargetEnv::Test);
        assert_eq!(t.allnode_status_urls().len(), t.allnodes.len());
        assert_eq!(t.fullnode_status_urls().len(), t.fullnodes.len());
        assert_eq!(
            t.multinode_status_urls(),
            vec![
                "https://sunet.drive.test.sunet.se/status.php",
                "https://su.drive.test.sunet.se/status.php"
            ]
        );
        assert_eq!(
            t.serverinfo_url("sunet"),
            "https://sunet.drive.test.sunet.se/ocs/v2.php/apps/serverinfo/api/v1/info?format=json"
        );
        assert_eq!(t.webdav_root("alice"), "/remote.php/dav/files/alice/");
    }

    #[test]
    fn collabora_urls_with_and_without_node_prefix() {
        let t = target(TargetEnv::Test);
        assert_eq!(t.collabora_url("1"), "https://doc1.drive.test.sunet.se");
        assert_eq!(
            t.collabora_capabilities_url("2"),
            "https://doc2.drive.test.sunet.se/hosting/capabilities"
        );

        let mut bare = target(TargetEnv::Test);
        bare.node_prefix.clear();
        assert_eq!(bare.collabora_url("1"), "https://doc1.test.sunet.se");
    }

    #[test]
    fn url_construction_is_pure() {
        let t = target(TargetEnv::Test);
        let first = t.node_url("sunet");
        for _ in 0..10 {
            assert_eq!(t.node_url("sunet"), first);
        }
    }

    #[test]
    fn credential_var_naming_convention() {
        let t = target(TargetEnv::Test);
        assert_eq!(
            t.credential_var(Role::Ocs, "USER", "sunet"),
            "NEXTCLOUD_OCS_USER_SUNET_TEST"
        );
        assert_eq!(
            t.credential_var(Role::SeleniumMfa, "SECRET", "su"),
            "NEXTCLOUD_SELENIUM_MFA_SECRET_SU_TEST"
        );
        let p = target(TargetEnv::Prod);
        assert_eq!(
            p.credential_var(Role::Saml, "PASSWORD", "extern"),
            "NEXTCLOUD_SAML_PASSWORD_EXTERN_PROD"
        );
    }

    #[test]
    fn credential_resolution_is_idempotent() {
        let t = target(TargetEnv::Test);
        let var = t.credential_var(Role::Ocs, "USER", "kth");
        std::env::set_var(&var, "ocsadmin");
        let first = t.username(Role::Ocs, "kth").unwrap();
        let second = t.username(Role::Ocs, "kth").unwrap();
        assert_eq!(first, "ocsadmin");
        assert_eq!(first, second);
        std::env::remove_var(&var);
    }

    #[test]
    fn missing_credential_is_an_error_with_the_var_name() {
        let t = target(TargetEnv::Test);
        std::env::remove_var("NEXTCLOUD_OCS_USER_EXTERN_TEST");
        let err = t.username(Role::Ocs, "extern").unwrap_err();
        assert!(err.to_string().contains("NEXTCLOUD_OCS_USER_EXTERN_TEST"));
        assert!(t.try_username(Role::Ocs, "extern").is_none());
    }

    #[test]
    fn from_env_reads_target_and_customer_narrowing() {
        std::env::set_var("NEXTCLOUD_TEST_TARGET", "prod");
        std::env::set_var("NEXTCLOUD_TEST_CUSTOMERS", "sunet");
        let expected: Expected = serde_yaml::from_str(EXPECTED_YAML).unwrap();
        let t = TestTarget::from_env(expected).unwrap();
        std::env::remove_var("NEXTCLOUD_TEST_TARGET");
        std::env::remove_var("NEXTCLOUD_TEST_CUSTOMERS");

        assert_eq!(t.target, TargetEnv::Prod);
        assert_eq!(t.allnodes, vec!["sunet"]);
        assert_eq!(t.fullnodes, vec!["sunet"]);
        assert_eq!(t.node_url("sunet"), "https://sunet.drive.sunet.se");
    }

    #[test]
    fn restrict_nodes_narrows_all_lists() {
        let mut t = target(TargetEnv::Test);
        t.restrict_nodes(&["sunet".to_string()]).unwrap();
        assert_eq!(t.allnodes, vec!["sunet"]);
        assert_eq!(t.fullnodes, vec!["sunet"]);
        assert_eq!(t.multinodes, vec!["sunet"]);

        let mut t = target(TargetEnv::Test);
        assert!(t.restrict_nodes(&["unknown".to_string()]).is_err());
    }
}
