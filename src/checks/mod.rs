//! Check suites, one module per feature area of the deployment.

pub mod collabora;
pub mod login;
pub mod ocs;
pub mod sharing;
pub mod status;
pub mod webdav;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::dispatch::Dispatcher;
use crate::ocs::OcsClient;
use crate::target::{Role, TestTarget};
use crate::webdav::DavClient;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const WEBDAV_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a suite needs: the resolved target, shared clients and the
/// fan-out dispatcher. Cheap to clone into per-node tasks.
#[derive(Clone)]
pub struct CheckContext {
    pub target: Arc<TestTarget>,
    pub ocs: OcsClient,
    pub dispatcher: Dispatcher,
    pub insecure: bool,
}

impl CheckContext {
    pub fn new(target: TestTarget, insecure: bool) -> crate::Result<Self> {
        Ok(Self {
            target: Arc::new(target),
            ocs: OcsClient::new(HTTP_TIMEOUT, insecure)?,
            dispatcher: Dispatcher::default(),
            insecure,
        })
    }

    /// WebDAV client for `role` on `node`, authenticating with either the
    /// login password or the app password.
    pub fn dav_client(
        &self,
        node: &str,
        role: Role,
        app_password: bool,
    ) -> anyhow::Result<DavClient> {
        let username = self.target.username(role, node)?;
        let password = if app_password {
            self.target.app_password(role, node)?
        } else {
            self.target.password(role, node)?
        };
        let base = self.target.webdav_url(node, &username);
        DavClient::new(base, username, password, WEBDAV_TIMEOUT, self.insecure)
            .with_context(|| format!("building WebDAV client for {node}"))
    }
}
