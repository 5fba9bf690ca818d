use std::time::Duration;

use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{DriveError, Result};
use crate::target::Credentials;

const OCS_OK: i64 = 100;

/// `{"ocs":{"meta":…,"data":…}}` envelope every OCS endpoint returns.
#[derive(Debug, Deserialize)]
pub struct OcsEnvelope<T> {
    pub ocs: OcsBody<T>,
}

#[derive(Debug, Deserialize)]
pub struct OcsBody<T> {
    pub meta: OcsMeta,
    pub data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcsMeta {
    pub status: String,
    pub statuscode: i64,
    #[serde(default)]
    pub message: Option<String>,
}

impl OcsMeta {
    pub fn is_ok(&self) -> bool {
        self.statuscode == OCS_OK
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Capabilities {
    pub version: CapabilitiesVersion,
    #[serde(default)]
    pub capabilities: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapabilitiesVersion {
    pub string: String,
    #[serde(default)]
    pub major: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UserListData {
    users: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GroupListData {
    groups: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AppListData {
    apps: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppInfo {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// Share ids arrive as JSON strings or numbers depending on the server
/// version; both decode to a string.
fn share_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "share id is neither string nor number: {other}"
        ))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareInfo {
    #[serde(deserialize_with = "share_id")]
    pub id: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub share_type: Option<i64>,
    #[serde(default)]
    pub share_with: Option<String>,
}

/// Share creation parameters. `share_type` follows the OCS constants
/// (0 user, 1 group, 3 public link, 6 federated).
#[derive(Debug, Clone)]
pub struct ShareRequest {
    pub path: String,
    pub share_type: i64,
    pub share_with: Option<String>,
    pub permissions: Option<i64>,
}

/// Decoded `status.php` output.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerStatus {
    pub installed: bool,
    pub maintenance: bool,
    #[serde(rename = "needsDbUpgrade")]
    pub needs_db_upgrade: bool,
    pub version: String,
    pub versionstring: String,
    pub edition: String,
    #[serde(default)]
    pub productname: Option<String>,
    #[serde(rename = "extendedSupport")]
    pub extended_support: bool,
}

/// Thin OCS/status client over reqwest. Every request carries the
/// `OCS-APIRequest: true` header; callers pass fully formed URLs from the
/// target resolver.
#[derive(Clone)]
pub struct OcsClient {
    http: Client,
}

impl OcsClient {
    pub fn new(timeout: Duration, insecure: bool) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert("OCS-APIRequest", header::HeaderValue::from_static("true"));
        let http = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(insecure)
            .build()?;
        Ok(Self { http })
    }

    /// Fetches and decodes `status.php`.
    pub async fn status(&self, url: &str) -> Result<ServerStatus> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DriveError::UnexpectedStatus {
                url: url.to_string(),
                status,
            });
        }
        Ok(response.json().await?)
    }

    /// Plain GET returning the response body, for non-OCS endpoints
    /// (SAML metadata, Collabora capabilities).
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DriveError::UnexpectedStatus {
                url: url.to_string(),
                status,
            });
        }
        Ok(response.text().await?)
    }

    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let text = self.get_text(url).await?;
        serde_json::from_str(&text).map_err(|e| DriveError::Envelope(e.to_string()))
    }

    /// Anonymous capabilities call. The HTTP layer answers 200 here even
    /// for clients without a session; the interesting part is the meta
    /// block.
    pub async fn capabilities(&self, url: &str) -> Result<(OcsMeta, Capabilities)> {
        self.request_envelope(Method::GET, url, None, None).await
    }

    pub async fn list_users(&self, url: &str, auth: &Credentials) -> Result<Vec<String>> {
        let (_, data): (OcsMeta, UserListData) =
            self.request_envelope(Method::GET, url, Some(auth), None).await?;
        Ok(data.users)
    }

    pub async fn list_groups(&self, url: &str, auth: &Credentials) -> Result<Vec<String>> {
        let (_, data): (OcsMeta, GroupListData) =
            self.request_envelope(Method::GET, url, Some(auth), None).await?;
        Ok(data.groups)
    }

    pub async fn list_apps(&self, url: &str, auth: &Credentials) -> Result<Vec<String>> {
        let (_, data): (OcsMeta, AppListData) =
            self.request_envelope(Method::GET, url, Some(auth), None).await?;
        Ok(data.apps)
    }

    pub async fn app_info(&self, url: &str, auth: &Credentials) -> Result<AppInfo> {
        let (_, info): (OcsMeta, AppInfo) =
            self.request_envelope(Method::GET, url, Some(auth), None).await?;
        Ok(info)
    }

    pub async fn user_details(
        &self,
        url: &str,
        auth: &Credentials,
    ) -> Result<(OcsMeta, serde_json::Value)> {
        self.request_envelope(Method::GET, url, Some(auth), None).await
    }

    pub async fn add_user(
        &self,
        url: &str,
        auth: &Credentials,
        userid: &str,
        password: &str,
    ) -> Result<OcsMeta> {
        let form = [("userid", userid), ("password", password)];
        self.mutate(Method::POST, url, auth, Some(&form)).await
    }

    pub async fn disable_user(&self, url: &str, auth: &Credentials) -> Result<OcsMeta> {
        self.mutate(Method::PUT, url, auth, None).await
    }

    pub async fn delete_user(&self, url: &str, auth: &Credentials) -> Result<OcsMeta> {
        self.mutate(Method::DELETE, url, auth, None).await
    }

    pub async fn add_group(&self, url: &str, auth: &Credentials, groupid: &str) -> Result<OcsMeta> {
        let form = [("groupid", groupid)];
        self.mutate(Method::POST, url, auth, Some(&form)).await
    }

    pub async fn list_shares(&self, url: &str, auth: &Credentials) -> Result<Vec<ShareInfo>> {
        let (_, shares): (OcsMeta, Vec<ShareInfo>) =
            self.request_envelope(Method::GET, url, Some(auth), None).await?;
        Ok(shares)
    }

    pub async fn create_share(
        &self,
        url: &str,
        auth: &Credentials,
        share: &ShareRequest,
    ) -> Result<(OcsMeta, serde_json::Value)> {
        let share_type = share.share_type.to_string();
        let mut form: Vec<(&str, &str)> =
            vec![("path", share.path.as_str()), ("shareType", share_type.as_str())];
        if let Some(with) = &share.share_with {
            form.push(("shareWith", with.as_str()));
        }
        let permissions = share.permissions.map(|p| p.to_string());
        if let Some(p) = &permissions {
            form.push(("permissions", p.as_str()));
        }
        self.request_envelope(Method::POST, url, Some(auth), Some(&form)).await
    }

    pub async fn delete_share(&self, url: &str, auth: &Credentials) -> Result<OcsMeta> {
        self.mutate(Method::DELETE, url, auth, None).await
    }

    /// Remote (federated) shares the user has received.
    pub async fn list_remote_shares(
        &self,
        url: &str,
        auth: &Credentials,
    ) -> Result<serde_json::Value> {
        let (_, data): (OcsMeta, serde_json::Value) =
            self.request_envelope(Method::GET, url, Some(auth), None).await?;
        Ok(data)
    }

    pub async fn serverinfo(&self, url: &str, auth: &Credentials) -> Result<serde_json::Value> {
        let (_, data): (OcsMeta, serde_json::Value) =
            self.request_envelope(Method::GET, url, Some(auth), None).await?;
        Ok(data)
    }

    /// Mutating call with a single retry: when the envelope comes back
    /// with a non-100 statuscode, the request is sent once more and the
    /// second meta block wins.
    async fn mutate(
        &self,
        method: Method,
        url: &str,
        auth: &Credentials,
        form: Option<&[(&str, &str)]>,
    ) -> Result<OcsMeta> {
        let (meta, _): (OcsMeta, serde_json::Value) = self
            .request_envelope(method.clone(), url, Some(auth), form)
            .await?;
        if meta.is_ok() {
            return Ok(meta);
        }
        warn!(
            "OCS {} {} answered statuscode {}, retrying once",
            method, url, meta.statuscode
        );
        let (meta, _): (OcsMeta, serde_json::Value) =
            self.request_envelope(method, url, Some(auth), form).await?;
        Ok(meta)
    }

    async fn request_envelope<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        auth: Option<&Credentials>,
        form: Option<&[(&str, &str)]>,
    ) -> Result<(OcsMeta, T)> {
        let mut request = self.http.request(method, url);
        if let Some(auth) = auth {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }
        if let Some(form) = form {
            request = request.form(form);
        }
        let response = request.send().await?;
        let status = response.status();
        // OCS v1 reports application errors in the meta block with HTTP
        // 200; real HTTP failures (401, 403, 404) still matter.
        if !status.is_success() && status != StatusCode::OK {
            return Err(DriveError::UnexpectedStatus {
                url: url.to_string(),
                status,
            });
        }
        let text = response.text().await?;
        let envelope: OcsEnvelope<T> = serde_json::from_str(&text).map_err(|e| {
            debug!("Invalid OCS reply from {}: {}", url, text);
            DriveError::Envelope(format!("{url}: {e}"))
        })?;
        Ok((envelope.ocs.meta, envelope.ocs.data))
    }
}
