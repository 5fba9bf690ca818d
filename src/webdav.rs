use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, Method, StatusCode};
use tracing::debug;

use crate::error::{DriveError, Result};

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
    <d:getcontentlength/>
    <d:getlastmodified/>
    <d:getetag/>
  </d:prop>
</d:propfind>"#;

/// One entry of a PROPFIND multistatus reply.
#[derive(Debug, Clone)]
pub struct DavEntry {
    pub href: String,
    pub name: String,
    pub is_directory: bool,
    pub size: Option<u64>,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

/// WebDAV client bound to one user's files root
/// (`…/remote.php/dav/files/<user>/`). Paths are relative to that root.
#[derive(Clone)]
pub struct DavClient {
    http: Client,
    base: String,
    username: String,
    password: String,
}

impl DavClient {
    pub fn new(
        base: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
        insecure: bool,
    ) -> Result<Self> {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        let http = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .build()?;
        Ok(Self {
            http,
            base,
            username: username.into(),
            password: password.into(),
        })
    }

    /// Percent-encodes each path segment; the Nextcloud DAV endpoint is
    /// strict about raw spaces and umlauts in hrefs.
    fn url_for(&self, path: &str) -> String {
        let trimmed = path.trim_start_matches('/');
        if trimmed.is_empty() {
            return self.base.clone();
        }
        let encoded: Vec<String> = trimmed
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}{}", self.base, encoded.join("/"))
    }

    fn extension_method(name: &str) -> Method {
        Method::from_bytes(name.as_bytes()).expect("static method name")
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        depth: Option<&str>,
        destination: Option<&str>,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response> {
        let url = self.url_for(path);
        let mut request = self
            .http
            .request(method, &url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(depth) = depth {
            request = request.header("Depth", depth);
        }
        if let Some(destination) = destination {
            request = request.header("Destination", destination);
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        Ok(request.send().await?)
    }

    fn unexpected(url: String, status: StatusCode) -> DriveError {
        DriveError::UnexpectedStatus { url, status }
    }

    /// PROPFIND depth 0; 404 means the path does not exist.
    pub async fn exists(&self, path: &str) -> Result<bool> {
        let response = self
            .send(
                Self::extension_method("PROPFIND"),
                path,
                Some("0"),
                None,
                Some(PROPFIND_BODY.as_bytes().to_vec()),
            )
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(Self::unexpected(self.url_for(path), status)),
        }
    }

    /// PROPFIND depth 1, with the collection itself filtered out.
    pub async fn list(&self, path: &str) -> Result<Vec<DavEntry>> {
        let response = self
            .send(
                Self::extension_method("PROPFIND"),
                path,
                Some("1"),
                None,
                Some(PROPFIND_BODY.as_bytes().to_vec()),
            )
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::unexpected(self.url_for(path), status));
        }
        let body = response.text().await?;
        let mut entries = parse_multistatus(&body)?;
        // The first response is the requested collection itself.
        let own_href = request_path(&self.url_for(path));
        entries.retain(|entry| entry.href.trim_end_matches('/') != own_href.trim_end_matches('/'));
        debug!("Listed {} entries under '{}'", entries.len(), path);
        Ok(entries)
    }

    pub async fn mkcol(&self, path: &str) -> Result<()> {
        let response = self
            .send(Self::extension_method("MKCOL"), path, None, None, None)
            .await?;
        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(Self::unexpected(self.url_for(path), status));
        }
        Ok(())
    }

    pub async fn put(&self, path: &str, content: Vec<u8>) -> Result<()> {
        let response = self.send(Method::PUT, path, None, None, Some(content)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::unexpected(self.url_for(path), status));
        }
        Ok(())
    }

    pub async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let response = self.send(Method::GET, path, None, None, None).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::unexpected(self.url_for(path), status));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// DELETE on a file or collection. Removing a collection removes its
    /// contents.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.send(Method::DELETE, path, None, None, None).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::unexpected(self.url_for(path), status));
        }
        Ok(())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let destination = self.url_for(to);
        let response = self
            .send(
                Self::extension_method("MOVE"),
                from,
                None,
                Some(&destination),
                None,
            )
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::unexpected(self.url_for(from), status));
        }
        Ok(())
    }
}

/// Path component of an absolute URL, percent-decoded, for comparing
/// against multistatus hrefs.
fn request_path(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => urlencoding::decode(parsed.path())
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| parsed.path().to_string()),
        Err(_) => url.to_string(),
    }
}

/// Pulls the fields we care about out of a 207 multistatus body. The
/// parser matches on local names only, so `d:`, `D:` and default-namespace
/// replies all work.
pub fn parse_multistatus(xml: &str) -> Result<Vec<DavEntry>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Field {
        Href,
        DisplayName,
        ContentLength,
        LastModified,
        Etag,
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<DavEntry> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"response" => {
                    current = Some(DavEntry {
                        href: String::new(),
                        name: String::new(),
                        is_directory: false,
                        size: None,
                        last_modified: None,
                        etag: None,
                    });
                }
                b"href" => field = Some(Field::Href),
                b"displayname" => field = Some(Field::DisplayName),
                b"getcontentlength" => field = Some(Field::ContentLength),
                b"getlastmodified" => field = Some(Field::LastModified),
                b"getetag" => field = Some(Field::Etag),
                b"collection" => {
                    if let Some(entry) = current.as_mut() {
                        entry.is_directory = true;
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Some(entry) = current.as_mut() {
                        entry.is_directory = true;
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| DriveError::Multistatus(e.to_string()))?
                    .into_owned();
                if let (Some(entry), Some(field)) = (current.as_mut(), field) {
                    match field {
                        Field::Href => {
                            entry.href = urlencoding::decode(&text)
                                .map(|c| c.into_owned())
                                .unwrap_or(text);
                        }
                        Field::DisplayName => entry.name = text,
                        Field::ContentLength => entry.size = text.parse().ok(),
                        Field::LastModified => entry.last_modified = Some(text),
                        Field::Etag => entry.etag = Some(text.trim_matches('"').to_string()),
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"response" => {
                    if let Some(mut entry) = current.take() {
                        if entry.name.is_empty() {
                            entry.name = entry
                                .href
                                .trim_end_matches('/')
                                .rsplit('/')
                                .next()
                                .unwrap_or_default()
                                .to_string();
                        }
                        entries.push(entry);
                    }
                }
                b"href" | b"displayname" | b"getcontentlength" | b"getlastmodified"
                | b"getetag" => field = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(DriveError::Multistatus(e.to_string())),
            _ => {}
        }
    }

    if entries.is_empty() && !xml.contains("multistatus") {
        return Err(DriveError::Multistatus(
            "reply is not a multistatus document".to_string(),
        ));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTISTATUS: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:s="http://sabredav.org/ns" xmlns:oc="http://owncloud.org/ns">
  <d:response>
    <d:href>/remote.php/dav/files/alice/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
        <d:getetag>"root-etag"</d:getetag>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/dav/files/alice/WebDAVTest/</d:href>
    <d:propstat>
      <d:prop>
        <d:displayname>WebDAVTest</d:displayname>
        <d:resourcetype><d:collection/></d:resourcetype>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/dav/files/alice/2026-08-25_10-00-00.txt</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getcontentlength>42</d:getcontentlength>
        <d:getlastmodified>Tue, 25 Aug 2026 10:00:00 GMT</d:getlastmodified>
        <d:getetag>"abc123"</d:getetag>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn parses_files_and_collections() {
        let entries = parse_multistatus(MULTISTATUS).unwrap();
        assert_eq!(entries.len(), 3);

        let root = &entries[0];
        assert!(root.is_directory);
        assert_eq!(root.etag.as_deref(), Some("root-etag"));

        let folder = &entries[1];
        assert_eq!(folder.name, "WebDAVTest");
        assert!(folder.is_directory);

        let file = &entries[2];
        assert_eq!(file.name, "2026-08-25_10-00-00.txt");
        assert!(!file.is_directory);
        assert_eq!(file.size, Some(42));
        assert_eq!(file.etag.as_deref(), Some("abc123"));
        assert!(file.last_modified.as_deref().unwrap().contains("2026"));
    }

    #[test]
    fn decodes_percent_encoded_hrefs() {
        let xml = r#"<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/remote.php/dav/files/alice/Shared%20Folder/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;
        let entries = parse_multistatus(xml).unwrap();
        assert_eq!(entries[0].name, "Shared Folder");
    }

    #[test]
    fn rejects_non_multistatus_bodies() {
        assert!(parse_multistatus("<html><body>login</body></html>").is_err());
    }

    #[test]
    fn url_for_encodes_segments() {
        let client = DavClient::new(
            "https://sunet.drive.test.sunet.se/remote.php/dav/files/alice",
            "alice",
            "secret",
            Duration::from_secs(30),
            false,
        )
        .unwrap();
        assert_eq!(
            client.url_for("WebDAVTest/file one.txt"),
            "https://sunet.drive.test.sunet.se/remote.php/dav/files/alice/WebDAVTest/file%20one.txt"
        );
        assert_eq!(
            client.url_for(""),
            "https://sunet.drive.test.sunet.se/remote.php/dav/files/alice/"
        );
    }
}
