use std::time::Duration;

use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use drivecheck::webdav::DavClient;

fn dav(server: &MockServer) -> DavClient {
    DavClient::new(
        format!("{}/remote.php/dav/files/alice/", server.uri()),
        "alice",
        "secret",
        Duration::from_secs(5),
        false,
    )
    .unwrap()
}

const LISTING: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/remote.php/dav/files/alice/</d:href>
    <d:propstat>
      <d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop>
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
    <d:href>/remote.php/dav/files/alice/notes.txt</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype/>
        <d:getcontentlength>8</d:getcontentlength>
        <d:getetag>"e1"</d:getetag>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

#[tokio::test]
async fn listing_drops_the_requested_collection() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/remote.php/dav/files/alice/"))
        .and(header("Depth", "1"))
        .and(body_string_contains("propfind"))
        .respond_with(
            ResponseTemplate::new(207)
                .set_body_string(LISTING)
                .insert_header("content-type", "application/xml"),
        )
        .mount(&server)
        .await;

    let entries = dav(&server).list("").await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|e| e.name == "WebDAVTest" && e.is_directory));
    assert!(entries.iter().any(|e| e.name == "notes.txt" && !e.is_directory));
}

#[tokio::test]
async fn exists_maps_404_to_false() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .and(path("/remote.php/dav/files/alice/THISFOLDERDOESNOTEXIST"))
        .and(header("Depth", "0"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("PROPFIND"))
        .and(path("/remote.php/dav/files/alice/WebDAVTest"))
        .respond_with(ResponseTemplate::new(207).set_body_string(LISTING))
        .mount(&server)
        .await;

    let dav = dav(&server);
    assert!(!dav.exists("THISFOLDERDOESNOTEXIST").await.unwrap());
    assert!(dav.exists("WebDAVTest").await.unwrap());
}

#[tokio::test]
async fn exists_propagates_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("PROPFIND"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = dav(&server).exists("WebDAVTest").await.unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn mkcol_requires_created() {
    let server = MockServer::start().await;
    Mock::given(method("MKCOL"))
        .and(path("/remote.php/dav/files/alice/WebDAVTest"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    dav(&server).mkcol("WebDAVTest").await.unwrap();
}

#[tokio::test]
async fn put_and_get_round_trip() {
    let server = MockServer::start().await;
    let content = b"round trip body".to_vec();
    Mock::given(method("PUT"))
        .and(path("/remote.php/dav/files/alice/WebDAVTest/upload.txt"))
        .and(header("Authorization", "Basic YWxpY2U6c2VjcmV0"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/remote.php/dav/files/alice/WebDAVTest/upload.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.clone()))
        .mount(&server)
        .await;

    let dav = dav(&server);
    dav.put("WebDAVTest/upload.txt", content.clone()).await.unwrap();
    let fetched = dav.get("WebDAVTest/upload.txt").await.unwrap();
    assert_eq!(fetched, content);
}

#[tokio::test]
async fn rename_sends_an_absolute_destination() {
    let server = MockServer::start().await;
    let destination = format!(
        "{}/remote.php/dav/files/alice/WebDAVTest/renamed.txt",
        server.uri()
    );
    Mock::given(method("MOVE"))
        .and(path("/remote.php/dav/files/alice/WebDAVTest/upload.txt"))
        .and(header("Destination", destination.as_str()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    dav(&server)
        .rename("WebDAVTest/upload.txt", "WebDAVTest/renamed.txt")
        .await
        .unwrap();
}

#[tokio::test]
async fn delete_accepts_no_content() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/remote.php/dav/files/alice/WebDAVTest"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    dav(&server).delete("WebDAVTest").await.unwrap();
}

#[tokio::test]
async fn paths_with_spaces_are_percent_encoded_on_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/remote.php/dav/files/alice/WebDAVTest/file%20one.txt"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    dav(&server)
        .put("WebDAVTest/file one.txt", b"x".to_vec())
        .await
        .unwrap();
}
