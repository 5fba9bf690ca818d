//! Status page and SAML metadata checks.

use anyhow::{bail, Context};
use quick_xml::events::Event;
use quick_xml::Reader;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::dispatch::NodeReport;
use crate::error::DriveError;

use super::CheckContext;

/// Node lists to exercise, with the GSS frontend appended when the
/// deployment runs one.
fn nodes_with_gss(ctx: &CheckContext) -> Vec<String> {
    let mut nodes = ctx.target.allnodes.clone();
    if ctx.target.test_gss {
        nodes.push("gss".to_string());
    }
    nodes
}

/// Every node's `status.php` answers 200 and decodes.
pub async fn status_pages(ctx: &CheckContext) -> NodeReport {
    let nodes = nodes_with_gss(ctx);
    let report = ctx
        .dispatcher
        .run(&nodes, |node| {
            let ctx = ctx.clone();
            async move {
                let url = ctx.target.status_url(&node);
                let status = ctx.ocs.status(&url).await.context("fetching status.php")?;
                info!(
                    "Status for {}: {} ({})",
                    node, status.versionstring, status.version
                );
                Ok(())
            }
        })
        .await;
    report.log_summary("status pages");
    report
}

/// `status.php` fields equal the pinned expectations for the active
/// environment.
pub async fn status_expectations(ctx: &CheckContext) -> anyhow::Result<NodeReport> {
    let Some(environment) = ctx.target.expectations() else {
        bail!(
            "no expectations configured for target '{}'",
            ctx.target.target
        );
    };
    let expected = environment.status.clone();
    let nodes = nodes_with_gss(ctx);
    let report = ctx
        .dispatcher
        .run(&nodes, |node| {
            let ctx = ctx.clone();
            let expected = expected.clone();
            async move {
                let url = ctx.target.status_url(&node);
                let status = ctx.ocs.status(&url).await.context("fetching status.php")?;
                if status.maintenance != expected.maintenance {
                    bail!("maintenance is {}", status.maintenance);
                }
                if status.needs_db_upgrade != expected.needs_db_upgrade {
                    bail!("needsDbUpgrade is {}", status.needs_db_upgrade);
                }
                if status.version != expected.version {
                    bail!("version is {}, expected {}", status.version, expected.version);
                }
                if status.versionstring != expected.versionstring {
                    bail!(
                        "versionstring is {}, expected {}",
                        status.versionstring,
                        expected.versionstring
                    );
                }
                if status.edition != expected.edition {
                    bail!("edition is '{}', expected '{}'", status.edition, expected.edition);
                }
                if status.extended_support != expected.extended_support {
                    bail!("extendedSupport is {}", status.extended_support);
                }
                Ok(())
            }
        })
        .await;
    report.log_summary("status expectations");
    Ok(report)
}

/// SAML SP metadata: the entityID must be derived from the node URL and
/// the certificate digest must match the pinned value.
pub async fn saml_metadata(ctx: &CheckContext) -> anyhow::Result<NodeReport> {
    let Some(saml) = ctx
        .target
        .expectations()
        .and_then(|environment| environment.saml.clone())
    else {
        info!(
            "No SAML expectations for target '{}', skipping metadata check",
            ctx.target.target
        );
        return Ok(NodeReport::default());
    };
    let nodes = nodes_with_gss(ctx);
    let report = ctx
        .dispatcher
        .run(&nodes, |node| {
            let ctx = ctx.clone();
            let expected_digest = saml.cert_digest.clone();
            async move {
                let url = if node == "gss" {
                    ctx.target.gss_metadata_url()
                } else {
                    ctx.target.metadata_url(&node)
                };
                let xml = ctx.ocs.get_text(&url).await.context("fetching metadata")?;
                let metadata = parse_sp_metadata(&xml).context("parsing metadata")?;
                let expected_entity = if node == "gss" {
                    ctx.target.gss_entity_id()
                } else {
                    ctx.target.entity_id(&node)
                };
                if metadata.entity_id != expected_entity {
                    bail!(
                        "entityID is {}, expected {}",
                        metadata.entity_id,
                        expected_entity
                    );
                }
                if metadata.cert_digest != expected_digest {
                    bail!("certificate digest is {}", metadata.cert_digest);
                }
                Ok(())
            }
        })
        .await;
    report.log_summary("saml metadata");
    Ok(report)
}

#[derive(Debug)]
pub struct SpMetadata {
    pub entity_id: String,
    /// Lowercase hex SHA-256 over the whitespace-stripped base64
    /// certificate body.
    pub cert_digest: String,
}

pub fn parse_sp_metadata(xml: &str) -> crate::Result<SpMetadata> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entity_id = None;
    let mut in_certificate = false;
    let mut certificate = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                match e.local_name().as_ref() {
                    b"EntityDescriptor" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.local_name().as_ref() == b"entityID" {
                                let value = attr
                                    .unescape_value()
                                    .map_err(|err| DriveError::Multistatus(err.to_string()))?;
                                entity_id = Some(value.into_owned());
                            }
                        }
                    }
                    b"X509Certificate" => in_certificate = true,
                    _ => {}
                }
            }
            Ok(Event::Text(t)) => {
                if in_certificate && certificate.is_none() {
                    let raw = t
                        .unescape()
                        .map_err(|err| DriveError::Multistatus(err.to_string()))?;
                    let stripped: String =
                        raw.chars().filter(|c| !c.is_whitespace()).collect();
                    certificate = Some(stripped);
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"X509Certificate" {
                    in_certificate = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DriveError::Multistatus(e.to_string())),
            _ => {}
        }
    }

    let entity_id = entity_id
        .ok_or_else(|| DriveError::Multistatus("metadata carries no entityID".to_string()))?;
    let certificate = certificate
        .ok_or_else(|| DriveError::Multistatus("metadata carries no certificate".to_string()))?;
    let digest = Sha256::digest(certificate.as_bytes());
    let cert_digest = digest.iter().map(|b| format!("{b:02x}")).collect();
    Ok(SpMetadata {
        entity_id,
        cert_digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const METADATA: &str = r#"<?xml version="1.0"?>
<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata"
    entityID="https://sunet.drive.test.sunet.se/index.php/apps/user_saml/saml/metadata">
  <md:SPSSODescriptor protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <md:KeyDescriptor use="signing">
      <ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#">
        <ds:X509Data>
          <ds:X509Certificate>
            MIICmzCCAYMCBgF4
            dGVzdGNlcnQ=
          </ds:X509Certificate>
        </ds:X509Data>
      </ds:KeyInfo>
    </md:KeyDescriptor>
  </md:SPSSODescriptor>
</md:EntityDescriptor>"#;

    #[test]
    fn extracts_entity_id_and_certificate_digest() {
        let metadata = parse_sp_metadata(METADATA).unwrap();
        assert_eq!(
            metadata.entity_id,
            "https://sunet.drive.test.sunet.se/index.php/apps/user_saml/saml/metadata"
        );
        // Digest of the whitespace-stripped base64 body.
        let expected: String = sha2::Sha256::digest(b"MIICmzCCAYMCBgF4dGVzdGNlcnQ=")
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        assert_eq!(metadata.cert_digest, expected);
    }

    #[test]
    fn missing_certificate_is_an_error() {
        let xml = r#"<md:EntityDescriptor xmlns:md="urn:oasis:names:tc:SAML:2.0:metadata"
            entityID="https://x"/>"#;
        assert!(parse_sp_metadata(xml).is_err());
    }

    #[test]
    fn missing_entity_id_is_an_error() {
        let xml = "<EntityDescriptor></EntityDescriptor>";
        assert!(parse_sp_metadata(xml).is_err());
    }
}
