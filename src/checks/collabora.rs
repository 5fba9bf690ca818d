//! Collabora document server checks via `/hosting/capabilities`.

use anyhow::{bail, Context};
use tracing::info;

use crate::dispatch::NodeReport;

use super::CheckContext;

/// Every document server advertises its capabilities as JSON; the
/// product version must match the pin when one is configured.
pub async fn capabilities(ctx: &CheckContext) -> NodeReport {
    let pinned = ctx
        .target
        .expectations()
        .and_then(|environment| environment.collabora.clone())
        .and_then(|c| c.product_version);
    let report = ctx
        .dispatcher
        .run(&ctx.target.doc_nodes.clone(), |doc_node| {
            let ctx = ctx.clone();
            let pinned = pinned.clone();
            async move {
                let url = ctx.target.collabora_capabilities_url(&doc_node);
                let caps = ctx
                    .ocs
                    .get_json(&url)
                    .await
                    .context("fetching hosting capabilities")?;
                let Some(object) = caps.as_object() else {
                    bail!("capabilities reply is not a JSON object");
                };
                if object.is_empty() {
                    bail!("capabilities reply is empty");
                }
                if !object.contains_key("convert-to") {
                    bail!("capabilities reply carries no convert-to section");
                }
                let product_version = caps
                    .get("productVersion")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                info!("Collabora doc{}: productVersion {}", doc_node, product_version);
                if let Some(pinned) = pinned {
                    if product_version != pinned {
                        bail!(
                            "productVersion is {}, expected {}",
                            product_version,
                            pinned
                        );
                    }
                }
                Ok(())
            }
        })
        .await;
    report.log_summary("collabora capabilities");
    report
}
