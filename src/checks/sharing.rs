//! Share checks: public link lifecycle, federated shares between nodes,
//! and stale share cleanup.

use anyhow::{bail, Context};
use tracing::{info, warn};

use crate::dispatch::NodeReport;
use crate::error::is_forbidden;
use crate::ocs::ShareRequest;
use crate::target::Role;
use crate::util::timestamp_name;

use super::CheckContext;

const SHARE_TYPE_PUBLIC_LINK: i64 = 3;
const SHARE_TYPE_FEDERATED: i64 = 6;

/// Create a public link on a fresh file, find it in the listing, delete
/// it again.
pub async fn share_lifecycle(ctx: &CheckContext) -> NodeReport {
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            async move {
                let auth = ctx.target.app_credentials(Role::Selenium, &node)?;
                let dav = ctx.dav_client(&node, Role::Selenium, true)?;

                let filename = format!("sharetest-{}.txt", timestamp_name());
                dav.put(&filename, b"share me".to_vec())
                    .await
                    .context("uploading share target")?;

                let request = ShareRequest {
                    path: format!("/{filename}"),
                    share_type: SHARE_TYPE_PUBLIC_LINK,
                    share_with: None,
                    permissions: Some(1),
                };
                let (meta, data) = ctx
                    .ocs
                    .create_share(&ctx.target.shares_url(&node), &auth, &request)
                    .await
                    .context("creating share")?;
                if !meta.is_ok() {
                    bail!("share creation answered statuscode {}", meta.statuscode);
                }
                let share_id = data
                    .get("id")
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .context("share reply carries no id")?;
                info!("Created share {} on {}", share_id, node);

                let shares = ctx
                    .ocs
                    .list_shares(&ctx.target.shares_url(&node), &auth)
                    .await
                    .context("listing shares")?;
                if !shares.iter().any(|s| s.id == share_id) {
                    bail!("share {} missing from listing", share_id);
                }

                let meta = ctx
                    .ocs
                    .delete_share(&ctx.target.share_url(&node, &share_id), &auth)
                    .await
                    .context("deleting share")?;
                if !meta.is_ok() {
                    bail!("share deletion answered statuscode {}", meta.statuscode);
                }

                dav.delete(&filename).await.context("removing share target")?;
                Ok(())
            }
        })
        .await;
    report.log_summary("share lifecycle");
    report
}

/// Federation cloud id for the selenium user on `node`:
/// `user@host`, without the scheme.
fn cloud_id(ctx: &CheckContext, node: &str) -> anyhow::Result<String> {
    let username = ctx.target.username(Role::Selenium, node)?;
    let host = ctx
        .target
        .node_url(node)
        .trim_start_matches("https://")
        .to_string();
    Ok(format!("{username}@{host}"))
}

/// Each full node sends a federated share to the next node in the list
/// and removes it again. The receiving side's remote share listing must
/// stay decodable.
pub async fn federated_shares(ctx: &CheckContext) -> anyhow::Result<NodeReport> {
    let nodes = ctx.target.fullnodes.clone();
    if nodes.len() < 2 {
        info!("Fewer than two full nodes, skipping federated share checks");
        return Ok(NodeReport::default());
    }
    let report = ctx
        .dispatcher
        .run(&nodes.clone(), |node| {
            let ctx = ctx.clone();
            let nodes = nodes.clone();
            async move {
                let position = nodes.iter().position(|n| *n == node).unwrap_or(0);
                let receiver = &nodes[(position + 1) % nodes.len()];
                let auth = ctx.target.app_credentials(Role::Selenium, &node)?;
                let dav = ctx.dav_client(&node, Role::Selenium, true)?;

                let filename = format!("federated-{}.txt", timestamp_name());
                dav.put(&filename, b"federated share".to_vec())
                    .await
                    .context("uploading federated share target")?;

                let request = ShareRequest {
                    path: format!("/{filename}"),
                    share_type: SHARE_TYPE_FEDERATED,
                    share_with: Some(cloud_id(&ctx, receiver)?),
                    permissions: None,
                };
                let (meta, data) = ctx
                    .ocs
                    .create_share(&ctx.target.shares_url(&node), &auth, &request)
                    .await
                    .context("sending federated share")?;
                if !meta.is_ok() {
                    bail!(
                        "federated share to {} answered statuscode {}",
                        receiver,
                        meta.statuscode
                    );
                }
                info!("Sent federated share from {} to {}", node, receiver);

                // The receiving side must still answer a well-formed
                // remote share listing.
                let receiver_auth = ctx.target.app_credentials(Role::Selenium, receiver)?;
                ctx.ocs
                    .list_remote_shares(&ctx.target.remote_shares_url(receiver), &receiver_auth)
                    .await
                    .context("listing remote shares on receiver")?;

                if let Some(share_id) = data.get("id").map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                }) {
                    let meta = ctx
                        .ocs
                        .delete_share(&ctx.target.share_url(&node, &share_id), &auth)
                        .await
                        .context("removing federated share")?;
                    if !meta.is_ok() {
                        bail!("federated share removal answered {}", meta.statuscode);
                    }
                }

                dav.delete(&filename)
                    .await
                    .context("removing federated share target")?;
                Ok(())
            }
        })
        .await;
    report.log_summary("federated shares");
    Ok(report)
}

/// Whether one stale share deletion removed the share (`true`) or hit a
/// foreign share and should be skipped (`false`). OCS reports a
/// permission failure either in the meta block (HTTP 200, statuscode
/// 403) or as a transport-level 403; both shapes go through the same
/// "403" substring match.
fn deletion_outcome(
    share_id: &str,
    result: crate::Result<crate::ocs::OcsMeta>,
) -> anyhow::Result<bool> {
    let err = match result {
        Ok(meta) if meta.is_ok() => return Ok(true),
        Ok(meta) => anyhow::anyhow!(
            "deleting share {} answered statuscode {} ({})",
            share_id,
            meta.statuscode,
            meta.message.as_deref().unwrap_or("no message")
        ),
        Err(e) => anyhow::Error::from(e).context(format!("deleting share {share_id}")),
    };
    if is_forbidden(&err) {
        return Ok(false);
    }
    Err(err)
}

/// Deletes every share the selenium user still owns. Shares owned by
/// someone else answer 403 here and are skipped rather than failed.
pub async fn delete_stale_shares(ctx: &CheckContext) -> NodeReport {
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            async move {
                let auth = ctx.target.app_credentials(Role::Selenium, &node)?;
                let shares = ctx
                    .ocs
                    .list_shares(&ctx.target.shares_url(&node), &auth)
                    .await
                    .context("listing shares")?;
                info!("Deleting {} stale shares on {}", shares.len(), node);
                for share in shares {
                    let result = ctx
                        .ocs
                        .delete_share(&ctx.target.share_url(&node, &share.id), &auth)
                        .await;
                    if !deletion_outcome(&share.id, result)? {
                        warn!("Share {} on {} is foreign, skipping", share.id, node);
                    }
                }
                Ok(())
            }
        })
        .await;
    report.log_summary("stale share cleanup");
    report
}

/// Runs every sharing suite and merges the per-node outcomes.
pub async fn run_all(ctx: &CheckContext) -> anyhow::Result<NodeReport> {
    let mut report = share_lifecycle(ctx).await;
    report.merge(federated_shares(ctx).await?);
    report.merge(delete_stale_shares(ctx).await);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriveError;
    use crate::ocs::OcsMeta;

    fn meta(statuscode: i64) -> OcsMeta {
        OcsMeta {
            status: if statuscode == 100 { "ok" } else { "failure" }.to_string(),
            statuscode,
            message: None,
        }
    }

    #[test]
    fn successful_deletion_counts_as_removed() {
        assert!(deletion_outcome("42", Ok(meta(100))).unwrap());
    }

    #[test]
    fn meta_statuscode_403_skips_the_foreign_share() {
        assert!(!deletion_outcome("42", Ok(meta(403))).unwrap());
    }

    #[test]
    fn transport_403_skips_the_foreign_share() {
        let err = DriveError::UnexpectedStatus {
            url: "https://sunet.drive.test.sunet.se".to_string(),
            status: reqwest::StatusCode::FORBIDDEN,
        };
        assert!(!deletion_outcome("42", Err(err)).unwrap());
    }

    #[test]
    fn other_failure_codes_still_fail_the_node() {
        let err = deletion_outcome("42", Ok(meta(998))).unwrap_err();
        assert!(err.to_string().contains("998"));

        let transport = DriveError::UnexpectedStatus {
            url: "https://sunet.drive.test.sunet.se".to_string(),
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        };
        assert!(deletion_outcome("42", Err(transport)).is_err());
    }
}
