//! OCS API checks: capabilities, users, groups, app inventory and the
//! CLI user lifecycle.

use anyhow::{bail, Context};
use tracing::info;

use crate::dispatch::NodeReport;
use crate::ocs::OcsMeta;
use crate::target::Role;
use crate::util::random_string;

use super::CheckContext;

/// Group every node must carry for the folder-level MFA enforcement.
const FORCE_MFA_GROUP: &str = "forcemfa";

/// Anonymous capabilities call: meta block and advertised version match
/// the environment's expectations.
pub async fn capabilities(ctx: &CheckContext) -> anyhow::Result<NodeReport> {
    let Some(expected) = ctx
        .target
        .expectations()
        .and_then(|environment| environment.ocs_capabilities.clone())
    else {
        bail!(
            "no OCS capability expectations for target '{}'",
            ctx.target.target
        );
    };
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            let expected = expected.clone();
            async move {
                let url = ctx.target.ocs_capabilities_url(&node);
                let (meta, caps) = ctx
                    .ocs
                    .capabilities(&url)
                    .await
                    .context("fetching capabilities")?;
                if meta.status != expected.ocs_meta_status {
                    bail!("meta status is '{}'", meta.status);
                }
                if meta.statuscode != expected.ocs_meta_statuscode_2 {
                    bail!("meta statuscode is {}", meta.statuscode);
                }
                if meta.message.as_deref() != Some(expected.ocs_meta_message.as_str()) {
                    bail!("meta message is {:?}", meta.message);
                }
                if caps.version.string != expected.ocs_data_version_string {
                    bail!(
                        "version is {}, expected {}",
                        caps.version.string,
                        expected.ocs_data_version_string
                    );
                }
                Ok(())
            }
        })
        .await;
    report.log_summary("ocs capabilities");
    Ok(report)
}

/// The user listing answers with a decodable envelope for the admin
/// account.
pub async fn node_users(ctx: &CheckContext) -> NodeReport {
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            async move {
                let auth = ctx.target.app_credentials(Role::Ocs, &node)?;
                let url = ctx.target.users_url(&node);
                let users = ctx.ocs.list_users(&url, &auth).await.context("listing users")?;
                info!("Received {} users from {}", users.len(), node);
                Ok(())
            }
        })
        .await;
    report.log_summary("ocs users");
    report
}

/// Groups are listable and the `forcemfa` group exists.
pub async fn node_groups(ctx: &CheckContext) -> NodeReport {
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            async move {
                let auth = ctx.target.app_credentials(Role::Ocs, &node)?;
                let url = ctx.target.groups_url(&node);
                let groups = ctx
                    .ocs
                    .list_groups(&url, &auth)
                    .await
                    .context("listing groups")?;
                info!("Received {} groups from {}", groups.len(), node);
                if !groups.iter().any(|g| g == FORCE_MFA_GROUP) {
                    bail!("group {} does not exist", FORCE_MFA_GROUP);
                }
                Ok(())
            }
        })
        .await;
    report.log_summary("ocs groups");
    report
}

/// App inventory: when `user_saml` is installed its version must match
/// the pinned one for the environment.
pub async fn app_versions(ctx: &CheckContext) -> NodeReport {
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            async move {
                let auth = ctx.target.app_credentials(Role::Ocs, &node)?;
                let apps = ctx
                    .ocs
                    .list_apps(&ctx.target.apps_url(&node), &auth)
                    .await
                    .context("listing apps")?;
                if !apps.iter().any(|a| a == "user_saml") {
                    info!("user_saml is not installed on {}", node);
                    return Ok(());
                }
                let app = ctx
                    .ocs
                    .app_info(&ctx.target.app_url(&node, "user_saml"), &auth)
                    .await
                    .context("fetching user_saml info")?;
                if app.id != "user_saml" {
                    bail!("app info id is '{}'", app.id);
                }
                if let Some(pinned) = ctx
                    .target
                    .expected
                    .app_version("user_saml", ctx.target.target.as_str())
                {
                    if app.version != pinned {
                        bail!("user_saml version is {}, expected {}", app.version, pinned);
                    }
                }
                info!("user_saml {} on {}", app.version, node);
                Ok(())
            }
        })
        .await;
    report.log_summary("app versions");
    report
}

fn check_meta(meta: &OcsMeta, operation: &str) -> anyhow::Result<()> {
    if !meta.is_ok() {
        bail!(
            "{} answered statuscode {} ({})",
            operation,
            meta.statuscode,
            meta.message.as_deref().unwrap_or("no message")
        );
    }
    Ok(())
}

/// Full lifecycle of a throwaway CLI user: create, disable, delete.
/// Each mutating call already retries once inside the client.
pub async fn user_lifecycle(ctx: &CheckContext) -> NodeReport {
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            async move {
                let auth = ctx.target.app_credentials(Role::Ocs, &node)?;
                let cli_user = format!("__cli_user_{node}");
                let cli_password = random_string(12);

                info!("Creating cli user {} on {}", cli_user, node);
                let meta = ctx
                    .ocs
                    .add_user(&ctx.target.users_url(&node), &auth, &cli_user, &cli_password)
                    .await
                    .context("creating cli user")?;
                check_meta(&meta, "create")?;

                info!("Disabling cli user {} on {}", cli_user, node);
                let meta = ctx
                    .ocs
                    .disable_user(&ctx.target.disable_user_url(&node, &cli_user), &auth)
                    .await
                    .context("disabling cli user")?;
                check_meta(&meta, "disable")?;

                info!("Deleting cli user {} on {}", cli_user, node);
                let meta = ctx
                    .ocs
                    .delete_user(&ctx.target.user_url(&node, &cli_user), &auth)
                    .await
                    .context("deleting cli user")?;
                check_meta(&meta, "delete")?;
                Ok(())
            }
        })
        .await;
    report.log_summary("user lifecycle");
    report
}

/// Runs every OCS suite and merges the per-node outcomes.
pub async fn run_all(ctx: &CheckContext) -> anyhow::Result<NodeReport> {
    let mut report = capabilities(ctx).await?;
    report.merge(node_users(ctx).await);
    report.merge(node_groups(ctx).await);
    report.merge(app_versions(ctx).await);
    report.merge(user_lifecycle(ctx).await);
    Ok(report)
}
