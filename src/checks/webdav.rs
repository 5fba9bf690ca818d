//! WebDAV checks: existence probes, listings, folder cleanup and a full
//! upload/download/move round trip.

use anyhow::{bail, Context};
use tracing::{info, warn};

use crate::dispatch::NodeReport;
use crate::target::Role;
use crate::util::{random_string, timestamp_name};

use super::CheckContext;

const TEST_FOLDER: &str = "WebDAVTest";
const DNE_NAME: &str = "THISFOLDERDOESNOTEXIST";
const PERSONAL_BUCKET: &str = "selenium-personal";
const SYSTEM_BUCKET: &str = "selenium-system";
const MAX_CHECK: usize = 10;

/// A path that never exists keeps answering "not found", ten times in a
/// row. Catches caching or auth weirdness in front of the DAV endpoint.
pub async fn dne_check(ctx: &CheckContext, app_password: bool) -> NodeReport {
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            async move {
                let dav = ctx.dav_client(&node, Role::Selenium, app_password)?;
                for attempt in 1..=MAX_CHECK {
                    let found = dav
                        .exists(DNE_NAME)
                        .await
                        .with_context(|| format!("check {attempt} for {DNE_NAME}"))?;
                    if found {
                        bail!("{} reported as existing on check {}", DNE_NAME, attempt);
                    }
                }
                Ok(())
            }
        })
        .await;
    report.log_summary("webdav dne check");
    report
}

/// Home folder listing for every account role on the node.
pub async fn list_home(ctx: &CheckContext, app_password: bool) -> NodeReport {
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            async move {
                for role in [Role::Ocs, Role::Selenium, Role::SeleniumMfa] {
                    let dav = ctx.dav_client(&node, role, app_password)?;
                    let entries = dav
                        .list("")
                        .await
                        .with_context(|| format!("listing home for {role:?}"))?;
                    info!("{}: {} entries in home for {:?}", node, entries.len(), role);
                }
                Ok(())
            }
        })
        .await;
    report.log_summary("webdav list");
    report
}

/// Removes the shared test folder, retrying while the server keeps
/// resurrecting it, then verifies it is gone.
pub async fn check_and_remove(ctx: &CheckContext, app_password: bool) -> NodeReport {
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            async move {
                let dav = ctx.dav_client(&node, Role::Selenium, app_password)?;
                let mut count = 0;
                while count <= MAX_CHECK {
                    count += 1;
                    if !dav.exists(TEST_FOLDER).await.context("checking folder")? {
                        break;
                    }
                    info!("Removing folder {} on {}", TEST_FOLDER, node);
                    dav.delete(TEST_FOLDER).await.context("removing folder")?;
                    if count > 1 {
                        warn!("Multiple tries to remove {} on {}: {}", TEST_FOLDER, node, count);
                    }
                }
                if dav.exists(TEST_FOLDER).await? {
                    bail!("{} still exists after {} removal attempts", TEST_FOLDER, count);
                }
                Ok(())
            }
        })
        .await;
    report.log_summary("webdav check and remove");
    report
}

/// Empties the selenium bucket folders used by the UI tests. Only
/// entries inside the buckets are removed, never the buckets themselves.
pub async fn clean_selenium_folders(ctx: &CheckContext, app_password: bool) -> NodeReport {
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            async move {
                let dav = ctx.dav_client(&node, Role::Selenium, app_password)?;
                for bucket in [PERSONAL_BUCKET, SYSTEM_BUCKET] {
                    if !dav.exists(bucket).await.context("checking bucket")? {
                        info!("Bucket {} does not exist on {}", bucket, node);
                        continue;
                    }
                    let entries = dav.list(bucket).await.context("listing bucket")?;
                    info!("Cleaning {} entries from {} on {}", entries.len(), bucket, node);
                    for entry in entries {
                        let path = format!("{}/{}", bucket, entry.name);
                        dav.delete(&path)
                            .await
                            .with_context(|| format!("deleting {path}"))?;
                    }
                }
                Ok(())
            }
        })
        .await;
    report.log_summary("webdav clean selenium folders");
    report
}

/// Upload, download, move and delete a timestamped file inside the test
/// folder.
pub async fn round_trip(ctx: &CheckContext, app_password: bool) -> NodeReport {
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            async move {
                let dav = ctx.dav_client(&node, Role::Selenium, app_password)?;
                if !dav.exists(TEST_FOLDER).await? {
                    dav.mkcol(TEST_FOLDER).await.context("creating test folder")?;
                }

                let name = format!("{}.txt", timestamp_name());
                let path = format!("{TEST_FOLDER}/{name}");
                let content = random_string(256).into_bytes();

                dav.put(&path, content.clone()).await.context("uploading")?;
                if !dav.exists(&path).await? {
                    bail!("{} missing after upload", path);
                }

                let downloaded = dav.get(&path).await.context("downloading")?;
                if downloaded != content {
                    bail!(
                        "downloaded content differs ({} bytes, expected {})",
                        downloaded.len(),
                        content.len()
                    );
                }

                let renamed = format!("{TEST_FOLDER}/renamed-{name}");
                dav.rename(&path, &renamed).await.context("moving")?;
                if dav.exists(&path).await? {
                    bail!("{} still exists after move", path);
                }
                if !dav.exists(&renamed).await? {
                    bail!("{} missing after move", renamed);
                }

                dav.delete(TEST_FOLDER).await.context("cleaning up")?;
                Ok(())
            }
        })
        .await;
    report.log_summary("webdav round trip");
    report
}

/// Runs every WebDAV suite and merges the per-node outcomes.
pub async fn run_all(ctx: &CheckContext, app_password: bool) -> NodeReport {
    let mut report = dne_check(ctx, app_password).await;
    report.merge(list_home(ctx, app_password).await);
    report.merge(check_and_remove(ctx, app_password).await);
    report.merge(round_trip(ctx, app_password).await);
    report.merge(clean_selenium_folders(ctx, app_password).await);
    report
}
