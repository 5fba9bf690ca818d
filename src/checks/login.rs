//! Browser login flows over the WebDriver protocol: plain password
//! login, the TOTP challenge, and the occasional ToS dialog.

use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{debug, info};

use crate::dispatch::NodeReport;
use crate::target::{Credentials, Role};
use crate::totp::Totp;
use crate::webdriver::{Browser, Session, WebDriver};

use super::CheckContext;

const USER_FIELD: &str = "input#user";
const PASSWORD_FIELD: &str = "input#password";
const SUBMIT_BUTTON: &str = "button[type='submit']";
const TOTP_FIELD: &str = "input[name='challenge']";
const TOS_ACCEPT_BUTTON: &str = "#terms_of_service #accept";

const ELEMENT_WAIT: Duration = Duration::from_secs(30);
const DASHBOARD_WAIT: Duration = Duration::from_secs(45);
/// Minimum validity left on a TOTP code before it gets typed.
const TOTP_MIN_REMAINING: u64 = 3;

#[derive(Debug, Clone, Copy)]
pub struct LoginOptions {
    pub browser: Browser,
    pub headless: bool,
    pub mfa: bool,
}

/// Drives the node's login page to the dashboard: credentials, an
/// optional TOTP challenge, an optional ToS dialog.
pub async fn login_flow(
    session: &Session,
    login_url: &str,
    credentials: &Credentials,
    totp: Option<&Totp>,
) -> anyhow::Result<()> {
    session.navigate(login_url).await.context("opening login page")?;

    let user_field = session
        .wait_for_element(USER_FIELD, ELEMENT_WAIT)
        .await
        .context("waiting for username field")?;
    session.send_keys(&user_field, &credentials.username).await?;
    let password_field = session.find_element(PASSWORD_FIELD).await?;
    session.send_keys(&password_field, &credentials.password).await?;
    let submit = session.find_element(SUBMIT_BUTTON).await?;
    session.click(&submit).await.context("submitting credentials")?;

    if let Some(totp) = totp {
        let challenge = session
            .wait_for_element(TOTP_FIELD, ELEMENT_WAIT)
            .await
            .context("waiting for TOTP challenge")?;
        let code = totp.fresh_code(TOTP_MIN_REMAINING).await;
        debug!("Submitting TOTP code");
        session.send_keys(&challenge, &code).await?;
        let confirm = session.find_element(SUBMIT_BUTTON).await?;
        session.click(&confirm).await.context("confirming TOTP code")?;
    }

    // The dashboard is the success signal; a ToS dialog may get in the
    // way on first login and is clicked through.
    let deadline = tokio::time::Instant::now() + DASHBOARD_WAIT;
    loop {
        let url = session.current_url().await.context("reading current url")?;
        if url.contains("/apps/dashboard") {
            return Ok(());
        }
        if let Ok(accept) = session.find_element(TOS_ACCEPT_BUTTON).await {
            info!("Accepting terms of service dialog");
            session.click(&accept).await?;
        }
        if tokio::time::Instant::now() >= deadline {
            bail!("dashboard not reached, stuck on {}", url);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

/// Runs the login flow against every full node, one browser session per
/// node. Sessions are always closed, pass or fail.
pub async fn login_all(ctx: &CheckContext, options: LoginOptions) -> anyhow::Result<NodeReport> {
    let driver = WebDriver::from_env(Duration::from_secs(60))?;
    let report = ctx
        .dispatcher
        .run(&ctx.target.fullnodes.clone(), |node| {
            let ctx = ctx.clone();
            let driver = driver.clone();
            async move {
                let role = if options.mfa { Role::SeleniumMfa } else { Role::Selenium };
                let credentials = ctx.target.credentials(role, &node)?;
                let totp = if options.mfa {
                    Some(Totp::new(&ctx.target.totp_secret(Role::SeleniumMfa, &node)?)?)
                } else {
                    None
                };

                let session = driver
                    .new_session(options.browser, options.headless)
                    .await
                    .context("starting browser session")?;
                let login_url = ctx.target.login_url(&node);
                let outcome = login_flow(&session, &login_url, &credentials, totp.as_ref()).await;
                if let Err(e) = session.quit().await {
                    debug!("Closing session after login flow failed: {}", e);
                }
                outcome.with_context(|| format!("login flow for {node}"))
            }
        })
        .await;
    report.log_summary(if options.mfa { "mfa login" } else { "login" });
    Ok(report)
}
