use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use drivecheck::checks::{self, CheckContext};
use drivecheck::dispatch::NodeReport;
use drivecheck::target::{Role, TargetEnv, TestTarget};
use drivecheck::totp::Totp;
use drivecheck::webdriver::Browser;
use drivecheck::Expected;

#[derive(Parser)]
#[command(
    name = "drivecheck",
    version,
    about = "Acceptance checks for a multi-tenant Nextcloud deployment"
)]
struct Cli {
    /// Target environment; falls back to NEXTCLOUD_TEST_TARGET, then `test`.
    #[arg(long, global = true, value_enum)]
    target: Option<TargetEnv>,

    /// Expectations fixture.
    #[arg(long, global = true, default_value = "expected.yaml")]
    expected_file: PathBuf,

    /// Comma-separated node subset to check instead of the full lists.
    #[arg(long, global = true)]
    nodes: Option<String>,

    /// Skip TLS certificate verification (localhost targets).
    #[arg(long, global = true)]
    insecure: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Status pages, status.php expectations and SAML metadata.
    Status,
    /// OCS capabilities, users, groups, apps and the cli user lifecycle.
    Ocs,
    /// WebDAV probes, listings, cleanup and a file round trip.
    Webdav {
        /// Authenticate with app passwords instead of login passwords.
        #[arg(long)]
        app_password: bool,
    },
    /// Collabora document server capabilities.
    Collabora,
    /// Share lifecycle, federated shares and stale share cleanup.
    Sharing,
    /// Browser login flow against every full node.
    Login {
        #[arg(long, default_value = "chrome")]
        browser: String,
        /// Log in as the MFA user and answer the TOTP challenge.
        #[arg(long)]
        mfa: bool,
        #[arg(long)]
        headless: bool,
    },
    /// Print the current TOTP code for a node's MFA user.
    Otp { node: String },
    /// Verify that every credential variable the node list needs is set.
    EnvCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run() -> anyhow::Result<bool> {
    let cli = Cli::parse();

    let expected = Expected::load(&cli.expected_file)
        .with_context(|| format!("loading {}", cli.expected_file.display()))?;

    let mut target = match cli.target {
        Some(target_env) => {
            let mut target = TestTarget::new(expected, target_env);
            if let Ok(customer) = std::env::var("NEXTCLOUD_TEST_CUSTOMERS") {
                target.restrict_nodes(&[customer])?;
            }
            target
        }
        None => TestTarget::from_env(expected)?,
    };
    if let Some(nodes) = &cli.nodes {
        let subset: Vec<String> = nodes
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        target.restrict_nodes(&subset)?;
    }
    info!(
        "Checking target '{}' with {} nodes",
        target.target,
        target.allnodes.len()
    );

    match cli.command {
        Command::Otp { node } => {
            let secret = target.totp_secret(Role::SeleniumMfa, &node)?;
            let user = target.username(Role::SeleniumMfa, &node)?;
            let totp = Totp::new(&secret)?;
            println!(
                "OTP for user {} on {} in {}: {}",
                user, node, target.target, totp.code_now()
            );
            return Ok(true);
        }
        Command::EnvCheck => {
            let inventory = target.credential_inventory();
            let missing: Vec<&str> = inventory
                .iter()
                .filter(|(_, present)| !present)
                .map(|(var, _)| var.as_str())
                .collect();
            if missing.is_empty() {
                info!("All {} credential variables are set", inventory.len());
                return Ok(true);
            }
            for var in &missing {
                error!("Missing credential variable: {}", var);
            }
            return Ok(false);
        }
        _ => {}
    }

    let ctx = CheckContext::new(target, cli.insecure)?;
    let report: NodeReport = match cli.command {
        Command::Status => {
            let mut report = checks::status::status_pages(&ctx).await;
            report.merge(checks::status::status_expectations(&ctx).await?);
            report.merge(checks::status::saml_metadata(&ctx).await?);
            report
        }
        Command::Ocs => checks::ocs::run_all(&ctx).await?,
        Command::Webdav { app_password } => checks::webdav::run_all(&ctx, app_password).await,
        Command::Collabora => checks::collabora::capabilities(&ctx).await,
        Command::Sharing => checks::sharing::run_all(&ctx).await?,
        Command::Login {
            browser,
            mfa,
            headless,
        } => {
            let options = checks::login::LoginOptions {
                browser: browser.parse::<Browser>()?,
                headless,
                mfa,
            };
            checks::login::login_all(&ctx, options).await?
        }
        Command::Otp { .. } | Command::EnvCheck => unreachable!("handled above"),
    };

    let passed = report.all_passed();
    if passed {
        info!("All checks passed on {} nodes", report.len());
    } else {
        error!("Failed nodes: {}", report.failed_nodes().join(", "));
    }
    Ok(passed)
}
