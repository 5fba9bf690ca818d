//! Acceptance checks for a multi-tenant Nextcloud deployment.
//!
//! The library half of the `drivecheck` binary: the `expected.yaml`
//! loader, the per-node URL and credential resolver, thin OCS/WebDAV/
//! WebDriver clients, an RFC 6238 code generator for the MFA flows, and
//! the per-node fan-out used to run one check against the whole fleet.

pub mod checks;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ocs;
pub mod target;
pub mod totp;
pub mod util;
pub mod webdav;
pub mod webdriver;

pub use config::Expected;
pub use dispatch::{Dispatcher, NodeReport};
pub use error::{DriveError, Result};
pub use target::{Role, TargetEnv, TestTarget};
