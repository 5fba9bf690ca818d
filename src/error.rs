use thiserror::Error;

/// Errors shared by the target resolver and the protocol clients.
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("environment variable {0} is not set")]
    MissingCredential(String),

    #[error("unknown target environment '{0}' (expected test, prod, localhost or custom)")]
    InvalidTarget(String),

    #[error("node '{node}' is not part of the configured node list")]
    UnknownNode { node: String },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("malformed OCS envelope: {0}")]
    Envelope(String),

    #[error("multistatus parse error: {0}")]
    Multistatus(String),

    #[error("invalid TOTP secret: {0}")]
    Totp(String),

    #[error("webdriver error: {0}")]
    WebDriver(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DriveError>;

/// Permission failures are recognized by the literal "403" anywhere in
/// the rendered error chain.
pub fn is_forbidden(err: &anyhow::Error) -> bool {
    format!("{err:#}").contains("403")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn forbidden_matches_on_substring() {
        let err = anyhow!("unexpected HTTP status 403 Forbidden from https://sunet.drive.test.sunet.se");
        assert!(is_forbidden(&err));
    }

    #[test]
    fn forbidden_matches_through_context_chain() {
        let err = anyhow!("status 403").context("deleting share 1234");
        assert!(is_forbidden(&err));
    }

    #[test]
    fn other_errors_are_not_forbidden() {
        let err = anyhow!("connection refused");
        assert!(!is_forbidden(&err));
    }
}
