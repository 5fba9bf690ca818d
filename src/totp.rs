use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha1::Sha1;
use tracing::debug;

use crate::error::{DriveError, Result};

type HmacSha1 = Hmac<Sha1>;

const DEFAULT_STEP: u64 = 30;
const DEFAULT_DIGITS: u32 = 6;

/// RFC 6238 code generator for the MFA login flows. Nextcloud's TOTP app
/// hands out base32 secrets; codes are the standard 6-digit SHA-1 flavor
/// with a 30 second window.
pub struct Totp {
    key: Vec<u8>,
    step: u64,
    digits: u32,
}

impl Totp {
    pub fn new(secret: &str) -> Result<Self> {
        let normalized: String = secret
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        let key = base32::decode(
            base32::Alphabet::Rfc4648 { padding: false },
            normalized.trim_end_matches('='),
        )
        .ok_or_else(|| DriveError::Totp("secret is not valid base32".to_string()))?;
        if key.is_empty() {
            return Err(DriveError::Totp("secret is empty".to_string()));
        }
        Ok(Self {
            key,
            step: DEFAULT_STEP,
            digits: DEFAULT_DIGITS,
        })
    }

    /// Code for an arbitrary unix timestamp.
    pub fn code_at(&self, unix_secs: u64) -> String {
        let counter = unix_secs / self.step;
        let mut mac =
            HmacSha1::new_from_slice(&self.key).expect("hmac accepts any key length");
        mac.update(&counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();
        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        let binary = ((digest[offset] & 0x7f) as u32) << 24
            | (digest[offset + 1] as u32) << 16
            | (digest[offset + 2] as u32) << 8
            | digest[offset + 3] as u32;
        let code = binary % 10u32.pow(self.digits);
        format!("{:0width$}", code, width = self.digits as usize)
    }

    pub fn code_now(&self) -> String {
        self.code_at(unix_now())
    }

    /// Seconds until the current window rolls over.
    pub fn seconds_remaining(&self) -> u64 {
        self.step - (unix_now() % self.step)
    }

    /// Code with at least `min_remaining` seconds of validity left.
    /// Sleeps into the next window when the current one is about to
    /// expire, the way the login flow waited for codes to roll over.
    pub async fn fresh_code(&self, min_remaining: u64) -> String {
        let remaining = self.seconds_remaining();
        if remaining < min_remaining {
            debug!("TOTP window ends in {}s, waiting for the next one", remaining);
            tokio::time::sleep(Duration::from_secs(remaining)).await;
        }
        self.code_now()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
