use rand::distr::Alphanumeric;
use rand::RngExt;

/// Random mixed-case alphanumeric string, used for throwaway passwords
/// and file content.
pub fn random_string(length: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Timestamped name for test artifacts, e.g. `2026-08-25_10-31-07`.
pub fn timestamp_name() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}
