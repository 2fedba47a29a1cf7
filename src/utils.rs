//! Utility functions for identifiers and request numbering

use bech32::Bech32m;
use chrono::{Datelike, Utc};
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Human readable request number, e.g. `EXP-2026-000042`.
pub fn format_request_number(prefix: &str, seq: u64) -> String {
    format!("{}-{}-{:06}", prefix, Utc::now().year(), seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_number_is_zero_padded() {
        let number = format_request_number("EXP", 42);
        assert!(number.starts_with("EXP-"));
        assert!(number.ends_with("-000042"));
    }
}
