//! Human-presentable voucher codes.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PREFIX: &str = "RM";
const GROUP_LEN: usize = 8;

/// Voucher code in the format `RM-XXXXXXXX-XXXXXXXX` (upper-case hex groups).
///
/// Codes are drawn from two independent v4 UUIDs; uniqueness is ultimately
/// enforced by the voucher store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VoucherCode(String);

/// Error returned for strings that are not valid voucher codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid voucher code: {0}")]
pub struct InvalidVoucherCode(pub String);

impl VoucherCode {
    /// Generates a new random code.
    pub fn generate() -> Self {
        let first = group();
        let second = group();
        Self(format!("{PREFIX}-{first}-{second}"))
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn group() -> String {
    Uuid::new_v4().simple().to_string()[..GROUP_LEN].to_ascii_uppercase()
}

impl FromStr for VoucherCode {
    type Err = InvalidVoucherCode;

    /// Parses a code, accepting lower-case input.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        let mut parts = normalized.split('-');
        let valid = parts.next() == Some(PREFIX)
            && parts.by_ref().take(2).filter(|p| is_group(p)).count() == 2
            && parts.next().is_none();
        if valid {
            Ok(Self(normalized))
        } else {
            Err(InvalidVoucherCode(s.to_string()))
        }
    }
}

fn is_group(part: &str) -> bool {
    part.len() == GROUP_LEN && part.chars().all(|c| c.is_ascii_hexdigit())
}

impl TryFrom<String> for VoucherCode {
    type Error = InvalidVoucherCode;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VoucherCode> for String {
    fn from(code: VoucherCode) -> Self {
        code.0
    }
}

impl std::fmt::Display for VoucherCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_code_has_expected_shape() {
        let code = VoucherCode::generate();
        let s = code.as_str();
        assert_eq!(s.len(), 2 + 1 + 8 + 1 + 8);
        assert!(s.starts_with("RM-"));
        assert_eq!(s.parse::<VoucherCode>().unwrap(), code);
    }

    #[test]
    fn generated_codes_differ() {
        assert_ne!(VoucherCode::generate(), VoucherCode::generate());
    }

    #[test]
    fn parse_normalizes_case() {
        let code: VoucherCode = "rm-0a1b2c3d-deadbeef".parse().unwrap();
        assert_eq!(code.as_str(), "RM-0A1B2C3D-DEADBEEF");
    }

    #[test]
    fn parse_rejects_malformed_codes() {
        for bad in [
            "",
            "RM-0A1B2C3D",
            "XX-0A1B2C3D-DEADBEEF",
            "RM-0A1B2C3D-DEADBEEF-00",
            "RM-0A1B2C3Z-DEADBEEF",
            "RM-0A1B2C3-DEADBEEF0",
        ] {
            assert!(bad.parse::<VoucherCode>().is_err(), "{bad}");
        }
    }

    #[test]
    fn deserializing_validates() {
        let ok: VoucherCode = serde_json::from_str("\"RM-00000000-FFFFFFFF\"").unwrap();
        assert_eq!(ok.as_str(), "RM-00000000-FFFFFFFF");
        assert!(serde_json::from_str::<VoucherCode>("\"nope\"").is_err());
    }
}
