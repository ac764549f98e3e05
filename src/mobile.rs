use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

const MOBILE_LEN: usize = 10;
const COUNTRY_CODE: &str = "962";

static LOCAL_MOBILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0[75]\d{8}$").expect("static mobile pattern"));

/// A mobile number in canonical local form: ten ASCII digits, leading `0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NormalizedMobile(String);

impl NormalizedMobile {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the number looks like a local `07`/`05` mobile.
    pub fn is_local_mobile(&self) -> bool {
        LOCAL_MOBILE.is_match(&self.0)
    }
}

impl fmt::Display for NormalizedMobile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NormalizedMobile {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Maps any user-entered phone string to the canonical 10-digit form.
///
/// The rules are lossy on purpose: distinct malformed inputs may collapse to
/// the same key. Numbers that fail the local mobile pattern are logged and
/// returned anyway.
pub fn normalize(raw: &str) -> NormalizedMobile {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() > MOBILE_LEN {
        if digits.starts_with(COUNTRY_CODE) && digits.len() == 12 {
            digits = format!("0{}", &digits[COUNTRY_CODE.len()..]);
        } else {
            digits = digits[digits.len() - MOBILE_LEN..].to_string();
        }
    }

    if digits.len() == 9 && (digits.starts_with('7') || digits.starts_with('5')) {
        digits.insert(0, '0');
    }

    if digits.len() != MOBILE_LEN || !digits.starts_with('0') {
        if digits.len() < MOBILE_LEN {
            digits = format!("{:0>width$}", digits, width = MOBILE_LEN);
        } else {
            digits = format!("0{}", &digits[1..MOBILE_LEN]);
        }
    }

    let mobile = NormalizedMobile(digits);
    if !mobile.is_local_mobile() {
        warn!(raw, normalized = %mobile, "mobile number does not match the local 07/05 format");
    }
    mobile
}
