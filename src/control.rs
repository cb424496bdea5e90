//! Control/range normalization stage family — neutralizes raw control
//! bytes, encoded BOM/bidi-override smuggling, and out-of-range bytes.
//!
//! These stages run in place: the replaced content is never a meaningful
//! attack signal on its own, so nothing is lost by overwriting it with a
//! single canonical token.

use crate::value::Value;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

fn re(cell: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static stage regex must compile"))
}

/// Canonical "null-byte attack" token the matcher keys on.
pub const NULL_SENTINEL: &str = "%00";

/// Placeholder for bytes outside the ASCII range.
const RANGE_PLACEHOLDER: char = 'U';

// ─── Newline normalization ──────────────────────────────────────────────────

/// Replace newline/carriage-return with a single space, in place. Runs
/// first so every later regex stage can treat the value as single-line.
pub fn newlines(mut value: Value) -> Value {
    let replaced = value.as_str().replace(['\n', '\r'], " ");
    value.replace_with(replaced);
    value
}

// ─── Control-byte neutralization ────────────────────────────────────────────

static ENCODED_BIDI_RE: OnceLock<Regex> = OnceLock::new();
static RAW_BIDI_RE: OnceLock<Regex> = OnceLock::new();

/// Neutralize raw control bytes to the `%00` sentinel, then look for
/// URL-encoded BOM / bidirectional-override sequences and their
/// numeric-entity spellings; when found, strip them and flag with the
/// sentinel.
///
/// The search runs twice: once over the URL-encoded form of the value
/// (catching raw multi-byte sequences) and once over the raw value
/// (catching entity spellings).
pub fn control_chars(value: Value) -> Value {
    let mut neutralized = String::with_capacity(value.len());
    for c in value.as_str().chars() {
        match c as u32 {
            // tab/newline/CR are handled by the newline stage, not here
            0..=8 | 11 | 12 | 14..=19 => neutralized.push_str(NULL_SENTINEL),
            _ => neutralized.push(c),
        }
    }

    let encoded_bidi = re(
        &ENCODED_BIDI_RE,
        r"(?i)(?:%E[23]%8[01]%[A89]\w|%EF%BB%BF)|(?:&#(?:65|8)\d{3};?)",
    );
    let raw_bidi = re(
        &RAW_BIDI_RE,
        r"(?i)(?:&#(?:65|8)\d{3};?)|(?:&#x(?:fe|20)\w{2};?)",
    );

    let encoded = url_encode(&neutralized);
    if encoded_bidi.is_match(&encoded) {
        debug!(stage = "control_chars", "encoded BOM/bidi sequence stripped");
        let mut out = Value::from(url_decode(&encoded_bidi.replace_all(&encoded, "")));
        out.append(NULL_SENTINEL);
        out
    } else if raw_bidi.is_match(&neutralized) {
        debug!(stage = "control_chars", "entity-encoded bidi sequence stripped");
        let mut out = Value::from(url_decode(&raw_bidi.replace_all(&neutralized, "")));
        out.append(NULL_SENTINEL);
        out
    } else {
        Value::from(neutralized)
    }
}

// ─── Out-of-range normalization ─────────────────────────────────────────────

/// Replace every byte with ordinal >= 127 by the `U` placeholder, in
/// place. Collapsing extended bytes to one token keeps the attack's ASCII
/// skeleton without a combinatorial signature blow-up.
pub fn out_of_range(mut value: Value) -> Value {
    if value.as_str().bytes().all(|b| b < 127) {
        return value;
    }
    let mut out = String::with_capacity(value.len());
    for b in value.as_str().bytes() {
        if b >= 127 {
            out.push(RANGE_PLACEHOLDER);
        } else {
            out.push(b as char);
        }
    }
    value.replace_with(out);
    value
}

// ─── Percent-encoding helpers ───────────────────────────────────────────────

/// Byte-wise application/x-www-form-urlencoded encoding: unreserved bytes
/// pass through, space becomes `+`, everything else `%XX`.
pub(crate) fn url_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' => out.push(b as char),
            b' ' => out.push('+'),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// Inverse of [`url_encode`]; malformed `%` sequences pass through
/// unchanged, never an error.
pub(crate) fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => {
                let hi = (bytes[i + 1] as char).to_digit(16);
                let lo = (bytes[i + 2] as char).to_digit(16);
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    out.push((hi << 4 | lo) as u8);
                    i += 3;
                } else {
                    out.push(b'%');
                    i += 1;
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newlines_to_space() {
        let v = newlines(Value::new("a\nb\rc"));
        assert_eq!(v.as_str(), "a b c");
    }

    #[test]
    fn test_newlines_idempotent() {
        let once = newlines(Value::new("a\nb"));
        let twice = newlines(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_control_bytes_become_sentinel() {
        let v = control_chars(Value::new("a\u{0}b\u{1}c"));
        assert_eq!(v.as_str(), "a%00b%00c");
    }

    #[test]
    fn test_control_tab_untouched() {
        let v = control_chars(Value::new("a\tb"));
        assert_eq!(v.as_str(), "a\tb");
    }

    #[test]
    fn test_control_idempotent() {
        let once = control_chars(Value::new("a\u{2}b"));
        let twice = control_chars(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_bom_stripped_and_flagged() {
        let v = control_chars(Value::new("abc\u{FEFF}def"));
        assert_eq!(v.as_str(), "abcdef\n%00");
    }

    #[test]
    fn test_rtl_override_stripped_and_flagged() {
        // U+202E RIGHT-TO-LEFT OVERRIDE
        let v = control_chars(Value::new("x\u{202E}y"));
        assert!(v.as_str().ends_with(NULL_SENTINEL));
        assert!(!v.as_str().contains('\u{202E}'));
    }

    #[test]
    fn test_entity_bidi_stripped_and_flagged() {
        let v = control_chars(Value::new("pay&#65123;load"));
        assert!(!v.as_str().contains("&#65123"));
        assert!(v.as_str().contains(NULL_SENTINEL));
    }

    #[test]
    fn test_out_of_range_replaced_bytewise() {
        // e-acute is two bytes in UTF-8; both are >= 127
        let v = out_of_range(Value::new("caf\u{E9}"));
        assert_eq!(v.as_str(), "cafUU");
    }

    #[test]
    fn test_out_of_range_ascii_untouched() {
        let v = out_of_range(Value::new("plain ascii"));
        assert_eq!(v.as_str(), "plain ascii");
    }

    #[test]
    fn test_out_of_range_idempotent() {
        let once = out_of_range(Value::new("a\u{FF}b"));
        let twice = out_of_range(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_url_encode_decode_roundtrip() {
        let original = "a b<c>&#x3C;";
        assert_eq!(url_decode(&url_encode(original)), original);
    }

    #[test]
    fn test_url_decode_malformed_percent() {
        assert_eq!(url_decode("100%zz"), "100%zz");
        assert_eq!(url_decode("%"), "%");
    }
}
