//! Decoding stage family — reverses reversible encodings attackers use to
//! hide payload bytes: UTF-7 ASCII substitution, HTML/XML numeric entities,
//! JS `\uXXXX` escapes, and the three charcode schemes (decimal arithmetic,
//! octal, hex) typical of `String.fromCharCode(...)` payloads.
//!
//! Decoding is lossy-safe: values outside the printable window [20,127] are
//! dropped, never mapped to garbage, and decoded text is appended as a new
//! candidate so the matcher never loses the original.

use crate::value::Value;
use aho_corasick::{AhoCorasick, MatchKind};
use regex::{Captures, Regex};
use std::sync::OnceLock;
use tracing::debug;

/// Printable accept window for charcode decoding.
const PRINTABLE_MIN: i64 = 20;
const PRINTABLE_MAX: i64 = 127;

fn re(cell: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static stage regex must compile"))
}

// ─── UTF-7 ASCII substitution ───────────────────────────────────────────────

/// Closed table of UTF-7 marker sequences for ASCII punctuation.
/// The longer `+AFwAIg` marker must stay ahead of its `+AFw` prefix so the
/// leftmost-first automaton prefers it.
const UTF7_MARKERS: &[(&str, &str)] = &[
    ("+AFwAIg", "\""),
    ("+ADw-", "<"),
    ("+AD4-", ">"),
    ("+AFs", "["),
    ("+AF0", "]"),
    ("+AHs", "{"),
    ("+AH0", "}"),
    ("+AFw", "\\"),
    ("+ADs", ";"),
    ("+ACM", "#"),
    ("+ACY", "&"),
    ("+ACU", "%"),
    ("+ACQ", "$"),
    ("+AD0", "="),
    ("+AGA", "`"),
    ("+ALQ", "\""),
    ("+IBg", "\""),
    ("+IBk", "\""),
    ("+AHw", "|"),
    ("+ACo", "*"),
    ("+AF4", "^"),
];

static UTF7_AC: OnceLock<AhoCorasick> = OnceLock::new();

/// Decode UTF-7 style ASCII-substitution markers (case-insensitive) and
/// append the substituted variant as a candidate when anything changed.
pub fn utf7(mut value: Value) -> Value {
    let ac = UTF7_AC.get_or_init(|| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostFirst)
            .build(UTF7_MARKERS.iter().map(|(marker, _)| *marker))
            .expect("UTF-7 marker table must build")
    });
    let replacements: Vec<&str> = UTF7_MARKERS.iter().map(|(_, ascii)| *ascii).collect();
    let substituted = ac.replace_all(value.as_str(), &replacements);
    if substituted != value.as_str() {
        debug!(stage = "utf7", "ASCII-substitution markers decoded");
        value.append(&substituted);
    }
    value
}

// ─── HTML/XML numeric entities ──────────────────────────────────────────────

static ENTITY_PRESENT_RE: OnceLock<Regex> = OnceLock::new();
static ENTITY_CORE_RE: OnceLock<Regex> = OnceLock::new();
static ENTITY_NUM_RE: OnceLock<Regex> = OnceLock::new();

/// Decode `&#NN;` / `&#xHH;` entities (plus the common named quote/angle
/// family) and append the decoded text with residual `;` terminators removed.
pub fn entities(mut value: Value) -> Value {
    if !re(&ENTITY_PRESENT_RE, r"&#x?\w+").is_match(value.as_str()) {
        return value;
    }

    // Normalize a 2-char core plus optional stray digit to a terminated
    // entity before decoding, e.g. `&#60` -> `&#60;`.
    let normalized = re(&ENTITY_CORE_RE, r"(&#x?\w{2}\d?);?")
        .replace_all(value.as_str(), "${1};");

    let decoded = re(
        &ENTITY_NUM_RE,
        r"&#(?:[xX]([0-9a-fA-F]+)|([0-9]+));",
    )
    .replace_all(&normalized, |caps: &Captures| {
        let code = match (caps.get(1), caps.get(2)) {
            (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
            (_, Some(dec)) => dec.as_str().parse::<u32>().ok(),
            _ => None,
        };
        match code.and_then(char::from_u32) {
            Some(c) => c.to_string(),
            // Non-decodable codepoints are left untouched, never an error.
            None => caps[0].to_string(),
        }
    })
    .replace("&quot;", "\"")
    .replace("&apos;", "'")
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&amp;", "&");

    debug!(stage = "entities", "numeric entities decoded");
    value.append(&decoded.replace(';', ""));
    value
}

// ─── JS unicode escapes ─────────────────────────────────────────────────────

static JS_UNICODE_RE: OnceLock<Regex> = OnceLock::new();

/// Sentinel appended when at least one `\uXXXX` escape was substituted,
/// consumed by downstream heuristics as "this stage fired".
pub const JS_UNICODE_SENTINEL: &str = "\\u0001";

/// Substitute `\uXXXX` escapes in place with the character at that hex
/// codepoint, then append the fired sentinel.
pub fn js_unicode(value: Value) -> Value {
    let pattern = re(&JS_UNICODE_RE, r"(?i)\\u([0-9a-f]{4})");
    if !pattern.is_match(value.as_str()) {
        return value;
    }

    let mut fired = false;
    let replaced = pattern.replace_all(value.as_str(), |caps: &Captures| {
        let code = u32::from_str_radix(&caps[1], 16).unwrap_or(0);
        match char::from_u32(code) {
            Some(c) => {
                fired = true;
                c.to_string()
            }
            // Surrogate range — keep the escape text untouched.
            None => caps[0].to_string(),
        }
    });

    let mut out = Value::from(replaced.into_owned());
    if fired {
        debug!(stage = "js_unicode", "unicode escapes substituted");
        out.append(JS_UNICODE_SENTINEL);
    }
    out
}

// ─── Charcode schemes ───────────────────────────────────────────────────────

static CHARCODE_RE: OnceLock<Regex> = OnceLock::new();
static WS_RE: OnceLock<Regex> = OnceLock::new();
static ASSIGN_RE: OnceLock<Regex> = OnceLock::new();
static NONWORD_ZERO_RE: OnceLock<Regex> = OnceLock::new();
static OPERATOR_GROUP_RE: OnceLock<Regex> = OnceLock::new();
static OPERAND_RE: OnceLock<Regex> = OnceLock::new();
static OCTAL_RE: OnceLock<Regex> = OnceLock::new();
static HEX_RE: OnceLock<Regex> = OnceLock::new();

/// Decode runs of 4+ comma-separated decimal/arithmetic charcode groups and
/// append the decoded string.
pub fn decimal_charcode(mut value: Value) -> Value {
    let matches: Vec<&str> = re(
        &CHARCODE_RE,
        r"(?:[\d+\-=/* ]+(?:\s?,\s?[\d+\-=/* ]+)+){4,}",
    )
    .find_iter(value.as_str())
    .map(|m| m.as_str())
    .collect();
    if matches.is_empty() {
        return value;
    }

    let joined = matches.join(",");
    let joined = re(&WS_RE, r"\s+").replace_all(&joined, "");
    // Variable-assignment tokens (`a=65,...`) carry no charcode signal.
    let joined = re(&ASSIGN_RE, r"\w+=").replace_all(&joined, "");

    let operator_group = re(&OPERATOR_GROUP_RE, r"\d*[+\-/* ]\d+");
    let operand = re(&OPERAND_RE, r"\W?\d+");

    let mut converted = String::new();
    for group in joined.split(',') {
        let group = re(&NONWORD_ZERO_RE, r"\W0").replace_all(group, "");
        if operator_group.is_match(&group) {
            let ops: String = operator_group
                .find_iter(&group)
                .map(|m| m.as_str())
                .collect();
            let sum: i64 = operand
                .find_iter(&ops)
                .map(|m| signed_operand(m.as_str()))
                .sum();
            push_printable(&mut converted, sum);
        } else if !group.is_empty() {
            if let Ok(n) = group.parse::<i64>() {
                push_printable(&mut converted, n);
            }
        }
    }

    debug!(stage = "decimal_charcode", decoded_len = converted.len(), "charcode run decoded");
    value.append(&converted);
    value
}

/// Decode 8+ backslash-digit repetitions as octal charcodes and append.
pub fn octal_charcode(mut value: Value) -> Value {
    let matches: Vec<&str> = re(&OCTAL_RE, r"(?:\\+\d+\s*){8,}")
        .find_iter(value.as_str())
        .map(|m| m.as_str())
        .collect();
    if matches.is_empty() {
        return value;
    }

    let joined = matches.join(",");
    let joined = re(&WS_RE, r"\s+").replace_all(&joined, "");
    let mut converted = String::new();
    for chunk in joined.split('\\') {
        if let Some(code) = parse_radix_loose(chunk, 8) {
            push_printable(&mut converted, code);
        }
    }

    debug!(stage = "octal_charcode", decoded_len = converted.len(), "octal run decoded");
    value.append(&converted);
    value
}

/// Decode 8+ backslash-word repetitions (optionally `u`/`x` prefixed) as hex
/// charcodes and append.
pub fn hex_charcode(mut value: Value) -> Value {
    let matches: Vec<&str> = re(&HEX_RE, r"(?i)(?:\\+\w+\s*){8,}")
        .find_iter(value.as_str())
        .map(|m| m.as_str())
        .collect();
    if matches.is_empty() {
        return value;
    }

    let joined = matches.join(",");
    let joined = re(&WS_RE, r"\s+").replace_all(&joined, "");
    let mut converted = String::new();
    for chunk in joined.split('\\') {
        // `u`/`x` prefixes are skipped by the loose parser along with any
        // other non-hex noise.
        if let Some(code) = parse_radix_loose(chunk, 16) {
            push_printable(&mut converted, code);
        }
    }

    debug!(stage = "hex_charcode", decoded_len = converted.len(), "hex run decoded");
    value.append(&converted);
    value
}

/// An operand token from an arithmetic charcode group: `-N` subtracts,
/// `+N` and bare digits add, any other prefix (`*`, `/`) coerces to 0.
fn signed_operand(token: &str) -> i64 {
    match token.as_bytes().first() {
        Some(b'-') => -token[1..].parse::<i64>().unwrap_or(0),
        Some(b'+') => token[1..].parse::<i64>().unwrap_or(0),
        Some(b'0'..=b'9') => token.parse::<i64>().unwrap_or(0),
        _ => 0,
    }
}

/// Parse a digit run in the given radix, silently skipping characters
/// outside the radix alphabet. Returns `None` when no valid digit was seen
/// or the value cannot be a charcode.
fn parse_radix_loose(chunk: &str, radix: u32) -> Option<i64> {
    let mut val: i64 = 0;
    let mut seen = false;
    for c in chunk.chars() {
        if let Some(d) = c.to_digit(radix) {
            seen = true;
            val = val.saturating_mul(radix as i64).saturating_add(d as i64);
        }
    }
    seen.then_some(val)
}

fn push_printable(out: &mut String, code: i64) {
    if (PRINTABLE_MIN..=PRINTABLE_MAX).contains(&code) {
        out.push(code as u8 as char);
    }
}
