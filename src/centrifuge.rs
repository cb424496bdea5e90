//! Centrifuge stage — statistical last resort for payloads that survive
//! every decoder. Two independent detectors run over long values: a
//! word-to-symbol ratio check, and a sorted symbol-signature fold that
//! exposes the `((++::`-shaped skeleton of script payloads.

use crate::value::Value;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

fn re(cell: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static stage regex must compile"))
}

/// Token appended when the symbol ratio of a long value is suspicious.
pub const RATIO_SENTINEL: &str = "\u{00A7}[!!!]";

/// Values at or below this byte length are left alone; the statistics are
/// meaningless on short strings.
const MIN_LEN: usize = 60;

/// Highest overall-to-symbol length ratio still considered suspicious.
const MAX_RATIO: f64 = 3.5;

static RATIO_STRIP_RE: OnceLock<Regex> = OnceLock::new();
static WORD_WS_RE: OnceLock<Regex> = OnceLock::new();
static NUM_GLUE_RE: OnceLock<Regex> = OnceLock::new();
static BRACKET_RE: OnceLock<Regex> = OnceLock::new();
static TERMINATOR_RE: OnceLock<Regex> = OnceLock::new();
static NOISE_RE: OnceLock<Regex> = OnceLock::new();
static SIG_RE: OnceLock<Regex> = OnceLock::new();

/// Run both detectors over a long value. Fired detectors append their
/// marker; the value is otherwise untouched.
pub fn centrifuge(mut value: Value) -> Value {
    if value.len() <= MIN_LEN {
        return value;
    }

    // Detector 1: strip word characters, whitespace, and sentence
    // punctuation; if what remains is a large share of the value, the
    // value is mostly symbols.
    let overall = value.len() as f64;
    let symbol_len = re(&RATIO_STRIP_RE, r"[\w\s.,]+")
        .replace_all(value.as_str(), "")
        .len()
        .max(1) as f64;
    if overall / symbol_len <= MAX_RATIO {
        debug!(
            stage = "centrifuge",
            ratio = overall / symbol_len,
            "suspicious symbol ratio"
        );
        value.append(RATIO_SENTINEL);
    }

    // Detector 2: reduce the symbol alphabet of the value to a sorted
    // signature over `(`, `+`, and `:`, then match the known shape of
    // function-call payloads.
    let symbols = re(&WORD_WS_RE, r"[\w\s]+").replace_all(value.as_str(), "");
    let mut uniq: Vec<char> = symbols.chars().collect();
    uniq.sort_unstable();
    uniq.dedup();

    let glued: String = uniq
        .into_iter()
        .map(|c| match c {
            '~' | '^' | '|' | '*' | '%' | '&' | '/' => '+',
            other => other,
        })
        .collect();
    let folded = re(&NUM_GLUE_RE, r"[+\-]\s*\d+").replace_all(&glued, "+");
    let folded = re(&BRACKET_RE, r"[()\[\]{}]").replace_all(&folded, "(");
    let folded = re(&TERMINATOR_RE, r"[!?,.:=]").replace_all(&folded, ":");
    let folded = re(&NOISE_RE, r"[^:(+]+").replace_all(&folded, "");

    let mut signature: Vec<char> = folded.chars().collect();
    signature.sort_unstable();
    let signature: String = signature.into_iter().collect();

    let shape = re(
        &SIG_RE,
        r"(?:\({2,}\+{2,}:{2,})|(?:\({2,}\+{2,}:+)|(?:\({3,}\++:{2,})",
    );
    if shape.is_match(&signature) {
        debug!(stage = "centrifuge", %signature, "payload-shaped symbol signature");
        value.append(&signature);
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_value_untouched() {
        let dense = "((((++++::::";
        let v = centrifuge(Value::new(dense));
        assert_eq!(v.as_str(), dense);
    }

    #[test]
    fn test_prose_untouched() {
        let prose = "The quick brown fox jumps over the lazy dog again and again today.";
        assert!(prose.len() > 60);
        let v = centrifuge(Value::new(prose));
        assert_eq!(v.as_str(), prose);
    }

    #[test]
    fn test_symbol_heavy_value_gets_ratio_marker() {
        let input = "(((((((((a+b)*c|d))))))))=!:?".repeat(3);
        let v = centrifuge(Value::new(&input));
        assert!(v.as_str().contains(RATIO_SENTINEL));
    }

    #[test]
    fn test_payload_shape_appends_signature() {
        let input = "(((((((((a+b)*c|d))))))))=!:?".repeat(3);
        let v = centrifuge(Value::new(&input));
        let last = v.as_str().rsplit('\n').next().unwrap();
        assert!(last.starts_with("(("));
        assert!(last.contains("++"));
        assert!(last.contains("::"));
    }

    #[test]
    fn test_signature_is_sorted() {
        let input = "(((((((((a+b)*c|d))))))))=!:?".repeat(3);
        let v = centrifuge(Value::new(&input));
        let last = v.as_str().rsplit('\n').next().unwrap();
        let mut sorted: Vec<char> = last.chars().collect();
        sorted.sort_unstable();
        assert_eq!(last, sorted.into_iter().collect::<String>());
    }
}
