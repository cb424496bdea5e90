//! Structural-stripping stage family — removes or neutralizes syntactic
//! noise attackers use to break pattern matches: comments, quote variants,
//! SQL keyword obfuscation, string-concatenation idioms, and markup tags.

use crate::value::Value;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

fn re(cell: &'static OnceLock<Regex>, pattern: &'static str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static stage regex must compile"))
}

// ─── Comment stripping ──────────────────────────────────────────────────────

static COMMENT_PRESENT_RE: OnceLock<Regex> = OnceLock::new();
static HTML_COMMENT_RE: OnceLock<Regex> = OnceLock::new();
static C_COMMENT_RE: OnceLock<Regex> = OnceLock::new();
static SQL_COMMENT_RE: OnceLock<Regex> = OnceLock::new();

/// Strip HTML, C-style, and SQL inline comments and append the stripped
/// variant. Comments are the classic mid-token injection trick
/// (`ale/**/rt`), so the variant must expose the contiguous token stream.
pub fn comments(mut value: Value) -> Value {
    let present = re(
        &COMMENT_PRESENT_RE,
        r"(?ms)(?:<!-|-->|/\*|\*/|//\W*\w+\s*$)|(?:--[^-]*-)",
    );
    if !present.is_match(value.as_str()) {
        return value;
    }

    let stripped = re(
        &HTML_COMMENT_RE,
        r"(?ms)(?:<!)(?:(?:--(?:[^-]*(?:-[^-]+)*)--\s*)*)(?:>)",
    )
    .replace_all(value.as_str(), "");
    let stripped = re(&C_COMMENT_RE, r"(?ms)(?:/\*/*[^/*]*)+\*/").replace_all(&stripped, "");
    let stripped = re(&SQL_COMMENT_RE, r"(?ms)--[^-]*-")
        .replace_all(&stripped, "")
        .into_owned();

    debug!(stage = "comments", "comment markers stripped");
    value.append(&stripped);
    value
}

// ─── Quote normalization ────────────────────────────────────────────────────

/// Map every quote-like character (straight, back-tick, acute, curly, and
/// the entity spellings) to the canonical `"`, in place.
pub fn quotes(mut value: Value) -> Value {
    let replaced = value
        .as_str()
        .replace('\'', "\"")
        .replace('`', "\"")
        .replace('\u{00B4}', "\"")
        .replace('\u{2019}', "\"")
        .replace('\u{2018}', "\"")
        .replace("&quot", "\"")
        .replace("&apos", "\"");
    value.replace_with(replaced);
    value
}

// ─── SQL keyword folding ────────────────────────────────────────────────────

static SQL_NULL_RE: OnceLock<Regex> = OnceLock::new();
static SQL_LITERAL_RE: OnceLock<Regex> = OnceLock::new();
static SQL_OPERATOR_RE: OnceLock<Regex> = OnceLock::new();

/// Fold SQL obfuscation idioms to a tiny canonical vocabulary, in place,
/// in three ordered passes: null/membership idioms to `=0`, literal and
/// function noise to `0`, negation/comparison idioms to `=`.
pub fn sql_keywords(mut value: Value) -> Value {
    let folded = re(
        &SQL_NULL_RE,
        r"(?i)(?:IS\s+null)|(?:LIKE\s+null)|(?:IN[+\s]*\([^)]+\))",
    )
    .replace_all(value.as_str(), "=0");

    let folded = re(
        &SQL_LITERAL_RE,
        r"(?i)\Wnull|\\N|@[\w+-]+|TRUE|FALSE|UTC_TIME|LOCALTIME(?:STAMP)?|CURRENT_\w+|BINARY|(?:(?:ASCII|SOUNDEX|REGEXP|MD5|LIKE)[+\s]*\([^)]+\))",
    )
    .replace_all(&folded, "0");

    let folded = re(
        &SQL_OPERATOR_RE,
        r"(?i)(?:NOT\s+BETWEEN)|(?:IS\s+NOT)|(?:NOT\s+IN)|(?:XOR|DIV|NOT\W|<>|RLIKE(?:\s+BINARY)?)|(?:REGEXP(?:\s+BINARY)?)|(?:SOUNDS\s+LIKE)",
    )
    .replace_all(&folded, "=");

    value.replace_with(folded.into_owned());
    value
}

// ─── Concatenation stripping ────────────────────────────────────────────────

/// Fixed list of string-concatenation idioms typical of script-injection
/// payloads; assumes quote normalization already mapped everything to `"`.
const CONCAT_PATTERNS: &[&str] = &[
    r"(?s)</\w+>\+<\w+>",
    r#"(?s)":\d+[^"\[]+""#,
    r#"(?s)"?"\+\w+\+""#,
    r#"(?s)(?:"\s*;[^"]+")|(?:";[^"]+:\s*")"#,
    r#"(?s)"\s*(?:;|\+).{8,18}:\s*""#,
    r#"(?s)(?:";\w+=)|(?:!""&&")|(?:~)"#,
    r#"(?s)(?:"?"\+""?\+?"?)|(?:;\w+=")|(?:"[|&]{2,})"#,
    r#"(?s)"\s*\W+\s*\n*""#,
    r#"(?s)";\w\s*=\s*\w?\s*\n*""#,
    r#"(?s)"[|&;]+\s*[^|&\n]*[|&]+\s*\n*"?"#,
    r#"(?s)";\s*\w+\W+\w*\s*[|&]*""#,
    r#"(?s)"\s*"\s*\."#,
];

static CONCAT_RES: OnceLock<Vec<Regex>> = OnceLock::new();
static BACKSLASH_WORD_RE: OnceLock<Regex> = OnceLock::new();
static OBJ_TRAVERSAL_RE: OnceLock<Regex> = OnceLock::new();

/// Strip concatenation glue so `"al"+"ert(1)"` canonicalizes toward
/// `alert(1)`; the stripped variant is appended only when stripping
/// changed anything.
pub fn concatenations(mut value: Value) -> Value {
    // Collapse unneeded backslash escapes first; the collapsed copy is a
    // candidate of its own when it differs.
    let collapse = re(&BACKSLASH_WORD_RE, r"(\w)\\");
    let collapsed = collapse.replace_all(value.as_str(), "${1}");
    if collapsed != value.as_str() {
        let collapsed = collapsed.into_owned();
        value.append(&collapsed);
    }

    let patterns = CONCAT_RES.get_or_init(|| {
        CONCAT_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("static concatenation pattern must compile"))
            .collect()
    });

    let compare = strip_slashes(value.as_str());
    let mut converted = compare.clone();
    for pattern in patterns {
        converted = pattern.replace_all(&converted, "").into_owned();
    }
    // Fold object-call chaining: `foo.bar(` loses the traversed receiver.
    converted = re(&OBJ_TRAVERSAL_RE, r"\w(\.\w\()")
        .replace_all(&converted, "${1}")
        .into_owned();

    if compare != converted {
        debug!(stage = "concatenations", "concatenation glue stripped");
        value.append(&converted);
    }
    value
}

/// PHP-style stripslashes: drop every single backslash, keep the escaped
/// character.
fn strip_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

// ─── Markup stripping ───────────────────────────────────────────────────────

static TAG_RE: OnceLock<Regex> = OnceLock::new();

/// Remove all tags and append the tag-free text when it differs. The
/// original is kept — it may itself carry a tag-based vector the matcher
/// still needs.
pub fn markup(mut value: Value) -> Value {
    let stripped = re(&TAG_RE, r"(?s)<[^>]*>").replace_all(value.as_str(), "");
    if stripped != value.as_str() {
        debug!(stage = "markup", "tags stripped");
        let stripped = stripped.into_owned();
        value.append(&stripped);
    }
    value
}
