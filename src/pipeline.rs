//! Stage registry and pipeline driver.
//!
//! The registry is a fixed, explicit list — every stage has a name, a
//! mode, and a slot in the default order. Stage order is load-bearing:
//! newline folding must precede every regex stage, quote normalization
//! must precede the SQL and concatenation folds that assume `"`, and the
//! centrifuge must see the fully accumulated buffer.

use crate::{centrifuge, control, decode, strip, value::Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// How a stage treats the buffer it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMode {
    /// Original buffer survives; a decoded candidate is appended after
    /// the newline marker when the stage fires.
    Append,
    /// Buffer is rewritten; the replaced content carries no signal.
    InPlace,
}

/// Identifier of one normalization stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Newlines,
    Utf7,
    Entities,
    JsUnicode,
    DecimalCharcode,
    OctalCharcode,
    HexCharcode,
    Comments,
    Quotes,
    Concatenations,
    SqlKeywords,
    Markup,
    ControlChars,
    OutOfRange,
    Centrifuge,
}

/// The canonical stage order. Configs may reorder or drop stages, but
/// this is the order the semantics were designed around.
pub const DEFAULT_STAGES: [StageId; 15] = [
    StageId::Newlines,
    StageId::Utf7,
    StageId::Entities,
    StageId::JsUnicode,
    StageId::DecimalCharcode,
    StageId::OctalCharcode,
    StageId::HexCharcode,
    StageId::Comments,
    StageId::Quotes,
    StageId::Concatenations,
    StageId::SqlKeywords,
    StageId::Markup,
    StageId::ControlChars,
    StageId::OutOfRange,
    StageId::Centrifuge,
];

impl StageId {
    /// Stable snake_case name, as used in config files and logs.
    pub fn name(&self) -> &'static str {
        match self {
            StageId::Newlines => "newlines",
            StageId::Utf7 => "utf7",
            StageId::Entities => "entities",
            StageId::JsUnicode => "js_unicode",
            StageId::DecimalCharcode => "decimal_charcode",
            StageId::OctalCharcode => "octal_charcode",
            StageId::HexCharcode => "hex_charcode",
            StageId::Comments => "comments",
            StageId::Quotes => "quotes",
            StageId::Concatenations => "concatenations",
            StageId::SqlKeywords => "sql_keywords",
            StageId::Markup => "markup",
            StageId::ControlChars => "control_chars",
            StageId::OutOfRange => "out_of_range",
            StageId::Centrifuge => "centrifuge",
        }
    }

    pub fn mode(&self) -> StageMode {
        match self {
            StageId::Newlines
            | StageId::Quotes
            | StageId::SqlKeywords
            | StageId::ControlChars
            | StageId::OutOfRange => StageMode::InPlace,
            _ => StageMode::Append,
        }
    }

    fn run(&self, value: Value) -> Value {
        match self {
            StageId::Newlines => control::newlines(value),
            StageId::Utf7 => decode::utf7(value),
            StageId::Entities => decode::entities(value),
            StageId::JsUnicode => decode::js_unicode(value),
            StageId::DecimalCharcode => decode::decimal_charcode(value),
            StageId::OctalCharcode => decode::octal_charcode(value),
            StageId::HexCharcode => decode::hex_charcode(value),
            StageId::Comments => strip::comments(value),
            StageId::Quotes => strip::quotes(value),
            StageId::Concatenations => strip::concatenations(value),
            StageId::SqlKeywords => strip::sql_keywords(value),
            StageId::Markup => strip::markup(value),
            StageId::ControlChars => control::control_chars(value),
            StageId::OutOfRange => control::out_of_range(value),
            StageId::Centrifuge => centrifuge::centrifuge(value),
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An ordered sequence of stages. Stateless after construction; one
/// instance can serve any number of threads.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<StageId>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Pipeline with the full default stage order.
    pub fn new() -> Self {
        Self {
            stages: DEFAULT_STAGES.to_vec(),
        }
    }

    /// Pipeline with a caller-chosen stage sequence.
    pub fn with_stages(stages: Vec<StageId>) -> Self {
        Self { stages }
    }

    pub fn stages(&self) -> &[StageId] {
        &self.stages
    }

    /// Run every stage over the input. Total: never fails, never panics
    /// on any input string.
    pub fn run(&self, input: &str) -> String {
        let mut value = Value::new(input);
        for stage in &self.stages {
            let before = value.len();
            value = stage.run(value);
            if value.len() != before {
                trace!(stage = %stage, before, after = value.len(), "stage fired");
            }
        }
        debug!(
            input_len = input.len(),
            output_len = value.len(),
            "canonicalization complete"
        );
        value.into_inner()
    }
}

/// Canonicalize one parameter value with the default pipeline.
///
/// This is the whole public surface most callers need: feed it the raw
/// request parameter, hand the result to the signature matcher.
pub fn canonicalize(input: &str) -> String {
    let pipeline = Pipeline::new();
    pipeline.run(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order_is_stable() {
        let p = Pipeline::new();
        assert_eq!(p.stages().len(), 15);
        assert_eq!(p.stages()[0], StageId::Newlines);
        assert_eq!(p.stages()[14], StageId::Centrifuge);
    }

    #[test]
    fn test_stage_names_are_snake_case() {
        for stage in DEFAULT_STAGES {
            let name = stage.name();
            assert!(name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        }
    }

    #[test]
    fn test_stage_id_yaml_round_trip() {
        let yaml = serde_yaml::to_string(&StageId::JsUnicode).unwrap();
        assert!(yaml.contains("js_unicode"));
        let back: StageId = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, StageId::JsUnicode);
    }

    #[test]
    fn test_append_stages_keep_original_prefix() {
        // a firing append-mode stage grows the buffer but never rewrites
        // what came before; in-place stages rewrite instead
        let cases = [
            (StageId::Utf7, "+ADw-script+AD4-"),
            (StageId::Comments, "ale/**/rt(1)"),
            (StageId::DecimalCharcode, "65,108,101,114,116"),
            (StageId::Markup, "<b>bold</b>"),
        ];
        for (stage, input) in cases {
            assert_eq!(stage.mode(), StageMode::Append);
            let out = Pipeline::with_stages(vec![stage]).run(input);
            assert!(out.starts_with(input), "{stage} rewrote its input");
            assert!(out.len() > input.len(), "{stage} did not fire");
        }

        assert_eq!(StageId::Quotes.mode(), StageMode::InPlace);
        assert_eq!(Pipeline::with_stages(vec![StageId::Quotes]).run("a'b"), "a\"b");
    }

    #[test]
    fn test_canonicalize_empty_input() {
        assert_eq!(canonicalize(""), "");
    }

    #[test]
    fn test_canonicalize_plain_text_unchanged() {
        assert_eq!(canonicalize("hello world"), "hello world");
    }

    #[test]
    fn test_canonicalize_charcode_payload() {
        let out = canonicalize("65,108,101,114,116");
        assert!(out.starts_with("65,108,101,114,116"));
        assert!(out.contains("Alert"));
    }

    #[test]
    fn test_canonicalize_sql_evasion() {
        let out = canonicalize("1' OR 1=1 OR 'a' IS NULL");
        assert!(out.contains("=0"));
        assert!(out.contains('"'));
        assert!(!out.contains('\''));
    }

    #[test]
    fn test_subset_pipeline_runs_only_chosen_stages() {
        let p = Pipeline::with_stages(vec![StageId::Quotes]);
        assert_eq!(p.run("a'b IS NULL"), "a\"b IS NULL");
    }
}
