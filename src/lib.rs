//! decloak — evasion-normalization engine.
//!
//! Canonicalizes untrusted request parameter values so a downstream
//! signature matcher sees through the encodings attackers layer over
//! their payloads: JS `\uXXXX` escapes, `fromCharCode` number runs,
//! UTF-7 shift sequences, HTML entities, comment splitting, quote
//! variants, SQL keyword games, string concatenation, BOM/bidi
//! smuggling, and symbol-soup obfuscation.
//!
//! The whole engine is total: [`canonicalize`] accepts any string and
//! always returns one, growing the buffer with decoded candidates
//! separated by newline markers. Hostile garbage in a parameter is the
//! normal case here, never an error.
//!
//! ```
//! use decloak::canonicalize;
//!
//! let out = canonicalize("65,108,101,114,116");
//! assert!(out.contains("Alert"));
//! ```

pub mod centrifuge;
pub mod config;
pub mod control;
pub mod decode;
pub mod pipeline;
pub mod strip;
pub mod value;


pub use config::PipelineConfig;
pub use pipeline::{canonicalize, Pipeline, StageId, StageMode, DEFAULT_STAGES};
pub use value::Value;
