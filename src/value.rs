//! The `Value` buffer — the single piece of data that flows through the
//! pipeline.
//!
//! A `Value` starts as the caller-supplied parameter string and grows as
//! stages append decoded candidates. Append-mode stages never overwrite the
//! existing buffer: the downstream matcher must see the original text plus
//! every decoded variant, separated by the newline marker. In-place stages
//! rebuild the buffer instead, which is only allowed where the replaced
//! content carries no attack signal of its own (raw newlines, quote variants,
//! control bytes, out-of-range bytes).

use std::fmt;

/// The evolving canonicalization of one input string.
///
/// Wraps a `String` but makes the append operation explicit so the
/// append-only invariant of decode stages is a method, not a convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value(String);

impl Value {
    /// Create a value from a caller-supplied string.
    pub fn new(input: &str) -> Self {
        Self(input.to_string())
    }

    /// View the current buffer.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Buffer length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a decoded/derived candidate after the newline marker.
    ///
    /// The candidate may be empty; the marker is still written so the
    /// matcher can tell "stage fired, decoded to nothing" apart from
    /// "stage did not fire".
    pub fn append(&mut self, candidate: &str) {
        self.0.push('\n');
        self.0.push_str(candidate);
    }

    /// Replace the whole buffer. Reserved for in-place stages.
    pub fn replace_with(&mut self, replacement: String) {
        self.0 = replacement;
    }

    /// Hand the finished buffer to the caller.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_original_as_prefix() {
        let mut v = Value::new("abc");
        v.append("decoded");
        assert_eq!(v.as_str(), "abc\ndecoded");
        assert!(v.as_str().starts_with("abc"));
    }

    #[test]
    fn test_append_empty_candidate_still_marks() {
        let mut v = Value::new("abc");
        v.append("");
        assert_eq!(v.as_str(), "abc\n");
        assert!(v.len() > 3);
    }

    #[test]
    fn test_replace_with_overwrites() {
        let mut v = Value::new("a'b");
        v.replace_with(v.as_str().replace('\'', "\""));
        assert_eq!(v.as_str(), "a\"b");
    }
}
