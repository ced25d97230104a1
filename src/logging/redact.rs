//! Deep-copy redaction of log metadata.
//!
//! [`Redactor`] masks two kinds of sensitive values before anything leaves
//! the process:
//!
//! - any string leaf that looks like an embedded binary payload
//!   (`data:<mime>;base64,...`), regardless of its key;
//! - any value addressed by a configured key. Keys are case-insensitive.
//!   A single-segment key (`password`) matches at every depth; a dotted key
//!   (`user.token`) is a path anchored at the root and descends through
//!   sequences element by element.
//!
//! Values with no key of their own, such as positional query binds, go
//! through [`Redactor::redact_fragment`], which also applies every tail of
//! each dotted path from the fragment's root.
//!
//! The input is never mutated. Redacting an already-redacted value yields
//! the same value.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// Placeholder written in place of every masked value.
pub const REDACTED: &str = "[Redacted]";

static DATA_URI: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*data:[a-z0-9.+-]+/[a-z0-9.+-]+(;[a-z0-9.+-]+=[^;,]*)*;base64,").ok()
});

/// Masks configured keys and embedded payloads in JSON-like metadata.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    /// Lower-cased single-segment keys, matched anywhere.
    keys: Vec<String>,
    /// Lower-cased dotted paths, matched from the root.
    paths: Vec<Vec<String>>,
}

impl Redactor {
    /// Builds a redactor from configured keys. Blank entries are ignored.
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut redactor = Self::default();
        for key in keys {
            let key = key.as_ref().trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            let segments: Vec<String> = key
                .split('.')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            match segments.len() {
                0 => {}
                1 => redactor.keys.extend(segments),
                _ => redactor.paths.push(segments),
            }
        }
        redactor
    }

    /// Returns a redacted deep copy of `metadata`; `None` stays `None`.
    #[must_use]
    pub fn redact(&self, metadata: Option<&Value>) -> Option<Value> {
        metadata.map(|value| self.redact_value(value))
    }

    /// Returns a redacted deep copy of `value`.
    #[must_use]
    pub fn redact_value(&self, value: &Value) -> Value {
        let mut copy = value.clone();
        self.mask_in_place(&mut copy);
        for path in &self.paths {
            mask_path(&mut copy, path);
        }
        copy
    }

    /// Redacts a value detached from its parent key.
    ///
    /// Besides the usual rules, each dotted path also matches by its tails:
    /// with `profile.ssn` configured, a bound `profile` document
    /// `{"ssn": ..}` has its `ssn` masked.
    #[must_use]
    pub fn redact_fragment(&self, value: &Value) -> Value {
        let mut copy = self.redact_value(value);
        for path in &self.paths {
            for start in 1..path.len() {
                if let Some(tail) = path.get(start..) {
                    mask_path(&mut copy, tail);
                }
            }
        }
        copy
    }

    /// Convenience for the common case of a top-level object.
    #[must_use]
    pub fn redact_map(&self, metadata: &Map<String, Value>) -> Map<String, Value> {
        match self.redact_value(&Value::Object(metadata.clone())) {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn mask_in_place(&self, value: &mut Value) {
        match value {
            Value::String(s) if is_embedded_payload(s) => {
                *value = Value::String(REDACTED.to_string());
            }
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    let key = key.to_lowercase();
                    if self.keys.iter().any(|k| *k == key) {
                        *child = Value::String(REDACTED.to_string());
                    } else {
                        self.mask_in_place(child);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.mask_in_place(item);
                }
            }
            _ => {}
        }
    }
}

/// Whether `s` is a base64 data URI.
#[must_use]
pub fn is_embedded_payload(s: &str) -> bool {
    DATA_URI.as_ref().is_some_and(|re| re.is_match(s))
}

fn mask_path(value: &mut Value, path: &[String]) {
    let Some((head, rest)) = path.split_first() else {
        return;
    };
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key.to_lowercase() != *head {
                    continue;
                }
                if rest.is_empty() {
                    *child = Value::String(REDACTED.to_string());
                } else {
                    mask_path(child, rest);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                mask_path(item, path);
            }
        }
        // Path runs into a scalar: nothing to mask.
        _ => {}
    }
}
