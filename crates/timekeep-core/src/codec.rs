//! Field-naming convention codec.
//!
//! The backend speaks `snake_case` keys on the wire while application code
//! works with `camelCase` keys. [`FieldCodec`] rewrites every object key of a
//! JSON tree between the two, leaving values, array order and scalars alone.
//!
//! Both transforms are pure functions of the key string, so new fields need
//! no configuration:
//!
//! - `camelCase -> snake_case`: every ASCII uppercase letter becomes `_` plus
//!   its lowercase form (`projectId` -> `project_id`).
//! - `snake_case -> camelCase`: every `_` directly followed by an ASCII
//!   lowercase letter is dropped and the letter uppercased
//!   (`project_id` -> `projectId`). Any other `_` is kept.
//!
//! Keys without a word boundary come back unchanged, and running either
//! transform over its own output is a no-op.
//!
//! Round-trip law: `decode(encode(v)) == v` holds when no application key
//! contains an `_` followed by a lowercase letter. Keys such as `_id` or
//! `foo_bar` on the application side fall outside that alphabet and come
//! back camel-cased. Two keys of one object that rename to the same key
//! (`fooBar` and `foo_bar`) collapse into one, and a warning is logged.

use serde_json::{Map, Value};
use tracing::warn;

/// A field-naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldConvention {
    /// `word_joined_with_underscores`
    SnakeCase,
    /// `wordWithCapitalizedContinuation`
    CamelCase,
}

impl FieldConvention {
    /// Rewrite a single key into this convention.
    pub fn apply(self, key: &str) -> String {
        match self {
            FieldConvention::SnakeCase => to_snake_case(key),
            FieldConvention::CamelCase => to_camel_case(key),
        }
    }
}

/// Bidirectional key rewriter between the wire and application conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldCodec {
    wire: FieldConvention,
    app: FieldConvention,
}

impl Default for FieldCodec {
    fn default() -> Self {
        Self {
            wire: FieldConvention::SnakeCase,
            app: FieldConvention::CamelCase,
        }
    }
}

impl FieldCodec {
    pub fn new(wire: FieldConvention, app: FieldConvention) -> Self {
        Self { wire, app }
    }

    /// Convert an outbound (application) payload into the wire convention.
    pub fn encode(&self, value: Value) -> Value {
        rewrite_keys(value, self.wire)
    }

    /// Convert an inbound (wire) payload into the application convention.
    pub fn decode(&self, value: Value) -> Value {
        rewrite_keys(value, self.app)
    }
}

/// Recursively rename object keys, preserving everything else.
pub fn rewrite_keys(value: Value, convention: FieldConvention) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            // Keys are visited in sorted order, so on a collision the key
            // that sorts last wins
            for (key, inner) in map {
                let renamed = convention.apply(&key);
                if out.insert(renamed.clone(), rewrite_keys(inner, convention)).is_some() {
                    warn!(key = %key, renamed = %renamed, "Field name collision, earlier value dropped");
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| rewrite_keys(item, convention))
                .collect(),
        ),
        scalar => scalar,
    }
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '_' {
            if let Some(next) = chars.peek().copied().filter(char::is_ascii_lowercase) {
                chars.next();
                out.push(next.to_ascii_uppercase());
                continue;
            }
        }
        out.push(c);
    }
    out
}
