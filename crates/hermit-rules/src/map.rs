//! Resolved rules mapping and assignment operators.

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// Make-style assignment operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AssignOp {
    /// `=`
    #[serde(rename = "=")]
    Recursive,
    /// `:=`
    #[serde(rename = ":=")]
    Simple,
    /// `+=`
    #[serde(rename = "+=")]
    Append,
    /// `?=`
    #[serde(rename = "?=")]
    Conditional,
}

impl AssignOp {
    /// Parse an operator token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "=" => Some(AssignOp::Recursive),
            ":=" => Some(AssignOp::Simple),
            "+=" => Some(AssignOp::Append),
            "?=" => Some(AssignOp::Conditional),
            _ => None,
        }
    }

    /// The operator as written in a makefile.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignOp::Recursive => "=",
            AssignOp::Simple => ":=",
            AssignOp::Append => "+=",
            AssignOp::Conditional => "?=",
        }
    }
}

impl fmt::Display for AssignOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Merged result of a rules cascade.
///
/// Keys keep the order in which they were first assigned. Entries are only
/// ever replaced or appended to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RulesMap {
    entries: IndexMap<String, String>,
}

impl RulesMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one assignment with make semantics.
    ///
    /// - `=` and `:=` replace the value.
    /// - `+=` appends with a single space, or sets when there is no value yet.
    /// - `?=` sets only when the key has no value anywhere in the cascade so far.
    pub fn apply(&mut self, key: &str, op: AssignOp, value: &str) {
        match op {
            AssignOp::Recursive | AssignOp::Simple => {
                self.entries.insert(key.to_string(), value.to_string());
            }
            AssignOp::Append => match self.entries.get_mut(key) {
                Some(prior) if !prior.is_empty() => {
                    prior.push(' ');
                    prior.push_str(value);
                }
                _ => {
                    self.entries.insert(key.to_string(), value.to_string());
                }
            },
            AssignOp::Conditional => {
                let has_value = self.entries.get(key).is_some_and(|v| !v.is_empty());
                if !has_value {
                    self.entries.insert(key.to_string(), value.to_string());
                }
            }
        }
    }

    /// Look up a resolved value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Whitespace-separated words of a value; empty when the key is unset.
    pub fn words(&self, key: &str) -> Vec<&str> {
        self.get(key)
            .map(|v| v.split_whitespace().collect())
            .unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in first-assignment order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RulesMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
