//! Bidirectional value/label mapping for enum-like fields.

use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors produced while building a [`Choices`] list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChoiceError {
    /// An entry was neither a bare label nor a `(value, label)` pair, or its
    /// label collides with an earlier entry.
    #[error("invalid choice at position {index}: {reason}")]
    InvalidChoice {
        /// Zero-based position of the offending entry.
        index: usize,
        /// Human-readable description of the problem.
        reason: String,
    },
}

/// A single `(value, label)` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice<V> {
    pub value: V,
    pub label: String,
}

impl From<&str> for Choice<String> {
    fn from(label: &str) -> Self {
        Self {
            value: label.to_string(),
            label: label.to_string(),
        }
    }
}

impl From<String> for Choice<String> {
    fn from(label: String) -> Self {
        Self {
            value: label.clone(),
            label,
        }
    }
}

impl<V> From<(V, &str)> for Choice<V> {
    fn from((value, label): (V, &str)) -> Self {
        Self {
            value,
            label: label.to_string(),
        }
    }
}

impl<V> From<(V, String)> for Choice<V> {
    fn from((value, label): (V, String)) -> Self {
        Self { value, label }
    }
}

/// Ordered `(value, label)` pairs with lookup by label.
///
/// Bare labels are normalised to `(label, label)`. Labels must be unique.
///
/// ```
/// use tether_types::Choices;
///
/// let status = Choices::new([("d", "draft"), ("p", "published")]).unwrap();
/// assert_eq!(status.get("published"), Some(&"p"));
/// assert_eq!(status.to_string(), "draft, published");
/// ```
#[derive(Clone)]
pub struct Choices<V = String> {
    choices: Vec<(V, String)>,
    reversed: HashMap<String, usize>,
}

impl<V> Choices<V> {
    /// Builds a choices list from bare labels or `(value, label)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`ChoiceError::InvalidChoice`] if a label appears twice.
    pub fn new<I, C>(choices: I) -> Result<Self, ChoiceError>
    where
        I: IntoIterator<Item = C>,
        C: Into<Choice<V>>,
    {
        let mut out = Self {
            choices: Vec::new(),
            reversed: HashMap::new(),
        };
        for (index, choice) in choices.into_iter().enumerate() {
            out.push(index, choice.into())?;
        }
        Ok(out)
    }

    fn push(&mut self, index: usize, choice: Choice<V>) -> Result<(), ChoiceError> {
        if self.reversed.contains_key(&choice.label) {
            return Err(ChoiceError::InvalidChoice {
                index,
                reason: format!("duplicate label '{}'", choice.label),
            });
        }
        self.reversed.insert(choice.label.clone(), self.choices.len());
        self.choices.push((choice.value, choice.label));
        Ok(())
    }

    /// Returns the value paired with `label`, if any.
    pub fn get(&self, label: &str) -> Option<&V> {
        self.reversed.get(label).map(|&i| &self.choices[i].0)
    }

    /// Returns the value paired with `label`, or `default` when the label is unknown.
    pub fn get_or<'a>(&'a self, label: &str, default: &'a V) -> &'a V {
        self.get(label).unwrap_or(default)
    }

    /// Iterates `(value, label)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&V, &str)> {
        self.choices.iter().map(|(v, l)| (v, l.as_str()))
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.choices.iter().map(|(_, l)| l.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.choices.iter().map(|(v, _)| v)
    }

    pub fn len(&self) -> usize {
        self.choices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

impl<V: PartialEq> Choices<V> {
    /// Returns the label of the first entry holding `value`.
    pub fn label_of(&self, value: &V) -> Option<&str> {
        self.choices
            .iter()
            .find(|(v, _)| v == value)
            .map(|(_, l)| l.as_str())
    }

    pub fn contains_value(&self, value: &V) -> bool {
        self.label_of(value).is_some()
    }
}

impl Choices<serde_json::Value> {
    /// Builds a choices list from a JSON array.
    ///
    /// Each entry must be a string (bare label) or a two-element array
    /// `[value, "label"]`.
    ///
    /// # Errors
    ///
    /// Returns [`ChoiceError::InvalidChoice`] for any other shape, for a
    /// non-string label, or for a duplicate label.
    pub fn from_json(input: &serde_json::Value) -> Result<Self, ChoiceError> {
        use serde_json::Value;

        let entries = input.as_array().ok_or_else(|| ChoiceError::InvalidChoice {
            index: 0,
            reason: "expected an array of choices".to_string(),
        })?;

        let mut out = Self {
            choices: Vec::with_capacity(entries.len()),
            reversed: HashMap::with_capacity(entries.len()),
        };

        for (index, entry) in entries.iter().enumerate() {
            let choice = match entry {
                Value::String(label) => Choice {
                    value: Value::String(label.clone()),
                    label: label.clone(),
                },
                Value::Array(pair) if pair.len() == 2 => match &pair[1] {
                    Value::String(label) => Choice {
                        value: pair[0].clone(),
                        label: label.clone(),
                    },
                    other => {
                        return Err(ChoiceError::InvalidChoice {
                            index,
                            reason: format!("label must be a string, got {other}"),
                        })
                    }
                },
                other => {
                    return Err(ChoiceError::InvalidChoice {
                        index,
                        reason: format!("expected a label or [value, label] pair, got {other}"),
                    })
                }
            };
            out.push(index, choice)?;
        }

        Ok(out)
    }
}

impl<V> fmt::Display for Choices<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, label) in self.labels().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(label)?;
        }
        Ok(())
    }
}

impl<V> fmt::Debug for Choices<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Choices: {self}>")
    }
}

impl<V: PartialEq> PartialEq for Choices<V> {
    fn eq(&self, other: &Self) -> bool {
        self.choices == other.choices
    }
}

impl<'a, V> IntoIterator for &'a Choices<V> {
    type Item = (&'a V, &'a str);
    type IntoIter = std::iter::Map<
        std::slice::Iter<'a, (V, String)>,
        fn(&'a (V, String)) -> (&'a V, &'a str),
    >;

    fn into_iter(self) -> Self::IntoIter {
        fn split<V>(pair: &(V, String)) -> (&V, &str) {
            (&pair.0, pair.1.as_str())
        }
        self.choices.iter().map(split as fn(&'a (V, String)) -> (&'a V, &'a str))
    }
}

impl<V: Serialize> Serialize for Choices<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.choices.iter().map(|(v, l)| (v, l)))
    }
}
