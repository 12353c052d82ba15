// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Structured events produced by codecs and the field references used to address them.
//!
//! An [`Event`] is a JSON object. Nested fields are addressed with the bracket
//! reference syntax: `[host][ip]` names the `ip` key inside the `host` object,
//! while a bare name such as `custom_host_field` (or `source.address`) names a
//! single top-level key verbatim.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key holding the decoded payload text for the built-in codecs.
pub const MESSAGE_FIELD: &str = "message";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("field reference is empty")]
    Empty,

    #[error("malformed field reference '{0}'")]
    Malformed(String),

    #[error("cannot set {field}: '{parent}' is not an object")]
    ParentNotObject { field: String, parent: String },
}

/// A parsed path to a (possibly nested) event field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    segments: Vec<String>,
}

impl FieldRef {
    /// Parses `name` or `[outer][inner]...` into a field reference.
    pub fn parse(reference: &str) -> Result<Self, FieldError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(FieldError::Empty);
        }

        if !reference.starts_with('[') {
            if reference.contains(['[', ']']) {
                return Err(FieldError::Malformed(reference.to_string()));
            }
            return Ok(Self {
                segments: vec![reference.to_string()],
            });
        }

        let mut segments = Vec::new();
        let mut rest = reference;
        while !rest.is_empty() {
            let inner = rest
                .strip_prefix('[')
                .ok_or_else(|| FieldError::Malformed(reference.to_string()))?;
            let end = inner
                .find(']')
                .ok_or_else(|| FieldError::Malformed(reference.to_string()))?;
            let segment = &inner[..end];
            if segment.is_empty() || segment.contains('[') {
                return Err(FieldError::Malformed(reference.to_string()));
            }
            segments.push(segment.to_string());
            rest = &inner[end + 1..];
        }

        Ok(Self { segments })
    }

    /// A reference to a single top-level key, taken verbatim.
    pub fn top_level(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl FromStr for FieldRef {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.segments.as_slice() {
            [single] => write!(f, "{}", single),
            segments => {
                for segment in segments {
                    write!(f, "[{}]", segment)?;
                }
                Ok(())
            }
        }
    }
}

/// A decoded record. Opaque to the pipeline apart from decoration and enrichment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event {
    fields: Map<String, Value>,
}

impl Event {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an event carrying `message` under [`MESSAGE_FIELD`].
    #[must_use]
    pub fn with_message(message: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert(MESSAGE_FIELD.to_string(), Value::String(message.into()));
        Self { fields }
    }

    #[must_use]
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn message(&self) -> Option<&str> {
        self.fields.get(MESSAGE_FIELD).and_then(Value::as_str)
    }

    pub fn get(&self, field: &FieldRef) -> Option<&Value> {
        let (first, rest) = field.segments.split_first()?;
        let mut current = self.fields.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// True when `field` resolves to a value other than JSON `null`.
    pub fn is_set(&self, field: &FieldRef) -> bool {
        self.get(field).is_some_and(|value| !value.is_null())
    }

    /// Sets `field` to `value`, creating intermediate objects as needed.
    ///
    /// Fails without modifying the event when a parent on the path holds a
    /// non-object value.
    pub fn set(&mut self, field: &FieldRef, value: Value) -> Result<(), FieldError> {
        let Some((last, parents)) = field.segments.split_last() else {
            return Err(FieldError::Empty);
        };

        let mut current = &mut self.fields;
        for (depth, segment) in parents.iter().enumerate() {
            let entry = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if entry.is_null() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => {
                    return Err(FieldError::ParentNotObject {
                        field: field.to_string(),
                        parent: FieldRef {
                            segments: field.segments[..=depth].to_vec(),
                        }
                        .to_string(),
                    })
                }
            };
        }

        current.insert(last.clone(), value);
        Ok(())
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_map(fields)
    }
}
