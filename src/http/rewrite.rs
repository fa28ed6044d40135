//! Best-effort JSON payload rewriting.
//!
//! Bodies are decoded into a [`serde_json::Value`] tree, run through a list
//! of declarative [`FieldTransform`]s and re-encoded compactly. Anything that
//! does not decode to a JSON object is passed through byte-for-byte.
//!
//! Paths are dot-separated field names. A `[]` suffix descends into every
//! element of an array, so `choices[].finish_reason` addresses the
//! `finish_reason` field of each object in `choices`. A path that does not
//! resolve is a no-op.
//!
//! Re-encoding does not preserve the original key order.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::http::body::BodyBuffer;

/// What to do with a matched field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformAction {
    /// Record the match, leave the document untouched.
    #[default]
    Observe,
    /// Replace the field with `value`.
    Set,
    /// Delete the field.
    Remove,
}

/// A declarative field transform, as written in configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldTransform {
    pub path: String,

    /// Only act when the field currently equals this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Value>,

    #[serde(default)]
    pub action: TransformAction,

    /// Replacement for [`TransformAction::Set`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FieldTransform {
    /// Observe `path` when it equals `when`.
    pub fn observe(path: impl Into<String>, when: Value) -> Self {
        Self {
            path: path.into(),
            when: Some(when),
            action: TransformAction::Observe,
            value: None,
        }
    }

    /// Overwrite `path` with `value` whenever it is present.
    pub fn set(path: impl Into<String>, value: Value) -> Self {
        Self {
            path: path.into(),
            when: None,
            action: TransformAction::Set,
            value: Some(value),
        }
    }

    /// Delete `path` whenever it is present.
    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            when: None,
            action: TransformAction::Remove,
            value: None,
        }
    }

    /// Restrict the transform to fields currently equal to `when`.
    pub fn when(mut self, when: Value) -> Self {
        self.when = Some(when);
        self
    }

    fn compile(&self) -> Result<CompiledTransform, TransformError> {
        let path = FieldPath::parse(&self.path)?;
        let op = match self.action {
            TransformAction::Observe => Op::Observe,
            TransformAction::Remove => Op::Remove,
            TransformAction::Set => match &self.value {
                Some(value) => Op::Set(value.clone()),
                None => {
                    return Err(TransformError {
                        path: self.path.clone(),
                        reason: "action 'set' requires a value",
                    })
                }
            },
        };
        Ok(CompiledTransform {
            source: self.path.clone(),
            path,
            when: self.when.clone(),
            op,
        })
    }
}

/// An invalid transform definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transform '{path}': {reason}")]
pub struct TransformError {
    pub path: String,
    pub reason: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Field(String),
    Each(String),
}

/// A parsed field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, TransformError> {
        let fail = |reason| TransformError {
            path: path.to_string(),
            reason,
        };

        let mut segments = Vec::new();
        for part in path.split('.') {
            let (name, each) = match part.strip_suffix("[]") {
                Some(name) => (name, true),
                None => (part, false),
            };
            if name.is_empty() {
                return Err(fail("empty field name"));
            }
            if name.contains(&['[', ']'][..]) {
                return Err(fail("brackets are only allowed as a trailing '[]'"));
            }
            segments.push(if each {
                Segment::Each(name.to_string())
            } else {
                Segment::Field(name.to_string())
            });
        }

        match segments.last() {
            Some(Segment::Field(_)) => Ok(Self { segments }),
            _ => Err(fail("path must end in a field name")),
        }
    }
}

#[derive(Debug, Clone)]
enum Op {
    Observe,
    Set(Value),
    Remove,
}

#[derive(Debug, Clone)]
struct CompiledTransform {
    source: String,
    path: FieldPath,
    when: Option<Value>,
    op: Op,
}

impl CompiledTransform {
    fn apply(&self, root: &mut Value) {
        visit(root, &self.path.segments, &mut |object, field| {
            let Some(current) = object.get(field) else {
                return;
            };
            if self.when.as_ref().is_some_and(|expected| expected != current) {
                return;
            }
            match &self.op {
                Op::Observe => {
                    tracing::debug!(path = %self.source, value = %current, "Observed field");
                }
                Op::Set(value) => {
                    object.insert(field.to_string(), value.clone());
                }
                Op::Remove => {
                    object.remove(field);
                }
            }
        });
    }
}

fn visit(node: &mut Value, segments: &[Segment], act: &mut dyn FnMut(&mut Map<String, Value>, &str)) {
    let Some(object) = node.as_object_mut() else {
        return;
    };
    match segments {
        [Segment::Field(name)] => act(object, name),
        [Segment::Field(name), rest @ ..] => {
            if let Some(child) = object.get_mut(name) {
                visit(child, rest, act);
            }
        }
        [Segment::Each(name), rest @ ..] => {
            if let Some(Value::Array(items)) = object.get_mut(name) {
                for item in items {
                    visit(item, rest, act);
                }
            }
        }
        [] => {}
    }
}

/// Applies a fixed transform list to JSON object bodies.
#[derive(Debug, Clone, Default)]
pub struct PayloadRewriter {
    transforms: Vec<CompiledTransform>,
}

impl PayloadRewriter {
    pub fn new(transforms: &[FieldTransform]) -> Result<Self, TransformError> {
        let transforms = transforms
            .iter()
            .map(FieldTransform::compile)
            .collect::<Result<_, _>>()?;
        Ok(Self { transforms })
    }

    /// Rewrite `input` if it is a JSON object.
    ///
    /// Returns `None` when the input does not decode to an object; the caller
    /// then uses the original bytes.
    pub fn try_rewrite(&self, input: &[u8]) -> Option<Vec<u8>> {
        let mut document: Value = serde_json::from_slice(input).ok()?;
        if !document.is_object() {
            return None;
        }
        for transform in &self.transforms {
            transform.apply(&mut document);
        }
        serde_json::to_vec(&document).ok()
    }

    /// Rewrite a captured body, passing it through unchanged when it is not JSON.
    pub fn rewrite(&self, input: &BodyBuffer) -> BodyBuffer {
        match self.try_rewrite(input.as_bytes()) {
            Some(rewritten) => BodyBuffer::from(rewritten),
            None => input.clone(),
        }
    }
}
