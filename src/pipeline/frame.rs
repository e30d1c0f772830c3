//! Frames: the unit of data flow between modules.
//!
//! A `Frame` is an insertion-ordered list of named, tagged fields. Binary
//! payloads are held as `Arc<[u8]>` so that fan-out clones share the blob
//! instead of copying it.
//!
//! Field access is typed: `get_str`, `get_f64` and friends return
//! [`PipelineError::TypeMismatch`] when the stored tag differs from the
//! requested one, and [`PipelineError::MissingField`] when the field is absent.

use crate::pipeline::error::{PipelineError, PipelineResult};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::sync::Arc;

/// Type tag of a field value. The numeric tags are part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Bool,
    Int,
    UInt,
    Float,
    Str,
    Bytes,
    Frame,
    List,
}

impl FieldType {
    pub fn name(self) -> &'static str {
        match self {
            FieldType::Bool => "bool",
            FieldType::Int => "int",
            FieldType::UInt => "uint",
            FieldType::Float => "float",
            FieldType::Str => "str",
            FieldType::Bytes => "bytes",
            FieldType::Frame => "frame",
            FieldType::List => "list",
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            FieldType::Bool => 0,
            FieldType::Int => 1,
            FieldType::UInt => 2,
            FieldType::Float => 3,
            FieldType::Str => 4,
            FieldType::Bytes => 5,
            FieldType::Frame => 6,
            FieldType::List => 7,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => FieldType::Bool,
            1 => FieldType::Int,
            2 => FieldType::UInt,
            3 => FieldType::Float,
            4 => FieldType::Str,
            5 => FieldType::Bytes,
            6 => FieldType::Frame,
            7 => FieldType::List,
            _ => return None,
        })
    }
}

/// A tagged field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Arc<[u8]>),
    Frame(Box<Frame>),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Bool(_) => FieldType::Bool,
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::UInt(_) => FieldType::UInt,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Str(_) => FieldType::Str,
            FieldValue::Bytes(_) => FieldType::Bytes,
            FieldValue::Frame(_) => FieldType::Frame,
            FieldValue::List(_) => FieldType::List,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::UInt(u) => Some(*u),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_frame(&self) -> Option<&Frame> {
        match self {
            FieldValue::Frame(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(l) => Some(l),
            _ => None,
        }
    }

    /// Copy of this value with every binary blob removed, recursively.
    /// Returns `None` when the value itself is a blob.
    pub fn without_blobs(&self) -> Option<FieldValue> {
        match self {
            FieldValue::Bytes(_) => None,
            FieldValue::Frame(f) => Some(FieldValue::Frame(Box::new(f.without_blobs()))),
            FieldValue::List(items) => Some(FieldValue::List(
                items.iter().filter_map(FieldValue::without_blobs).collect(),
            )),
            other => Some(other.clone()),
        }
    }

    /// Human-readable rendering used by text sinks.
    pub fn display_value(&self) -> String {
        match self {
            FieldValue::Bool(b) => b.to_string(),
            FieldValue::Int(i) => i.to_string(),
            FieldValue::UInt(u) => u.to_string(),
            FieldValue::Float(f) => f.to_string(),
            FieldValue::Str(s) => s.clone(),
            FieldValue::Bytes(b) => format!("<{} bytes>", b.len()),
            FieldValue::Frame(f) => format!("<frame {} fields>", f.len()),
            FieldValue::List(items) => {
                let parts: Vec<String> = items.iter().map(FieldValue::display_value).collect();
                format!("[{}]", parts.join(" "))
            }
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::UInt(v as u64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Float(v as f64)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(Arc::from(v))
    }
}

impl From<Arc<[u8]>> for FieldValue {
    fn from(v: Arc<[u8]>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<Frame> for FieldValue {
    fn from(v: Frame) -> Self {
        FieldValue::Frame(Box::new(v))
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(v: Vec<FieldValue>) -> Self {
        FieldValue::List(v)
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Int(i) => serializer.serialize_i64(*i),
            FieldValue::UInt(u) => serializer.serialize_u64(*u),
            FieldValue::Float(f) => serializer.serialize_f64(*f),
            FieldValue::Str(s) => serializer.serialize_str(s),
            FieldValue::Bytes(b) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("bytes", &b.len())?;
                map.end()
            }
            FieldValue::Frame(f) => f.serialize(serializer),
            FieldValue::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

/// Ordered collection of named fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    fields: Vec<(String, FieldValue)>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or replace a field. A replaced field keeps its original position.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        let idx = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.get(name).map(FieldValue::field_type)
    }

    fn typed<'a, T>(
        &'a self,
        name: &str,
        expected: FieldType,
        extract: impl FnOnce(&'a FieldValue) -> Option<T>,
    ) -> PipelineResult<T> {
        let value = self
            .get(name)
            .ok_or_else(|| PipelineError::MissingField(name.to_string()))?;
        extract(value).ok_or_else(|| PipelineError::TypeMismatch {
            field: name.to_string(),
            expected: expected.name(),
            found: value.field_type().name(),
        })
    }

    pub fn get_bool(&self, name: &str) -> PipelineResult<bool> {
        self.typed(name, FieldType::Bool, FieldValue::as_bool)
    }

    pub fn get_i64(&self, name: &str) -> PipelineResult<i64> {
        self.typed(name, FieldType::Int, FieldValue::as_i64)
    }

    pub fn get_u64(&self, name: &str) -> PipelineResult<u64> {
        self.typed(name, FieldType::UInt, FieldValue::as_u64)
    }

    pub fn get_f64(&self, name: &str) -> PipelineResult<f64> {
        self.typed(name, FieldType::Float, FieldValue::as_f64)
    }

    pub fn get_str(&self, name: &str) -> PipelineResult<&str> {
        self.typed(name, FieldType::Str, FieldValue::as_str)
    }

    pub fn get_bytes(&self, name: &str) -> PipelineResult<&[u8]> {
        self.typed(name, FieldType::Bytes, FieldValue::as_bytes)
    }

    pub fn get_frame(&self, name: &str) -> PipelineResult<&Frame> {
        self.typed(name, FieldType::Frame, FieldValue::as_frame)
    }

    pub fn get_list(&self, name: &str) -> PipelineResult<&[FieldValue]> {
        self.typed(name, FieldType::List, FieldValue::as_list)
    }

    /// Copy of this frame with binary blobs removed at every nesting level.
    pub fn without_blobs(&self) -> Frame {
        self.fields
            .iter()
            .filter_map(|(n, v)| v.without_blobs().map(|v| (n.clone(), v)))
            .collect()
    }

    /// Total size of binary payloads carried by this frame, recursively.
    pub fn blob_bytes(&self) -> usize {
        fn value_bytes(value: &FieldValue) -> usize {
            match value {
                FieldValue::Bytes(b) => b.len(),
                FieldValue::Frame(f) => f.blob_bytes(),
                FieldValue::List(items) => items.iter().map(value_bytes).sum(),
                _ => 0,
            }
        }
        self.fields.iter().map(|(_, v)| value_bytes(v)).sum()
    }
}

impl FromIterator<(String, FieldValue)> for Frame {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        let mut frame = Frame::new();
        for (name, value) in iter {
            frame.set(name, value);
        }
        frame
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
