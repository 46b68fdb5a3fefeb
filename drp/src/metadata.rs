//! Per-image metadata records.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Keys that must be present on every record after the load stage.
pub const CORE_FIELDS: [&str; 3] = [OBSCLASS_KEY, TARGET_KEY, UTCTIME_KEY];

pub const OBSCLASS_KEY: &str = "OBSCLASS";
pub const TARGET_KEY: &str = "TARGET";
pub const UTCTIME_KEY: &str = "UTCTIME";

/// Cumulative, comma-terminated list of applied correction steps.
pub const CALSTEPS_KEY: &str = "CALSTEPS";
pub const BASENAME_KEY: &str = "BASENAME";
pub const RAW_IMAGE_PATH_KEY: &str = "RAWIMAGEPATH";
pub const OBSTYPE_KEY: &str = "OBSTYPE";
pub const FILTER_KEY: &str = "FILTER";
pub const EXPTIME_KEY: &str = "EXPTIME";

/// Scalar metadata value.
///
/// Floats compare and hash by bit pattern so values can be used as group keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(left), Value::Int(right)) => left == right,
            (Value::Float(left), Value::Float(right)) => left.to_bits() == right.to_bits(),
            (Value::Str(left), Value::Str(right)) => left == right,
            (Value::Bool(left), Value::Bool(right)) => left == right,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Int(value) => value.hash(state),
            Value::Float(value) => value.to_bits().hash(state),
            Value::Str(value) => value.hash(state),
            Value::Bool(value) => value.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{}", value),
            Value::Float(value) => write!(f, "{}", value),
            Value::Str(value) => write!(f, "{}", value),
            Value::Bool(value) => write!(f, "{}", value),
        }
    }
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Converts a scalar YAML node; mappings, sequences and nulls yield `None`.
    pub fn from_yaml(value: &serde_yml::Value) -> Option<Value> {
        match value {
            serde_yml::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_yml::Value::Number(n) => n
                .as_i64()
                .map(Value::Int)
                .or_else(|| n.as_f64().map(Value::Float)),
            serde_yml::Value::String(s) => Some(Value::Str(s.clone())),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

/// Ordered key/value record describing one image.
///
/// Storage is shared between clones and copied on the first mutation, so a
/// processor never observes changes made to a record another holder kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    fields: Arc<BTreeMap<String, Value>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        Arc::make_mut(&mut self.fields).insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    /// Removes a key. Core fields are never removed.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if CORE_FIELDS.contains(&key) || !self.contains(key) {
            return None;
        }
        Arc::make_mut(&mut self.fields).remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Appends `"<step>,"` to the cumulative `CALSTEPS` field.
    pub fn append_step(&mut self, step: &str) {
        let mut steps = self.get_str(CALSTEPS_KEY).unwrap_or_default().to_string();
        steps.push_str(step);
        steps.push(',');
        self.set(CALSTEPS_KEY, steps);
    }

    pub fn steps(&self) -> Vec<&str> {
        self.get_str(CALSTEPS_KEY)
            .map(|s| s.split(',').filter(|step| !step.is_empty()).collect())
            .unwrap_or_default()
    }

    /// Fails with `MissingField` for the first absent core field.
    pub fn validate_core_fields(&self) -> Result<()> {
        for key in CORE_FIELDS {
            if !self.contains(key) {
                return Err(Error::MissingField {
                    field: key.to_string(),
                    available: self.keys().map(str::to_string).collect(),
                });
            }
        }
        Ok(())
    }

    /// Value of `key` rendered as text, or `None` if absent.
    pub fn render(&self, key: &str) -> Option<String> {
        self.get(key).map(Value::to_string)
    }

    /// Value of `key`, or `MissingField` if absent.
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.get(key).ok_or_else(|| Error::MissingField {
            field: key.to_string(),
            available: self.keys().map(str::to_string).collect(),
        })
    }
}

impl From<BTreeMap<String, Value>> for Metadata {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self {
            fields: Arc::new(fields),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let fields: BTreeMap<String, Value> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        fields.into()
    }
}

impl Serialize for Metadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.fields.as_ref().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Metadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        BTreeMap::<String, Value>::deserialize(deserializer).map(Metadata::from)
    }
}
