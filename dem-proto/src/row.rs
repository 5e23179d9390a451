use std::collections::HashMap;

/// A single value out of the decoder's dynamically-shaped per-tick records.
/// The decoder reports whatever type the underlying game's net field has;
/// callers probe an alias list and coerce, they never assume a fixed schema.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Vec3([f64; 3]),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            FieldValue::Str(s) => s.parse().ok(),
            FieldValue::Vec3(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(v) => Some(*v),
            FieldValue::Float(v) => Some(*v as i64),
            FieldValue::Bool(v) => Some(if *v { 1 } else { 0 }),
            FieldValue::Str(s) => s.parse().ok(),
            FieldValue::Vec3(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            FieldValue::Int(v) => Some(*v != 0),
            FieldValue::Float(v) => Some(*v != 0.0),
            FieldValue::Str(s) => match s.as_str() {
                "1" | "true" | "True" => Some(true),
                "0" | "false" | "False" => Some(false),
                _ => None,
            },
            FieldValue::Vec3(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<[f64; 3]> {
        match self {
            FieldValue::Vec3(v) => Some(*v),
            _ => None,
        }
    }
}

/// One row keyed by field name, as produced by `parse_ticks` or
/// `parse_player_info`/`parse_events`. The decoder may hand back the same
/// concept under several aliases (`steamid`, `steamid64`, `player`, ...);
/// this type makes no attempt to normalize those, that's the consumer's job.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    pub tick: Option<i64>,
    pub fields: HashMap<String, FieldValue>,
}

impl Row {
    pub fn new(tick: Option<i64>) -> Self {
        Self {
            tick,
            fields: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    /// Probe an ordered alias list, returning the first present value.
    pub fn get_any(&self, keys: &[&str]) -> Option<&FieldValue> {
        keys.iter().find_map(|key| self.fields.get(*key))
    }
}

pub type PlayerTickRow = Row;
pub type PlayerInfoRow = Row;
pub type EventRow = Row;

/// Result of a batch `parse_events` call: one frame of rows per resolved
/// event name. The decoder may instead hand back a list-of-pairs or a
/// single frame when only one name was requested; `DemoDecoder` impls are
/// expected to normalize to this shape before returning.
pub type EventBatch = HashMap<String, Vec<EventRow>>;
