use crate::error::LoggerError;
use serde::Deserialize;
use std::fmt;

/// A single value read from the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
}

impl TagValue {
    /// Numeric view used by threshold comparison. Text has none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            TagValue::Int(i) => Some(*i as f64),
            TagValue::Real(r) => Some(*r),
            TagValue::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            TagValue::Bool(b) => Some(i64::from(*b)),
            TagValue::Int(i) => Some(*i),
            TagValue::Real(_) | TagValue::Text(_) => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Bool(true) => f.write_str("True"),
            TagValue::Bool(false) => f.write_str("False"),
            TagValue::Int(i) => write!(f, "{}", i),
            // Keeps a fractional part on whole numbers: `1.0`, not `1`.
            TagValue::Real(r) => write!(f, "{:?}", r),
            TagValue::Text(s) => f.write_str(s),
        }
    }
}

/// How a configured tag is read and decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagKind {
    #[default]
    Scalar,
    /// Logix STRING: a `.LEN` field plus a fixed-capacity `.DATA` byte buffer.
    String,
}

/// A tag name with its decoding schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSpec {
    pub name: String,
    pub kind: TagKind,
}

impl TagSpec {
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TagKind::Scalar,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: TagKind::String,
        }
    }

    pub fn length_tag(&self) -> String {
        format!("{}.LEN", self.name)
    }

    pub fn data_tag(&self) -> String {
        format!("{}.DATA[0]", self.name)
    }
}

// Config accepts either `"Name"` or `{"name": "Name", "type": "string"}`.
impl<'de> Deserialize<'de> for TagSpec {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bare(String),
            Full {
                name: String,
                #[serde(default, rename = "type")]
                kind: TagKind,
            },
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Bare(name) => TagSpec::scalar(name),
            Repr::Full { name, kind } => TagSpec { name, kind },
        })
    }
}

/// Outcome reported by the controller for one tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStatus {
    Success,
    Failed(String),
}

impl fmt::Display for ReadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadStatus::Success => f.write_str("Success"),
            ReadStatus::Failed(reason) => f.write_str(reason),
        }
    }
}

/// Per-tag read result. Transport failures are reported as `Err` by the
/// reader instead.
#[derive(Debug, Clone, PartialEq)]
pub struct TagResponse<T> {
    pub tag: String,
    pub status: ReadStatus,
    pub value: Option<T>,
}

impl<T> TagResponse<T> {
    pub fn success(tag: impl Into<String>, value: T) -> Self {
        Self {
            tag: tag.into(),
            status: ReadStatus::Success,
            value: Some(value),
        }
    }

    pub fn failed(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            status: ReadStatus::Failed(reason.into()),
            value: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ReadStatus::Success && self.value.is_some()
    }

    /// Unwraps a successful read. Anything else becomes a `TagRead` error
    /// naming `reported_as`.
    pub fn into_value_for(self, reported_as: &str) -> Result<T, LoggerError> {
        match (self.status, self.value) {
            (ReadStatus::Success, Some(value)) => Ok(value),
            (ReadStatus::Success, None) => Err(LoggerError::tag_read(reported_as, "no value returned")),
            (ReadStatus::Failed(reason), _) => Err(LoggerError::tag_read(reported_as, reason)),
        }
    }

    pub fn into_value(self) -> Result<T, LoggerError> {
        let tag = self.tag.clone();
        self.into_value_for(&tag)
    }
}
