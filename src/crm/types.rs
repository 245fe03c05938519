use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// Hard per-request ceiling of the remote batch endpoint.
pub const MAX_BATCH_SIZE: usize = 50;

/// What a batched call does; used as the wire-key prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Contact,
    Company,
    Link,
    Delete,
}

impl CallKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallKind::Contact => "contact",
            CallKind::Company => "company",
            CallKind::Link => "link",
            CallKind::Delete => "delete",
        }
    }
}

/// Structured identifier of one call inside a batch.
///
/// `local_index` is relative to the worklist slice the caller built the calls
/// from; callers recover the global position by adding that slice's base
/// offset. The wire key (`contact_7`) is only ever produced from this value,
/// never parsed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId {
    pub kind: CallKind,
    pub local_index: usize,
}

impl CallId {
    pub fn new(kind: CallKind, local_index: usize) -> Self {
        Self { kind, local_index }
    }

    pub fn wire_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind.as_str(), self.local_index)
    }
}

/// A named remote method invocation queued for a batch request.
#[derive(Debug, Clone)]
pub struct BatchCall {
    pub id: CallId,
    pub method: String,
    pub params: Value,
}

impl BatchCall {
    pub fn new(id: CallId, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// Per-call result of a batch: the remote's result value or its error text.
pub type CallOutcome = Result<Value, String>;

/// Result of dispatching one slice of calls as a single round-trip.
#[derive(Debug)]
pub enum ChunkResult {
    /// The request went through; every submitted call has an outcome.
    Completed(Vec<(CallId, CallOutcome)>),
    /// The request itself failed; no call in the slice has an outcome.
    Failed(String),
    /// The slice was never sent because the job was cancelled.
    Skipped,
}

/// Identifier assigned by the CRM. The remote sends ids as numbers from
/// `*.add` and as strings from `*.list`, so both forms are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret a result value as an id. `0`, `false`, and empty strings are
    /// not ids.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(number) => {
                let text = number.to_string();
                if text == "0" { None } else { Some(Self(text)) }
            }
            Value::String(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() || trimmed == "0" {
                    None
                } else {
                    Some(Self(trimmed.to_string()))
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for RemoteId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RemoteId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        RemoteId::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid remote id: {value}")))
    }
}

/// One page of a `*.list` response.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub items: Vec<Value>,
    pub next: Option<usize>,
    pub total: Option<usize>,
}

/// Error object the CRM attaches to failed calls.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteErrorBody {
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl RemoteErrorBody {
    pub fn message(&self) -> String {
        if let Some(description) = self
            .error_description
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
        {
            return description.to_string();
        }
        match &self.error {
            Some(Value::String(code)) if !code.is_empty() => code.clone(),
            Some(Value::Null) | None => "Unknown error".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

/// Render any error payload found in a batch response as text.
pub fn error_text(value: &Value) -> String {
    match value {
        Value::String(text) if !text.is_empty() => text.clone(),
        Value::Object(_) => serde_json::from_value::<RemoteErrorBody>(value.clone())
            .map(|body| body.message())
            .unwrap_or_else(|_| value.to_string()),
        Value::Null => "Unknown error".to_string(),
        other => other.to_string(),
    }
}
