//! Wire access to the CRM REST API.
//!
//! [`CrmTransport`] is the opaque primitive the rest of the crate talks to:
//! a single method call, and a single batch request of at most
//! [`MAX_BATCH_SIZE`](super::types::MAX_BATCH_SIZE) named calls. Chunking,
//! timeouts and failure isolation live one level up in
//! [`BatchClient`](super::client::BatchClient).

use super::config::CrmConfig;
use super::error::CrmError;
use super::types::{BatchCall, CallOutcome, ListPage, RemoteErrorBody, error_text};
use async_trait::async_trait;
use log::trace;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

/// Response of a single (non-batched) method call.
#[derive(Debug, Clone, Default)]
pub struct CallResponse {
    pub result: Value,
    pub next: Option<usize>,
    pub total: Option<usize>,
}

impl CallResponse {
    /// Treat the result as one page of a list call.
    pub fn into_page(self) -> ListPage {
        let items = match self.result {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        ListPage {
            items,
            next: self.next,
            total: self.total,
        }
    }
}

#[async_trait]
pub trait CrmTransport: Send + Sync {
    /// Invoke one remote method.
    async fn call(&self, method: &str, params: &Value) -> Result<CallResponse, CrmError>;

    /// Submit one batch request. The returned map is keyed by
    /// [`CallId::wire_key`](super::types::CallId::wire_key); calls the remote
    /// did not report on are simply absent.
    async fn batch(
        &self,
        calls: &[BatchCall],
        halt_on_error: bool,
    ) -> Result<HashMap<String, CallOutcome>, CrmError>;
}

/// [`CrmTransport`] over the CRM's JSON REST endpoints.
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(config: &CrmConfig) -> Result<Self, CrmError> {
        url::Url::parse(&config.webhook_url)
            .map_err(|err| CrmError::Endpoint(format!("{}: {err}", config.webhook_url)))?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent("crm-sync/0.1")
            .build()
            .map_err(CrmError::Http)?;

        Ok(Self {
            http,
            base_url: config.webhook_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/{}.json", self.base_url, method)
    }

    async fn post(&self, method: &str, body: &Value) -> Result<Value, CrmError> {
        let response = self
            .http
            .post(self.endpoint(method))
            .json(body)
            .send()
            .await
            .map_err(CrmError::Http)?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(CrmError::Http)?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_slice::<RemoteErrorBody>(&bytes) {
                if error.error.is_some() || error.error_description.is_some() {
                    return Err(CrmError::remote(method, error.message()));
                }
            }
            let body = String::from_utf8_lossy(&bytes).into_owned();
            return Err(CrmError::status(status, body));
        }

        let value: Value = serde_json::from_slice(&bytes)?;
        if value.get("error").is_some() {
            let error: RemoteErrorBody = serde_json::from_value(value)?;
            return Err(CrmError::remote(method, error.message()));
        }

        Ok(value)
    }
}

#[async_trait]
impl CrmTransport for HttpTransport {
    async fn call(&self, method: &str, params: &Value) -> Result<CallResponse, CrmError> {
        let value = self.post(method, params).await?;
        Ok(CallResponse {
            result: value.get("result").cloned().unwrap_or(Value::Null),
            next: value.get("next").and_then(Value::as_u64).map(|n| n as usize),
            total: value.get("total").and_then(Value::as_u64).map(|n| n as usize),
        })
    }

    async fn batch(
        &self,
        calls: &[BatchCall],
        halt_on_error: bool,
    ) -> Result<HashMap<String, CallOutcome>, CrmError> {
        if calls.is_empty() {
            return Ok(HashMap::new());
        }

        let mut cmd = Map::new();
        for call in calls {
            let query = encode_query(&call.params);
            let command = if query.is_empty() {
                call.method.clone()
            } else {
                format!("{}?{}", call.method, query)
            };
            cmd.insert(call.id.wire_key(), Value::String(command));
        }

        let body = json!({
            "halt": if halt_on_error { 1 } else { 0 },
            "cmd": cmd,
        });

        trace!("crm batch: sending {} calls", calls.len());
        let value = self.post("batch", &body).await?;
        decode_batch_response(value)
    }
}

/// Both maps come back as `[]` instead of `{}` when empty.
#[derive(Debug, Deserialize, Default)]
#[serde(untagged)]
enum KeyedValues {
    Keyed(Map<String, Value>),
    Empty(Vec<Value>),
    #[default]
    Missing,
}

impl KeyedValues {
    fn into_map(self) -> Map<String, Value> {
        match self {
            KeyedValues::Keyed(map) => map,
            KeyedValues::Empty(_) | KeyedValues::Missing => Map::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BatchEnvelope {
    #[serde(default)]
    result: KeyedValues,
    #[serde(default)]
    result_error: KeyedValues,
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    result: BatchEnvelope,
}

/// Turn a `batch` response body into per-key outcomes. An error entry wins
/// over a result entry for the same key.
pub fn decode_batch_response(value: Value) -> Result<HashMap<String, CallOutcome>, CrmError> {
    let response: BatchResponse = serde_json::from_value(value)?;
    let results = response.result.result.into_map();
    let errors = response.result.result_error.into_map();

    let mut outcomes = HashMap::with_capacity(results.len() + errors.len());
    for (key, value) in results {
        outcomes.insert(key, Ok(value));
    }
    for (key, value) in errors {
        outcomes.insert(key, Err(error_text(&value)));
    }

    Ok(outcomes)
}

/// Encode nested params as a PHP-style query string
/// (`fields[PHONE][0][VALUE]=...`), the form batch commands are sent in.
pub fn encode_query(params: &Value) -> String {
    let mut pairs = Vec::new();
    flatten_params(None, params, &mut pairs);

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

fn flatten_params(prefix: Option<&str>, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let name = match prefix {
                    Some(prefix) => format!("{prefix}[{key}]"),
                    None => key.clone(),
                };
                flatten_params(Some(&name), nested, out);
            }
        }
        Value::Array(items) => {
            for (index, nested) in items.iter().enumerate() {
                let name = match prefix {
                    Some(prefix) => format!("{prefix}[{index}]"),
                    None => index.to_string(),
                };
                flatten_params(Some(&name), nested, out);
            }
        }
        scalar => {
            if let Some(prefix) = prefix {
                let text = match scalar {
                    Value::Null => String::new(),
                    Value::Bool(true) => "1".to_string(),
                    Value::Bool(false) => "0".to_string(),
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                out.push((prefix.to_string(), text));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_query_flattens_nested_fields() {
        let params = json!({
            "fields": {
                "NAME": "Ann Lee",
                "PHONE": [{"VALUE": "+100", "VALUE_TYPE": "WORK"}]
            }
        });

        assert_eq!(
            encode_query(&params),
            "fields%5BNAME%5D=Ann+Lee\
             &fields%5BPHONE%5D%5B0%5D%5BVALUE%5D=%2B100\
             &fields%5BPHONE%5D%5B0%5D%5BVALUE_TYPE%5D=WORK"
        );
    }

    #[test]
    fn encode_query_handles_scalars_and_empty() {
        assert_eq!(encode_query(&json!({"id": 15})), "id=15");
        assert_eq!(encode_query(&json!({})), "");
        assert_eq!(encode_query(&json!({"flag": true})), "flag=1");
    }

    #[test]
    fn decode_batch_response_splits_results_and_errors() {
        let body = json!({
            "result": {
                "result": {"contact_0": 101, "contact_2": 103},
                "result_error": {
                    "contact_1": {"error": "", "error_description": "Email is invalid"}
                },
                "result_total": [],
                "result_next": []
            },
            "time": {}
        });

        let outcomes = decode_batch_response(body).expect("decodes");
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes["contact_0"], Ok(json!(101)));
        assert_eq!(outcomes["contact_1"], Err("Email is invalid".to_string()));
        assert_eq!(outcomes["contact_2"], Ok(json!(103)));
    }

    #[test]
    fn decode_batch_response_accepts_empty_lists() {
        let body = json!({"result": {"result": [], "result_error": []}});
        let outcomes = decode_batch_response(body).expect("decodes");
        assert!(outcomes.is_empty());
    }

    #[test]
    fn call_response_into_page() {
        let response = CallResponse {
            result: json!([{"ID": "1"}, {"ID": "2"}]),
            next: Some(50),
            total: Some(120),
        };
        let page = response.into_page();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next, Some(50));
        assert_eq!(page.total, Some(120));
    }
}
