use super::config::{CrmConfig, clamp_batch_size};
use super::error::CrmError;
use super::transport::{CallResponse, CrmTransport, HttpTransport};
use super::types::{BatchCall, CallId, CallOutcome, ChunkResult, MAX_BATCH_SIZE};
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How [`BatchClient::submit`] splits and guards its requests.
#[derive(Debug, Clone, Copy)]
pub struct SubmitOptions {
    /// Requested calls per request; clamped to the remote ceiling.
    pub max_batch_size: usize,
    /// Keep sending later slices after one fails.
    pub continue_on_error: bool,
    /// Deadline for each round-trip.
    pub timeout: Duration,
}

/// Batched access to the CRM on top of a [`CrmTransport`].
#[derive(Clone)]
pub struct BatchClient {
    transport: Arc<dyn CrmTransport>,
    config: CrmConfig,
}

impl BatchClient {
    pub fn new(transport: Arc<dyn CrmTransport>, config: CrmConfig) -> Self {
        Self { transport, config }
    }

    /// Client backed by the HTTP transport described by `config`.
    pub fn from_config(config: CrmConfig) -> Result<Self, CrmError> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn config(&self) -> &CrmConfig {
        &self.config
    }

    /// Options matching the configured batch size and timeout, continuing
    /// past failures.
    pub fn default_options(&self) -> SubmitOptions {
        SubmitOptions {
            max_batch_size: self.config.batch_size,
            continue_on_error: true,
            timeout: self.config.request_timeout,
        }
    }

    /// Invoke a single method, bounded by the configured timeout.
    pub async fn call(&self, method: &str, params: &Value) -> Result<CallResponse, CrmError> {
        let timeout = self.config.request_timeout;
        match tokio::time::timeout(timeout, self.transport.call(method, params)).await {
            Ok(result) => result,
            Err(_) => Err(CrmError::Timeout(timeout)),
        }
    }

    /// Fetch every record of a `*.list` method by following `next`.
    pub async fn list_all(&self, method: &str, params: Value) -> Result<Vec<Value>, CrmError> {
        let mut params = match params {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };

        let mut items = Vec::new();
        let mut start = 0usize;
        let mut pages = 0usize;

        loop {
            params.insert("start".to_string(), Value::from(start));
            let page = self
                .call(method, &Value::Object(params.clone()))
                .await?
                .into_page();
            pages += 1;
            items.extend(page.items);

            match page.next {
                Some(next) if next > start && pages < self.config.list_page_limit => start = next,
                Some(_) if pages >= self.config.list_page_limit => {
                    warn!(
                        "{}: stopped after {} pages ({} records); raise CRM_LIST_PAGE_LIMIT to fetch more",
                        method,
                        pages,
                        items.len()
                    );
                    break;
                }
                _ => break,
            }
        }

        debug!("{}: fetched {} records in {} pages", method, items.len(), pages);
        Ok(items)
    }

    /// Send one slice of calls as a single round-trip.
    ///
    /// `calls` must not exceed [`MAX_BATCH_SIZE`]. A transport failure or
    /// timeout is reported as [`ChunkResult::Failed`] rather than returned as
    /// an error, so callers can account for the slice and move on.
    pub async fn dispatch_chunk(
        &self,
        calls: &[BatchCall],
        halt_on_error: bool,
        timeout: Duration,
    ) -> ChunkResult {
        match self.try_dispatch(calls, halt_on_error, timeout).await {
            Ok(outcomes) => ChunkResult::Completed(outcomes),
            Err(err) => ChunkResult::Failed(err.to_string()),
        }
    }

    async fn try_dispatch(
        &self,
        calls: &[BatchCall],
        halt_on_error: bool,
        timeout: Duration,
    ) -> Result<Vec<(CallId, CallOutcome)>, CrmError> {
        debug_assert!(calls.len() <= MAX_BATCH_SIZE);
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let mut by_key =
            match tokio::time::timeout(timeout, self.transport.batch(calls, halt_on_error)).await
            {
                Ok(result) => result?,
                Err(_) => return Err(CrmError::Timeout(timeout)),
            };

        Ok(calls
            .iter()
            .map(|call| {
                let key = call.id.wire_key();
                let outcome = by_key
                    .remove(&key)
                    .unwrap_or_else(|| Err(CrmError::MissingOutcome(key.clone()).to_string()));
                (call.id, outcome)
            })
            .collect())
    }

    /// Submit any number of calls, split into requests of at most
    /// `options.max_batch_size` (never above [`MAX_BATCH_SIZE`]).
    ///
    /// Call ids must be unique across `calls`; a repeated id keeps only the
    /// last outcome. With `continue_on_error`, a failed request marks every
    /// call in that request with the failure text and never returns `Err`.
    pub async fn submit(
        &self,
        calls: &[BatchCall],
        options: SubmitOptions,
    ) -> Result<HashMap<CallId, CallOutcome>, CrmError> {
        let slice_size = clamp_batch_size(options.max_batch_size);
        let mut outcomes = HashMap::with_capacity(calls.len());

        for (slice_index, slice) in calls.chunks(slice_size).enumerate() {
            match self
                .try_dispatch(slice, !options.continue_on_error, options.timeout)
                .await
            {
                Ok(results) => outcomes.extend(results),
                Err(err) if options.continue_on_error => {
                    warn!(
                        "batch slice {} ({} calls) failed: {}",
                        slice_index,
                        slice.len(),
                        err
                    );
                    let message = err.to_string();
                    for call in slice {
                        outcomes.insert(call.id, Err(message.clone()));
                    }
                }
                Err(err) => return Err(err),
            }
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::types::CallKind;
    use crate::test_support::MockCrm;
    use serde_json::json;

    fn lookup_calls(count: usize) -> Vec<BatchCall> {
        (0..count)
            .map(|index| {
                BatchCall::new(
                    CallId::new(CallKind::Company, index),
                    "crm.company.list",
                    json!({"filter": {"TITLE": format!("Company {index}")}}),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn submit_clamps_requested_batch_size() {
        let crm = MockCrm::new();
        let client = crm.client();
        let calls = lookup_calls(120);

        let options = SubmitOptions {
            max_batch_size: 500,
            ..client.default_options()
        };
        let outcomes = client.submit(&calls, options).await.expect("submit");

        assert_eq!(outcomes.len(), 120);
        assert_eq!(crm.batch_requests(), 3);
        assert!(crm.largest_batch() <= MAX_BATCH_SIZE);
    }

    #[tokio::test]
    async fn failed_slice_marks_only_its_calls() {
        let crm = MockCrm::new();
        crm.fail_batch_request(2);
        let client = crm.client();
        let calls = lookup_calls(120);

        let outcomes = client
            .submit(&calls, client.default_options())
            .await
            .expect("continue_on_error never raises");

        let failed: Vec<usize> = outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_err())
            .map(|(id, _)| id.local_index)
            .collect();
        assert_eq!(failed.len(), 50);
        assert!(failed.iter().all(|index| (50..100).contains(index)));
        assert_eq!(crm.batch_requests(), 3);
    }

    #[tokio::test]
    async fn halting_submit_returns_first_failure() {
        let crm = MockCrm::new();
        crm.fail_batch_request(1);
        let client = crm.client();

        let options = SubmitOptions {
            continue_on_error: false,
            ..client.default_options()
        };
        let result = client.submit(&lookup_calls(80), options).await;

        assert!(result.is_err());
        assert_eq!(crm.batch_requests(), 1);
    }

    #[tokio::test]
    async fn list_all_follows_pagination() {
        let crm = MockCrm::new();
        for index in 0..120 {
            crm.insert_company(&format!("Company {index}"));
        }
        let client = crm.client();

        let items = client
            .list_all("crm.company.list", json!({"select": ["ID", "TITLE"]}))
            .await
            .expect("list");

        assert_eq!(items.len(), 120);
        assert_eq!(crm.method_calls("crm.company.list"), 3);
    }
}
