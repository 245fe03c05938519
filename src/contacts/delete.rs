//! Delete every contact in the CRM.

use super::dispatch::dispatch_windows;
use super::mapper::{CONTACT_DELETE, CONTACT_LIST};
use super::progress::{JobContext, scaled_percent};
use super::report::AggregateReport;
use crate::crm::{BatchClient, CallKind, ChunkResult, RemoteId};
use futures::StreamExt;
use log::{error, info, warn};
use serde_json::{Value, json};

const LISTED: u8 = 5;

pub struct ContactPurger<'a> {
    client: &'a BatchClient,
}

impl<'a> ContactPurger<'a> {
    pub fn new(client: &'a BatchClient) -> Self {
        Self { client }
    }

    /// List all contact ids and delete them chunk by chunk.
    ///
    /// If the id listing itself fails, the report has `total == 0` and one
    /// error line. Otherwise `success + failed == total` unless cancelled.
    pub async fn run(&self, context: &JobContext) -> AggregateReport {
        context.progress(0, "listing contacts");
        let ids = match self.list_ids().await {
            Ok(ids) => ids,
            Err(message) => {
                error!("delete-all: could not list contacts: {}", message);
                let mut report = AggregateReport::new(0);
                report.note_error(format!("listing contacts failed: {message}"));
                context.progress(100, "delete-all failed");
                return report;
            }
        };

        let mut report = AggregateReport::new(ids.len());
        if ids.is_empty() {
            info!("delete-all: no contacts to delete");
            context.progress(100, "nothing to delete");
            return report;
        }
        info!("delete-all: deleting {} contacts", ids.len());
        context.progress(LISTED, &format!("deleting {} contacts", ids.len()));

        let mut chunks = dispatch_windows(
            self.client,
            &ids,
            CallKind::Delete,
            CONTACT_DELETE,
            |id: &RemoteId| json!({ "id": id.as_str() }),
            context,
        );

        while let Some((window, result)) = chunks.next().await {
            match result {
                ChunkResult::Completed(outcomes) => {
                    for (call, outcome) in outcomes {
                        let id = &ids[window.global_index(call.local_index)];
                        match outcome {
                            Ok(result) if !acknowledged(&result) => report
                                .record_failure(format!("contact {id}: delete was not acknowledged")),
                            Ok(_) => report.record_success(),
                            Err(err) => report.record_failure(format!("contact {id}: {err}")),
                        }
                    }
                }
                ChunkResult::Failed(err) => {
                    error!(
                        "delete chunk {} (contacts {}-{}) failed: {}",
                        window.index,
                        window.base_offset + 1,
                        window.end(),
                        err
                    );
                    for id in window.slice(&ids) {
                        report.record_failure(format!("contact {id}: {err}"));
                    }
                }
                ChunkResult::Skipped => {
                    report.cancelled = true;
                    continue;
                }
            }

            context.progress(
                scaled_percent(window.end(), ids.len(), LISTED, 100),
                &format!("deleted {} of {} contacts", report.success, ids.len()),
            );
        }

        if report.cancelled {
            warn!(
                "delete-all cancelled after {} of {} contacts",
                report.processed(),
                report.total
            );
        }
        info!(
            "delete-all finished: {} deleted, {} failed",
            report.success, report.failed
        );
        context.progress(100, "delete-all finished");
        report
    }

    async fn list_ids(&self) -> Result<Vec<RemoteId>, String> {
        let records = self
            .client
            .list_all(CONTACT_LIST, json!({ "select": ["ID"] }))
            .await
            .map_err(|err| err.to_string())?;

        Ok(records
            .iter()
            .filter_map(|record| {
                let id = record.get("ID").and_then(RemoteId::from_value);
                if id.is_none() {
                    warn!("skipping contact record without an id: {}", record);
                }
                id
            })
            .collect())
    }
}

/// A delete answered with `false` or `null` did not remove anything.
fn acknowledged(result: &Value) -> bool {
    !matches!(result, Value::Null | Value::Bool(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockCrm;

    #[test]
    fn false_and_null_results_are_not_acknowledged() {
        assert!(acknowledged(&json!(true)));
        assert!(acknowledged(&json!({"ID": 1})));
        assert!(!acknowledged(&json!(false)));
        assert!(!acknowledged(&Value::Null));
    }

    #[tokio::test]
    async fn deletes_every_contact() {
        let crm = MockCrm::new();
        for index in 0..130 {
            crm.insert_contact(&format!("Person {index}"));
        }
        let client = crm.client();

        let report = ContactPurger::new(&client).run(&JobContext::new()).await;

        assert_eq!(report.total, 130);
        assert_eq!(report.success, 130);
        assert_eq!(report.failed, 0);
        assert!(report.is_complete());
        assert_eq!(crm.contact_count(), 0);
    }

    #[tokio::test]
    async fn failed_chunk_is_isolated() {
        let crm = MockCrm::new();
        for index in 0..120 {
            crm.insert_contact(&format!("Person {index}"));
        }
        crm.fail_batch_request(3);
        let client = crm.client();

        let report = ContactPurger::new(&client).run(&JobContext::new()).await;

        assert_eq!(report.total, 120);
        assert_eq!(report.success, 100);
        assert_eq!(report.failed, 20);
        assert_eq!(report.success + report.failed, report.total);
        assert_eq!(crm.contact_count(), 20);
    }

    #[tokio::test]
    async fn empty_crm_deletes_nothing() {
        let crm = MockCrm::new();
        let client = crm.client();

        let report = ContactPurger::new(&client).run(&JobContext::new()).await;

        assert_eq!(report, AggregateReport::new(0));
        assert_eq!(crm.batch_requests(), 0);
    }

    #[tokio::test]
    async fn listing_failure_is_reported() {
        let crm = MockCrm::new();
        crm.fail_method(CONTACT_LIST);
        let client = crm.client();

        let report = ContactPurger::new(&client).run(&JobContext::new()).await;

        assert_eq!(report.total, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("listing contacts failed"));
    }
}
