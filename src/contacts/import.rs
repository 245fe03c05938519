//! Bulk contact creation followed by company linking.
//!
//! A run moves through fixed phases: prepare the worklist, create contacts
//! chunk by chunk, resolve the distinct company names once, then link every
//! created contact whose company was found. Linking never changes the
//! success/failed counts; its failures only add error lines.

use super::dispatch::dispatch_windows;
use super::mapper::{CONTACT_ADD, CONTACT_COMPANY_ADD, ContactFields, link_params};
use super::progress::{JobContext, scaled_percent};
use super::report::AggregateReport;
use super::resolver::{CompanyIndex, CompanyResolver, distinct_names};
use super::row::Row;
use crate::crm::{BatchClient, CallKind, ChunkResult, RemoteId};
use futures::StreamExt;
use log::{debug, error, info, warn};

const CREATE_CEILING: u8 = 50;
const RESOLVE_DONE: u8 = 55;
const LINK_CEILING: u8 = 99;

/// A contact the CRM accepted, tied back to the row it came from.
#[derive(Debug, Clone)]
struct CreatedContact<'r> {
    remote_id: RemoteId,
    row: &'r Row,
}

struct PendingLink<'r> {
    contact: &'r RemoteId,
    company: &'r RemoteId,
}

pub struct ContactImporter<'a> {
    client: &'a BatchClient,
}

impl<'a> ContactImporter<'a> {
    pub fn new(client: &'a BatchClient) -> Self {
        Self { client }
    }

    /// Create one contact per row and link each to its company.
    ///
    /// Never fails as a whole: every row ends up counted as a success or a
    /// failure unless the run is cancelled, in which case rows in chunks that
    /// had not started are left out of both counts.
    pub async fn run(&self, rows: &[Row], context: &JobContext) -> AggregateReport {
        let mut report = AggregateReport::new(rows.len());
        if rows.is_empty() {
            context.progress(100, "nothing to import");
            return report;
        }

        let fields: Vec<ContactFields> = rows.iter().map(ContactFields::from_row).collect();
        let company_names = distinct_names(rows.iter().filter_map(Row::company));
        info!(
            "import: {} rows, {} distinct companies, batch size {}",
            rows.len(),
            company_names.len(),
            self.client.config().batch_size
        );
        context.progress(0, "creating contacts");

        let created = self.create_contacts(rows, &fields, context, &mut report).await;

        if report.cancelled {
            warn!(
                "import cancelled after {} of {} rows; skipping company linking",
                report.processed(),
                report.total
            );
        } else if company_names.is_empty() || created.is_empty() {
            debug!("import: no company links to make");
        } else {
            let index = CompanyResolver::new(self.client)
                .resolve(company_names.iter().map(String::as_str))
                .await;
            context.progress(
                RESOLVE_DONE,
                &format!("resolved {} of {} companies", index.len(), company_names.len()),
            );
            self.link_companies(&created, &index, context, &mut report)
                .await;
        }

        info!(
            "import finished: {} created, {} failed, {} error lines",
            report.success,
            report.failed,
            report.errors.len()
        );
        context.progress(100, "import finished");
        report
    }

    async fn create_contacts<'r>(
        &self,
        rows: &'r [Row],
        fields: &[ContactFields],
        context: &JobContext,
        report: &mut AggregateReport,
    ) -> Vec<CreatedContact<'r>> {
        let mut created = Vec::with_capacity(rows.len());
        let mut chunks = dispatch_windows(
            self.client,
            fields,
            CallKind::Contact,
            CONTACT_ADD,
            ContactFields::to_add_params,
            context,
        );

        while let Some((window, result)) = chunks.next().await {
            match result {
                ChunkResult::Completed(outcomes) => {
                    for (id, outcome) in outcomes {
                        let global = window.global_index(id.local_index);
                        let created_id = outcome.and_then(|value| {
                            RemoteId::from_value(&value)
                                .ok_or_else(|| format!("unexpected add result {value}"))
                        });
                        match created_id {
                            Ok(remote_id) => {
                                report.record_success();
                                created.push(CreatedContact {
                                    remote_id,
                                    row: &rows[global],
                                });
                            }
                            Err(err) => report.record_failure(format!("row {}: {}", global + 1, err)),
                        }
                    }
                }
                ChunkResult::Failed(err) => {
                    error!(
                        "contact chunk {} (rows {}-{}) failed: {}",
                        window.index,
                        window.base_offset + 1,
                        window.end(),
                        err
                    );
                    for local_index in 0..window.len {
                        report.record_failure(format!(
                            "row {}: {}",
                            window.global_index(local_index) + 1,
                            err
                        ));
                    }
                }
                ChunkResult::Skipped => {
                    report.cancelled = true;
                    continue;
                }
            }

            context.progress(
                scaled_percent(window.end(), rows.len(), 0, CREATE_CEILING),
                &format!("created {} of {} contacts", report.success, rows.len()),
            );
        }

        created
    }

    async fn link_companies(
        &self,
        created: &[CreatedContact<'_>],
        index: &CompanyIndex,
        context: &JobContext,
        report: &mut AggregateReport,
    ) {
        let links: Vec<PendingLink<'_>> = created
            .iter()
            .filter_map(|contact| {
                let company = index.get(contact.row.company()?)?;
                Some(PendingLink {
                    contact: &contact.remote_id,
                    company,
                })
            })
            .collect();

        if links.is_empty() {
            debug!("import: none of the created contacts matched a company");
            return;
        }
        info!("linking {} contacts to companies", links.len());

        let mut linked = 0usize;
        let mut chunks = dispatch_windows(
            self.client,
            &links,
            CallKind::Link,
            CONTACT_COMPANY_ADD,
            |link: &PendingLink<'_>| link_params(link.contact, link.company),
            context,
        );

        while let Some((window, result)) = chunks.next().await {
            match result {
                ChunkResult::Completed(outcomes) => {
                    for (id, outcome) in outcomes {
                        let link = &links[window.global_index(id.local_index)];
                        match outcome {
                            Ok(_) => linked += 1,
                            Err(err) => {
                                report.note_error(format!("contact {}: {}", link.contact, err))
                            }
                        }
                    }
                }
                ChunkResult::Failed(err) => {
                    warn!("link chunk {} failed: {}", window.index, err);
                    for link in window.slice(&links) {
                        report.note_error(format!("contact {}: {}", link.contact, err));
                    }
                }
                ChunkResult::Skipped => {
                    report.cancelled = true;
                    continue;
                }
            }

            context.progress(
                scaled_percent(window.end(), links.len(), RESOLVE_DONE, LINK_CEILING),
                &format!("linked {} of {} contacts", linked, links.len()),
            );
        }

        debug!("linked {} of {} contacts", linked, links.len());
    }
}
