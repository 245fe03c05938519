//! Contact export: one filtered list fetch, one company title lookup, rows
//! in the order the CRM returned them.

use super::error::SyncError;
use super::mapper::{CONTACT_LIST, EXPORT_SELECT, RemoteContact};
use super::progress::JobContext;
use super::resolver::CompanyResolver;
use super::row::Row;
use crate::crm::{BatchClient, RemoteId};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, info, warn};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};

/// Date-time text format the CRM expects in filters.
pub const CRM_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const FILTER_FROM: &str = ">=DATE_CREATE";
const FILTER_TO: &str = "<=DATE_CREATE";

/// Inclusive bounds on a contact's creation time. Either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    from: Option<NaiveDateTime>,
    to: Option<NaiveDateTime>,
}

impl DateRange {
    /// Build a range, rejecting `from > to`. Equal bounds are allowed.
    pub fn new(from: Option<NaiveDateTime>, to: Option<NaiveDateTime>) -> Result<Self, SyncError> {
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(SyncError::InvalidDateRange {
                    from: from.format(CRM_DATETIME_FORMAT).to_string(),
                    to: to.format(CRM_DATETIME_FORMAT).to_string(),
                });
            }
        }
        Ok(Self { from, to })
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn from(&self) -> Option<NaiveDateTime> {
        self.from
    }

    pub fn to(&self) -> Option<NaiveDateTime> {
        self.to
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    /// The `filter` object for `crm.contact.list`.
    pub fn to_filter(&self) -> Value {
        let mut filter = Map::new();
        if let Some(from) = self.from {
            filter.insert(
                FILTER_FROM.to_string(),
                Value::String(from.format(CRM_DATETIME_FORMAT).to_string()),
            );
        }
        if let Some(to) = self.to {
            filter.insert(
                FILTER_TO.to_string(),
                Value::String(to.format(CRM_DATETIME_FORMAT).to_string()),
            );
        }
        Value::Object(filter)
    }
}

/// Which contacts an export covers, relative to the time it runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportPeriod {
    /// Everything, optionally narrowed by explicit bounds.
    #[default]
    All,
    /// Since midnight.
    Today,
    /// The last 7 days.
    Week,
    /// The last 30 days.
    Month,
    /// Explicit bounds; both are required.
    Custom,
}

impl ExportPeriod {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Some(Self::All),
            "today" => Some(Self::Today),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    /// Resolve the period into concrete bounds at `now`.
    pub fn date_range(
        self,
        now: NaiveDateTime,
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> Result<DateRange, SyncError> {
        match self {
            Self::All => DateRange::new(from, to),
            Self::Today => DateRange::new(Some(now.date().and_time(NaiveTime::MIN)), Some(now)),
            Self::Week => DateRange::new(Some(now - Duration::days(7)), Some(now)),
            Self::Month => DateRange::new(Some(now - Duration::days(30)), Some(now)),
            Self::Custom => match (from, to) {
                (Some(_), Some(_)) => DateRange::new(from, to),
                _ => Err(SyncError::IncompleteDateRange),
            },
        }
    }
}

/// Parse a user-supplied bound: a full date-time, or a bare date taken as
/// the start of the day (lower bound) or its last second (upper bound).
pub fn parse_bound(value: &str, upper: bool) -> Option<NaiveDateTime> {
    let value = value.trim();
    for format in [CRM_DATETIME_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed);
        }
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()?;
    let time = if upper {
        NaiveTime::from_hms_opt(23, 59, 59)?
    } else {
        NaiveTime::MIN
    };
    Some(date.and_time(time))
}

pub struct ContactExporter<'a> {
    client: &'a BatchClient,
}

impl<'a> ContactExporter<'a> {
    pub fn new(client: &'a BatchClient) -> Self {
        Self { client }
    }

    /// Fetch the contacts created inside `range` and flatten them into rows.
    ///
    /// A failed contact fetch fails the export. A failed company lookup does
    /// not: the affected rows get an empty company cell.
    pub async fn run(&self, range: &DateRange, context: &JobContext) -> Result<Vec<Row>, SyncError> {
        info!(
            "export: fetching contacts (from {:?}, to {:?})",
            range.from(),
            range.to()
        );
        context.progress(0, "fetching contacts");

        let params = json!({
            "select": EXPORT_SELECT,
            "filter": range.to_filter(),
            "order": { "DATE_CREATE": "DESC" },
        });
        let records = self.client.list_all(CONTACT_LIST, params).await?;

        let contacts: Vec<RemoteContact> = records
            .into_iter()
            .filter_map(|record| match serde_json::from_value(record) {
                Ok(contact) => Some(contact),
                Err(err) => {
                    warn!("skipping malformed contact record: {}", err);
                    None
                }
            })
            .collect();
        context.progress(60, &format!("fetched {} contacts", contacts.len()));

        let company_ids = referenced_companies(&contacts);
        let titles = match CompanyResolver::new(self.client)
            .resolve_titles(&company_ids)
            .await
        {
            Ok(titles) => titles,
            Err(err) => {
                warn!(
                    "company title lookup failed, exporting {} contacts without company names: {}",
                    contacts.len(),
                    err
                );
                HashMap::new()
            }
        };
        debug!(
            "export: resolved {} of {} company titles",
            titles.len(),
            company_ids.len()
        );

        let rows: Vec<Row> = contacts.iter().map(|contact| contact.to_row(&titles)).collect();
        info!("export finished: {} rows", rows.len());
        context.progress(100, "export finished");
        Ok(rows)
    }
}

/// Distinct company ids in first-seen order.
fn referenced_companies(contacts: &[RemoteContact]) -> Vec<RemoteId> {
    let mut seen = HashSet::new();
    contacts
        .iter()
        .filter_map(|contact| contact.company_id.clone())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}
