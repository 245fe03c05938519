//! Company lookups by name (import) and by id (export).

use super::mapper::{COMPANY_LIST, RemoteCompany, company_lookup_params};
use crate::crm::{BatchCall, BatchClient, CallId, CallKind, CrmError, RemoteId};
use log::{debug, warn};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};

/// Trimmed company name to CRM id; at most one id per name.
pub type CompanyIndex = HashMap<String, RemoteId>;

/// Trim, drop blanks, and deduplicate names, keeping first-seen order.
pub fn distinct_names<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut distinct = Vec::new();
    for name in names {
        let trimmed = name.trim();
        if !trimmed.is_empty() && seen.insert(trimmed) {
            distinct.push(trimmed.to_string());
        }
    }
    distinct
}

pub struct CompanyResolver<'a> {
    client: &'a BatchClient,
}

impl<'a> CompanyResolver<'a> {
    pub fn new(client: &'a BatchClient) -> Self {
        Self { client }
    }

    /// Look every distinct name up once and map it to the first matching
    /// company. Names with no match or a failed lookup are left out.
    pub async fn resolve<'n, I>(&self, names: I) -> CompanyIndex
    where
        I: IntoIterator<Item = &'n str>,
    {
        let names = distinct_names(names);
        let mut index = CompanyIndex::with_capacity(names.len());
        if names.is_empty() {
            return index;
        }

        let calls: Vec<BatchCall> = names
            .iter()
            .enumerate()
            .map(|(position, name)| {
                BatchCall::new(
                    CallId::new(CallKind::Company, position),
                    COMPANY_LIST,
                    company_lookup_params(name),
                )
            })
            .collect();

        let outcomes = match self.client.submit(&calls, self.client.default_options()).await {
            Ok(outcomes) => outcomes,
            Err(err) => {
                warn!("company lookup failed: {}", err);
                return index;
            }
        };

        for (id, outcome) in outcomes {
            let Some(name) = names.get(id.local_index) else {
                continue;
            };
            match outcome {
                Ok(value) => match first_company(value) {
                    Some(company) => {
                        index.insert(name.clone(), company.id);
                    }
                    None => debug!("company '{}' not found", name),
                },
                Err(err) => debug!("company lookup for '{}' failed: {}", name, err),
            }
        }

        debug!("resolved {} of {} company names", index.len(), names.len());
        index
    }

    /// Map company ids to their titles with one (paginated) list call.
    pub async fn resolve_titles(
        &self,
        ids: &[RemoteId],
    ) -> Result<HashMap<RemoteId, String>, CrmError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let id_values: Vec<&str> = ids.iter().map(RemoteId::as_str).collect();
        let params = json!({
            "filter": { "ID": id_values },
            "select": ["ID", "TITLE"],
        });

        let items = self.client.list_all(COMPANY_LIST, params).await?;
        let mut titles = HashMap::with_capacity(items.len());
        for item in items {
            match serde_json::from_value::<RemoteCompany>(item) {
                Ok(company) => {
                    titles.insert(company.id, company.title.unwrap_or_default());
                }
                Err(err) => warn!("skipping malformed company record: {}", err),
            }
        }
        Ok(titles)
    }
}

fn first_company(value: Value) -> Option<RemoteCompany> {
    let first = match value {
        Value::Array(items) => items.into_iter().next()?,
        _ => return None,
    };
    serde_json::from_value(first).ok()
}
