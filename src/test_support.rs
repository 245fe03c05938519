//! Test doubles shared by unit and integration tests.

use crate::crm::{BatchClient, CodecConfig, CrmConfig};
use crate::jobs::JobRegistry;
use rocket::config::LogLevel;
use rocket::figment::Figment;
use rocket::local::asynchronous::Client as AsyncClient;
use rocket::local::blocking::Client;
use rocket::{Build, Rocket, Route};
use std::time::Duration;

pub use mock_crm::MockCrm;

/// Client settings used against [`MockCrm`]: full batches, one chunk in
/// flight, short timeouts.
pub fn mock_config() -> CrmConfig {
    CrmConfig {
        webhook_url: "http://crm.invalid/rest/".to_string(),
        batch_size: 50,
        request_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(1),
        max_concurrent_chunks: 1,
        list_page_limit: 10_000,
    }
}

pub mod mock_crm {
    use super::mock_config;
    use crate::crm::{
        BatchCall, BatchClient, CallOutcome, CallResponse, CrmConfig, CrmError, CrmTransport,
        RemoteId,
    };
    use async_trait::async_trait;
    use chrono::{Local, NaiveDateTime, SubsecRound};
    use parking_lot::Mutex;
    use reqwest::StatusCode;
    use serde_json::{Map, Value, json};
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;

    const PAGE_SIZE: usize = 50;
    const FILTER_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    /// Creation stamps carry whole seconds, like the remote's `DATE_CREATE`.
    fn stamp_now() -> NaiveDateTime {
        Local::now().naive_local().trunc_subsecs(0)
    }

    #[derive(Debug, Clone)]
    struct StoredContact {
        id: RemoteId,
        fields: Map<String, Value>,
        created_at: NaiveDateTime,
    }

    #[derive(Default)]
    struct MockState {
        next_id: u64,
        contacts: Vec<StoredContact>,
        companies: Vec<(RemoteId, String)>,
        links: Vec<(RemoteId, RemoteId)>,
        batch_requests: usize,
        largest_batch: usize,
        method_calls: HashMap<String, usize>,
        failing_batch_requests: HashSet<usize>,
        failing_methods: HashSet<String>,
        rejected_names: HashSet<String>,
        fail_links: bool,
    }

    impl MockState {
        fn allocate_id(&mut self) -> RemoteId {
            self.next_id += 1;
            RemoteId::new(self.next_id.to_string())
        }

        fn company_of(&self, contact: &RemoteId) -> Option<&RemoteId> {
            self.links
                .iter()
                .rev()
                .find(|(linked, _)| linked == contact)
                .map(|(_, company)| company)
        }

        fn execute(&mut self, method: &str, params: &Value) -> Result<CallResponse, String> {
            *self.method_calls.entry(method.to_string()).or_default() += 1;
            if self.failing_methods.contains(method) {
                return Err(format!("{method} is unavailable"));
            }

            match method {
                "crm.contact.add" => self.add_contact(params),
                "crm.contact.list" => Ok(self.list_contacts(params)),
                "crm.contact.delete" => self.delete_contact(params),
                "crm.company.list" => Ok(self.list_companies(params)),
                "crm.contact.company.add" => self.link_contact(params),
                other => Err(format!("Method '{other}' not found")),
            }
        }

        fn add_contact(&mut self, params: &Value) -> Result<CallResponse, String> {
            let fields = params
                .get("fields")
                .and_then(Value::as_object)
                .cloned()
                .ok_or_else(|| "fields are required".to_string())?;
            let name = fields.get("NAME").and_then(Value::as_str).unwrap_or("");
            if self.rejected_names.contains(name) {
                return Err(format!("contact '{name}' rejected"));
            }

            let id = self.allocate_id();
            self.contacts.push(StoredContact {
                id: id.clone(),
                fields,
                created_at: stamp_now(),
            });
            let numeric: u64 = id.as_str().parse().unwrap_or_default();
            Ok(CallResponse {
                result: json!(numeric),
                ..CallResponse::default()
            })
        }

        fn list_contacts(&self, params: &Value) -> CallResponse {
            let filter = params.get("filter").cloned().unwrap_or(Value::Null);
            let from = date_bound(&filter, ">=DATE_CREATE");
            let to = date_bound(&filter, "<=DATE_CREATE");

            let mut matching: Vec<&StoredContact> = self
                .contacts
                .iter()
                .filter(|contact| from.is_none_or(|from| contact.created_at >= from))
                .filter(|contact| to.is_none_or(|to| contact.created_at <= to))
                .collect();
            let descending = params
                .pointer("/order/DATE_CREATE")
                .and_then(Value::as_str)
                .is_some_and(|order| order.eq_ignore_ascii_case("DESC"));
            if descending {
                matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            }

            let select = selected_fields(params);
            let records: Vec<Value> = matching
                .into_iter()
                .map(|contact| self.contact_record(contact, &select))
                .collect();
            paginate(records, params)
        }

        fn contact_record(&self, contact: &StoredContact, select: &Option<HashSet<String>>) -> Value {
            let mut record = contact.fields.clone();
            record.insert("ID".to_string(), json!(contact.id.as_str()));
            record.insert(
                "COMPANY_ID".to_string(),
                self.company_of(&contact.id)
                    .map(|id| json!(id.as_str()))
                    .unwrap_or(Value::Null),
            );
            record.insert(
                "DATE_CREATE".to_string(),
                json!(contact.created_at.format("%Y-%m-%dT%H:%M:%S+03:00").to_string()),
            );
            if let Some(select) = select {
                record.retain(|key, _| key == "ID" || select.contains(key));
            }
            Value::Object(record)
        }

        fn delete_contact(&mut self, params: &Value) -> Result<CallResponse, String> {
            let id = params
                .get("id")
                .and_then(RemoteId::from_value)
                .ok_or_else(|| "id is required".to_string())?;
            let before = self.contacts.len();
            self.contacts.retain(|contact| contact.id != id);
            if self.contacts.len() == before {
                return Err("Not found".to_string());
            }
            self.links.retain(|(contact, _)| contact != &id);
            Ok(CallResponse {
                result: json!(true),
                ..CallResponse::default()
            })
        }

        fn list_companies(&self, params: &Value) -> CallResponse {
            let title = params.pointer("/filter/TITLE").and_then(Value::as_str);
            let ids: Option<HashSet<RemoteId>> = params
                .pointer("/filter/ID")
                .and_then(Value::as_array)
                .map(|ids| ids.iter().filter_map(RemoteId::from_value).collect());

            let records: Vec<Value> = self
                .companies
                .iter()
                .filter(|(_, company_title)| title.is_none_or(|title| company_title == title))
                .filter(|(id, _)| ids.as_ref().is_none_or(|ids| ids.contains(id)))
                .map(|(id, company_title)| json!({ "ID": id.as_str(), "TITLE": company_title }))
                .collect();
            paginate(records, params)
        }

        fn link_contact(&mut self, params: &Value) -> Result<CallResponse, String> {
            if self.fail_links {
                return Err("Access denied".to_string());
            }
            let contact = params
                .get("id")
                .and_then(RemoteId::from_value)
                .ok_or_else(|| "id is required".to_string())?;
            let company = params
                .pointer("/fields/COMPANY_ID")
                .and_then(RemoteId::from_value)
                .ok_or_else(|| "COMPANY_ID is required".to_string())?;
            if !self.contacts.iter().any(|stored| stored.id == contact) {
                return Err(format!("contact {contact} not found"));
            }
            if !self.companies.iter().any(|(id, _)| id == &company) {
                return Err(format!("company {company} not found"));
            }
            self.links.push((contact, company));
            Ok(CallResponse {
                result: json!(true),
                ..CallResponse::default()
            })
        }
    }

    fn date_bound(filter: &Value, key: &str) -> Option<NaiveDateTime> {
        let text = filter.get(key)?.as_str()?;
        NaiveDateTime::parse_from_str(text, FILTER_DATE_FORMAT).ok()
    }

    fn selected_fields(params: &Value) -> Option<HashSet<String>> {
        let select = params.get("select")?.as_array()?;
        Some(
            select
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
        )
    }

    fn paginate(records: Vec<Value>, params: &Value) -> CallResponse {
        let total = records.len();
        let start = params
            .get("start")
            .and_then(Value::as_u64)
            .map(|start| start as usize)
            .unwrap_or(0)
            .min(total);
        let end = (start + PAGE_SIZE).min(total);
        let page: Vec<Value> = records[start..end].to_vec();

        CallResponse {
            result: Value::Array(page),
            next: (end < total).then_some(end),
            total: Some(total),
        }
    }

    /// In-memory CRM speaking the same method vocabulary as the real one,
    /// with switches for injecting failures.
    #[derive(Clone, Default)]
    pub struct MockCrm {
        state: Arc<Mutex<MockState>>,
    }

    impl MockCrm {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn client(&self) -> BatchClient {
            self.client_with(mock_config())
        }

        pub fn client_with(&self, config: CrmConfig) -> BatchClient {
            BatchClient::new(Arc::new(self.clone()), config)
        }

        pub fn insert_company(&self, title: &str) -> RemoteId {
            let mut state = self.state.lock();
            let id = state.allocate_id();
            state.companies.push((id.clone(), title.to_string()));
            id
        }

        pub fn insert_contact(&self, name: &str) -> RemoteId {
            self.insert_contact_at(json!({ "NAME": name }), stamp_now())
        }

        /// Store a contact with the given fields and creation time.
        pub fn insert_contact_at(&self, fields: Value, created_at: NaiveDateTime) -> RemoteId {
            let mut state = self.state.lock();
            let id = state.allocate_id();
            state.contacts.push(StoredContact {
                id: id.clone(),
                fields: fields.as_object().cloned().unwrap_or_default(),
                created_at: created_at.trunc_subsecs(0),
            });
            id
        }

        pub fn link(&self, contact: &RemoteId, company: &RemoteId) {
            self.state.lock().links.push((contact.clone(), company.clone()));
        }

        /// Stored contact fields, in insertion order.
        pub fn contacts(&self) -> Vec<Value> {
            self.state
                .lock()
                .contacts
                .iter()
                .map(|contact| Value::Object(contact.fields.clone()))
                .collect()
        }

        pub fn contact_count(&self) -> usize {
            self.state.lock().contacts.len()
        }

        /// `(contact, company)` pairs in link order.
        pub fn links(&self) -> Vec<(RemoteId, RemoteId)> {
            self.state.lock().links.clone()
        }

        pub fn batch_requests(&self) -> usize {
            self.state.lock().batch_requests
        }

        pub fn largest_batch(&self) -> usize {
            self.state.lock().largest_batch
        }

        /// Invocations of `method`, whether sent alone or inside a batch.
        pub fn method_calls(&self, method: &str) -> usize {
            self.state
                .lock()
                .method_calls
                .get(method)
                .copied()
                .unwrap_or(0)
        }

        pub fn total_calls(&self) -> usize {
            self.state.lock().method_calls.values().sum()
        }

        /// Fail the `n`-th batch request (1-based) with a transport error.
        pub fn fail_batch_request(&self, n: usize) {
            self.state.lock().failing_batch_requests.insert(n);
        }

        /// Fail every call of `method`, alone or batched.
        pub fn fail_method(&self, method: &str) {
            self.state.lock().failing_methods.insert(method.to_string());
        }

        /// Reject `crm.contact.add` for contacts with this `NAME`.
        pub fn reject_contact_named(&self, name: &str) {
            self.state.lock().rejected_names.insert(name.to_string());
        }

        pub fn fail_links(&self) {
            self.state.lock().fail_links = true;
        }
    }

    #[async_trait]
    impl CrmTransport for MockCrm {
        async fn call(&self, method: &str, params: &Value) -> Result<CallResponse, CrmError> {
            self.state
                .lock()
                .execute(method, params)
                .map_err(|message| CrmError::remote(method, message))
        }

        async fn batch(
            &self,
            calls: &[BatchCall],
            halt_on_error: bool,
        ) -> Result<HashMap<String, CallOutcome>, CrmError> {
            let mut state = self.state.lock();
            state.batch_requests += 1;
            state.largest_batch = state.largest_batch.max(calls.len());
            let request = state.batch_requests;
            if state.failing_batch_requests.contains(&request) {
                return Err(CrmError::status(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("batch request {request} failed"),
                ));
            }

            let mut outcomes = HashMap::with_capacity(calls.len());
            for call in calls {
                let outcome = state
                    .execute(&call.method, &call.params)
                    .map(|response| response.result);
                let failed = outcome.is_err();
                outcomes.insert(call.id.wire_key(), outcome);
                if failed && halt_on_error {
                    break;
                }
            }
            Ok(outcomes)
        }
    }
}

/// Builder for constructing Rocket instances tailored for integration tests.
pub struct TestRocketBuilder {
    figment: Figment,
    mounts: Vec<(String, Vec<Route>)>,
    client: Option<BatchClient>,
    codec_config: CodecConfig,
    jobs: JobRegistry,
}

impl Default for TestRocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestRocketBuilder {
    /// Start a builder with sensible defaults: random port, logging disabled.
    pub fn new() -> Self {
        let figment = rocket::Config::figment()
            .merge(("port", 0))
            .merge(("log_level", LogLevel::Off))
            .merge(("cli_colors", false));

        Self {
            figment,
            mounts: Vec::new(),
            client: None,
            codec_config: CodecConfig {
                delimiter: b',',
                max_upload_bytes: 10 * 1024 * 1024,
            },
            jobs: JobRegistry::new(),
        }
    }

    /// Mount routes under `/api/v1`.
    pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
        self.mounts.push(("/api/v1".to_string(), routes));
        self
    }

    /// Manage the CRM client used by the contact routes.
    pub fn manage_client(mut self, client: BatchClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn codec_config(mut self, config: CodecConfig) -> Self {
        self.codec_config = config;
        self
    }

    /// Share a job registry with the test so it can inspect jobs directly.
    pub fn manage_jobs(mut self, jobs: JobRegistry) -> Self {
        self.jobs = jobs;
        self
    }

    /// Finish building the Rocket instance.
    pub fn build(self) -> Rocket<Build> {
        let mut rocket = rocket::custom(self.figment)
            .manage(self.codec_config)
            .manage(self.jobs);

        for (base, routes) in self.mounts {
            rocket = rocket.mount(base, routes);
        }

        if let Some(client) = self.client {
            rocket = rocket.manage(client);
        }

        rocket
    }

    /// Convenience helper to produce a blocking local client.
    pub fn blocking_client(self) -> Client {
        Client::tracked(self.build()).expect("valid Rocket instance")
    }

    /// Convenience helper to produce an asynchronous local client.
    pub async fn async_client(self) -> AsyncClient {
        AsyncClient::tracked(self.build())
            .await
            .expect("valid Rocket instance")
    }
}
