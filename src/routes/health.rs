//! Lightweight service health endpoint used for readiness checks and tests.

use crate::crm::BatchClient;
use crate::jobs::JobRegistry;
use rocket::serde::json::Json;
use rocket::{State, get};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

/// Basic response payload describing API health.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    /// Static status string reporting application readiness.
    pub status: String,
    /// Calls per batch request.
    #[serde(rename = "batchSize")]
    pub batch_size: usize,
    /// Id of the job currently running, if any.
    #[serde(rename = "runningJob")]
    pub running_job: Option<String>,
}

/// Health check endpoint. Does not contact the CRM.
#[openapi(tag = "Health")]
#[get("/health")]
pub fn health_check(client: &State<BatchClient>, jobs: &State<JobRegistry>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        batch_size: client.config().batch_size,
        running_job: jobs.running().map(|job| job.id),
    })
}
