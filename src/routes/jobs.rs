//! Polling and cancelling background jobs.

use crate::error::ApiError;
use crate::jobs::{JobRegistry, JobState};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_okapi::openapi;

/// Current state of a job, including its report once finished.
#[openapi(tag = "Jobs")]
#[get("/jobs/<id>")]
pub fn get_job(id: &str, jobs: &State<JobRegistry>) -> Result<Json<JobState>, ApiError> {
    jobs.get(id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))
}

/// Request cancellation. The job stops after the chunk in flight.
#[openapi(tag = "Jobs")]
#[post("/jobs/<id>/cancel")]
pub fn cancel_job(id: &str, jobs: &State<JobRegistry>) -> Result<Json<JobState>, ApiError> {
    Ok(Json(jobs.cancel(id)?))
}
