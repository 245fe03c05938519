use std::time::Duration;

use crm_sync::crm::CodecConfig;
use crm_sync::jobs::{JobKind, JobRegistry, JobState, JobStatus};
use crm_sync::routes::contacts::{
    JobAccepted, delete_all_contacts, export_contacts, import_contacts,
};
use crm_sync::routes::jobs::{cancel_job, get_job};
use crm_sync::test_support::{MockCrm, TestRocketBuilder};
use rocket::http::{ContentType, Status};
use rocket::local::asynchronous::Client;
use rocket::routes;
use serde_json::{Value, json};

async fn client_for(crm: &MockCrm, jobs: JobRegistry) -> Client {
    TestRocketBuilder::new()
        .manage_client(crm.client())
        .manage_jobs(jobs)
        .mount_api_routes(routes![
            import_contacts,
            export_contacts,
            delete_all_contacts,
            get_job,
            cancel_job
        ])
        .async_client()
        .await
}

async fn wait_for_job(client: &Client, id: &str) -> JobState {
    for _ in 0..200 {
        let state: JobState = client
            .get(format!("/api/v1/jobs/{id}"))
            .dispatch()
            .await
            .into_json()
            .await
            .expect("job state");
        if state.status.is_finished() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not finish");
}

#[tokio::test]
async fn import_runs_as_background_job() {
    let crm = MockCrm::new();
    let acme = crm.insert_company("Acme");
    let client = client_for(&crm, JobRegistry::new()).await;

    let response = client
        .post("/api/v1/contacts/import?format=csv")
        .header(ContentType::CSV)
        .body("first_name,last_name,company\nAnn,Lee,Acme\nBob,Stone,\n")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Accepted);
    let accepted: JobAccepted = response.into_json().await.expect("job accepted");
    assert_eq!(accepted.row_count, Some(2));

    let state = wait_for_job(&client, &accepted.job_id).await;
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.percent, 100);
    let report = state.report.expect("report");
    assert_eq!((report.total, report.success, report.failed), (2, 2, 0));
    assert_eq!(crm.contact_count(), 2);
    assert_eq!(crm.links().len(), 1);
    assert_eq!(crm.links()[0].1, acme);
}

#[tokio::test]
async fn spreadsheet_upload_is_rejected_up_front() {
    let crm = MockCrm::new();
    let client = client_for(&crm, JobRegistry::new()).await;

    let response = client
        .post("/api/v1/contacts/import?format=xlsx")
        .body("PK\u{3}\u{4}")
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::BadRequest);
    let body: Value = response.into_json().await.expect("error body");
    assert_eq!(body["error"], "BadRequest");
    assert_eq!(crm.total_calls(), 0);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let crm = MockCrm::new();
    let client = TestRocketBuilder::new()
        .manage_client(crm.client())
        .codec_config(CodecConfig {
            delimiter: b',',
            max_upload_bytes: 16,
        })
        .mount_api_routes(routes![import_contacts])
        .async_client()
        .await;

    let response = client
        .post("/api/v1/contacts/import")
        .body("first_name\nAnn\nBob\nCarol\nDave\n")
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::PayloadTooLarge);
    assert_eq!(crm.total_calls(), 0);
}

#[tokio::test]
async fn reversed_export_range_makes_no_remote_calls() {
    let crm = MockCrm::new();
    crm.insert_contact("Ann");
    let client = client_for(&crm, JobRegistry::new()).await;

    let response = client
        .get("/api/v1/contacts/export?period=custom&date_from=2024-05-02&date_to=2024-05-01")
        .dispatch()
        .await;

    assert_eq!(response.status(), Status::BadRequest);
    let body: Value = response.into_json().await.expect("error body");
    assert!(
        body["message"]
            .as_str()
            .is_some_and(|message| message.contains("invalid date range"))
    );
    assert_eq!(crm.total_calls(), 0);
}

#[tokio::test]
async fn export_returns_csv_attachment() {
    let crm = MockCrm::new();
    let acme = crm.insert_company("Acme");
    let ann = crm.insert_contact_at(
        json!({"NAME": "Ann", "LAST_NAME": "Lee", "EMAIL": [{"VALUE": "ann@example.com", "VALUE_TYPE": "WORK"}]}),
        chrono::Local::now().naive_local(),
    );
    crm.link(&ann, &acme);
    let client = client_for(&crm, JobRegistry::new()).await;

    let response = client.get("/api/v1/contacts/export?period=today").dispatch().await;

    assert_eq!(response.status(), Status::Ok);
    assert_eq!(response.content_type(), Some(ContentType::CSV));
    let disposition = response
        .headers()
        .get_one("Content-Disposition")
        .map(str::to_string)
        .expect("attachment header");
    assert!(disposition.starts_with("attachment; filename=\"contacts_"));

    let body = response.into_string().await.expect("body");
    let mut lines = body.lines();
    assert_eq!(
        lines.next(),
        Some("first_name,last_name,middle_name,phone,email,company")
    );
    assert_eq!(lines.next(), Some("Ann,Lee,,,ann@example.com,Acme"));
    assert_eq!(lines.next(), None);
}

#[tokio::test]
async fn unknown_period_is_a_bad_request() {
    let crm = MockCrm::new();
    let client = client_for(&crm, JobRegistry::new()).await;

    let response = client
        .get("/api/v1/contacts/export?period=decade")
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::BadRequest);
}

#[tokio::test]
async fn delete_all_is_refused_while_a_job_runs() {
    let crm = MockCrm::new();
    crm.insert_contact("Ann");
    let jobs = JobRegistry::new();
    let running = jobs.start(JobKind::Import).expect("job starts");
    let client = client_for(&crm, jobs.clone()).await;

    let response = client.post("/api/v1/contacts/delete-all").dispatch().await;
    assert_eq!(response.status(), Status::Conflict);
    assert_eq!(crm.contact_count(), 1);

    running.finish(Default::default());
    let response = client.post("/api/v1/contacts/delete-all").dispatch().await;
    assert_eq!(response.status(), Status::Accepted);
    let accepted: JobAccepted = response.into_json().await.expect("job accepted");

    let state = wait_for_job(&client, &accepted.job_id).await;
    assert_eq!(state.status, JobStatus::Completed);
    assert_eq!(state.report.map(|report| report.success), Some(1));
    assert_eq!(crm.contact_count(), 0);
}

#[tokio::test]
async fn cancelling_marks_the_job() {
    let crm = MockCrm::new();
    let jobs = JobRegistry::new();
    let handle = jobs.start(JobKind::DeleteAll).expect("job starts");
    let client = client_for(&crm, jobs.clone()).await;

    let response = client
        .post(format!("/api/v1/jobs/{}/cancel", handle.id()))
        .dispatch()
        .await;
    assert_eq!(response.status(), Status::Ok);
    let state: JobState = response.into_json().await.expect("job state");
    assert!(state.cancel_requested);
    assert!(handle.context().is_cancelled());
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let crm = MockCrm::new();
    let client = client_for(&crm, JobRegistry::new()).await;

    let response = client.get("/api/v1/jobs/missing").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);

    let response = client.post("/api/v1/jobs/missing/cancel").dispatch().await;
    assert_eq!(response.status(), Status::NotFound);
}
