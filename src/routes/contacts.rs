//! Contact import, export and delete-all endpoints.

use crate::codec::{self, FileFormat};
use crate::contacts::export::parse_bound;
use crate::contacts::{
    ContactExporter, ContactImporter, ContactPurger, ExportPeriod, JobContext, SyncError,
};
use crate::crm::{BatchClient, CodecConfig};
use crate::error::ApiError;
use crate::jobs::{JobKind, JobRegistry};
use chrono::Local;
use rocket::data::{ByteUnit, Data};
use rocket::http::{ContentType, Header};
use rocket::response::status::Accepted;
use rocket::serde::json::Json;
use rocket::{Responder, State, get, post};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use rocket_okapi::response::OpenApiResponderInner;
use serde::{Deserialize, Serialize};

/// Returned when a background job has been started.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct JobAccepted {
    /// Identifier to poll at `/api/v1/jobs/<id>`.
    #[serde(rename = "jobId")]
    pub job_id: String,
    /// Rows parsed from the upload; absent for delete-all.
    #[serde(rename = "rowCount", skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
}

/// Exported contact file served as an attachment.
#[derive(Responder)]
pub struct ExportFile {
    body: Vec<u8>,
    content_type: ContentType,
    disposition: Header<'static>,
}

impl OpenApiResponderInner for ExportFile {
    fn responses(generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        <Vec<u8> as OpenApiResponderInner>::responses(generator)
    }
}

fn parse_format(format: Option<&str>) -> Result<FileFormat, ApiError> {
    match format {
        Some(format) => Ok(FileFormat::from_extension(format)?),
        None => Ok(FileFormat::default()),
    }
}

fn parse_date(value: Option<&str>, upper: bool, name: &str) -> Result<Option<chrono::NaiveDateTime>, ApiError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => parse_bound(value, upper)
            .map(Some)
            .ok_or_else(|| ApiError::BadRequest(format!("{name}: cannot parse '{value}' as a date"))),
    }
}

/// Upload a contact file and import it in the background.
///
/// The file is parsed before the job starts, so format and size problems
/// are returned directly.
#[openapi(tag = "Contacts")]
#[post("/contacts/import?<format>", data = "<data>")]
pub async fn import_contacts(
    format: Option<String>,
    data: Data<'_>,
    client: &State<BatchClient>,
    codec_config: &State<CodecConfig>,
    jobs: &State<JobRegistry>,
) -> Result<Accepted<Json<JobAccepted>>, ApiError> {
    let format = parse_format(format.as_deref())?;

    let limit = ByteUnit::from(codec_config.max_upload_bytes);
    let upload = data
        .open(limit)
        .into_bytes()
        .await
        .map_err(|err| ApiError::InternalError(format!("failed to read upload: {err}")))?;
    if !upload.is_complete() {
        return Err(SyncError::UploadTooLarge {
            size: upload.len(),
            limit: codec_config.max_upload_bytes,
        }
        .into());
    }

    let rows = codec::read_rows(format, &upload.into_inner(), codec_config)?;
    let row_count = rows.len();
    let client = client.inner().clone();

    let job_id = jobs.spawn(JobKind::Import, move |context| async move {
        Ok::<_, String>(ContactImporter::new(&client).run(&rows, &context).await)
    })?;

    Ok(Accepted(Json(JobAccepted {
        job_id,
        row_count: Some(row_count),
    })))
}

/// Export contacts, optionally limited to a creation period, as a file.
#[openapi(tag = "Contacts")]
#[get("/contacts/export?<format>&<period>&<date_from>&<date_to>")]
pub async fn export_contacts(
    format: Option<String>,
    period: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    client: &State<BatchClient>,
    codec_config: &State<CodecConfig>,
) -> Result<ExportFile, ApiError> {
    let format = parse_format(format.as_deref())?;
    let period = match period.as_deref() {
        Some(value) => ExportPeriod::parse(value)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown period '{value}'")))?,
        None => ExportPeriod::default(),
    };
    let from = parse_date(date_from.as_deref(), false, "date_from")?;
    let to = parse_date(date_to.as_deref(), true, "date_to")?;

    let now = Local::now().naive_local();
    let range = period.date_range(now, from, to)?;

    let rows = ContactExporter::new(client.inner())
        .run(&range, &JobContext::new())
        .await?;
    let body = codec::write_rows(format, &rows, codec_config)?;

    let filename = format!("contacts_{}.{}", now.format("%Y%m%d_%H%M%S"), format.extension());
    let content_type = match format {
        FileFormat::Csv => ContentType::CSV,
    };

    Ok(ExportFile {
        body,
        content_type,
        disposition: Header::new(
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        ),
    })
}

/// Delete every contact in the CRM in the background.
#[openapi(tag = "Contacts")]
#[post("/contacts/delete-all")]
pub async fn delete_all_contacts(
    client: &State<BatchClient>,
    jobs: &State<JobRegistry>,
) -> Result<Accepted<Json<JobAccepted>>, ApiError> {
    let client = client.inner().clone();
    let job_id = jobs.spawn(JobKind::DeleteAll, move |context| async move {
        Ok::<_, String>(ContactPurger::new(&client).run(&context).await)
    })?;

    Ok(Accepted(Json(JobAccepted {
        job_id,
        row_count: None,
    })))
}
