use chrono::{Local, NaiveDateTime};
use crm_sync::codec::{self, FileFormat};
use crm_sync::contacts::mapper::{COMPANY_LIST, CONTACT_LIST};
use crm_sync::contacts::{
    Column, ContactExporter, ContactImporter, ContactPurger, DateRange, ExportPeriod, JobContext,
    Row, SyncError,
};
use crm_sync::crm::CodecConfig;
use crm_sync::test_support::MockCrm;
use serde_json::json;

fn at(text: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").expect("valid date-time")
}

fn codec_config() -> CodecConfig {
    CodecConfig {
        delimiter: b',',
        max_upload_bytes: 1024 * 1024,
    }
}

#[tokio::test]
async fn contact_created_this_second_is_in_todays_export() {
    let crm = MockCrm::new();
    crm.insert_contact("Ann");
    let client = crm.client();

    let range = ExportPeriod::Today
        .date_range(Local::now().naive_local(), None, None)
        .expect("today");
    let rows = ContactExporter::new(&client)
        .run(&range, &JobContext::new())
        .await
        .expect("export");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(Column::FirstName), "Ann");
}

#[tokio::test]
async fn export_filters_by_creation_date_newest_first() {
    let crm = MockCrm::new();
    crm.insert_contact_at(json!({"NAME": "Old"}), at("2024-04-01 09:00:00"));
    crm.insert_contact_at(json!({"NAME": "Early May"}), at("2024-05-01 00:00:00"));
    crm.insert_contact_at(json!({"NAME": "Mid May"}), at("2024-05-15 12:00:00"));
    crm.insert_contact_at(json!({"NAME": "June"}), at("2024-06-01 09:00:00"));
    let client = crm.client();

    let range = DateRange::new(Some(at("2024-05-01 00:00:00")), Some(at("2024-05-31 23:59:59")))
        .expect("valid range");
    let rows = ContactExporter::new(&client)
        .run(&range, &JobContext::new())
        .await
        .expect("export");

    let names: Vec<&str> = rows.iter().map(|row| row.get(Column::FirstName)).collect();
    assert_eq!(names, vec!["Mid May", "Early May"]);
}

#[tokio::test]
async fn export_replaces_company_ids_with_titles() {
    let crm = MockCrm::new();
    let acme = crm.insert_company("Acme");
    let ann = crm.insert_contact("Ann");
    crm.insert_contact("Bob");
    crm.link(&ann, &acme);
    let client = crm.client();

    let rows = ContactExporter::new(&client)
        .run(&DateRange::unbounded(), &JobContext::new())
        .await
        .expect("export");

    let companies: Vec<(&str, &str)> = rows
        .iter()
        .map(|row| (row.get(Column::FirstName), row.get(Column::Company)))
        .collect();
    assert!(companies.contains(&("Ann", "Acme")));
    assert!(companies.contains(&("Bob", "")));
    assert_eq!(crm.method_calls(COMPANY_LIST), 1);
}

#[tokio::test]
async fn company_lookup_failure_degrades_to_empty_names() {
    let crm = MockCrm::new();
    let acme = crm.insert_company("Acme");
    let ann = crm.insert_contact("Ann");
    crm.link(&ann, &acme);
    crm.fail_method(COMPANY_LIST);
    let client = crm.client();

    let rows = ContactExporter::new(&client)
        .run(&DateRange::unbounded(), &JobContext::new())
        .await
        .expect("export still succeeds");

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get(Column::FirstName), "Ann");
    assert_eq!(rows[0].get(Column::Company), "");
}

#[tokio::test]
async fn contact_fetch_failure_fails_the_export() {
    let crm = MockCrm::new();
    crm.fail_method(CONTACT_LIST);
    let client = crm.client();

    let result = ContactExporter::new(&client)
        .run(&DateRange::unbounded(), &JobContext::new())
        .await;

    assert!(matches!(result, Err(SyncError::Crm(_))));
}

#[tokio::test]
async fn export_pages_through_large_result_sets() {
    let crm = MockCrm::new();
    for index in 0..130 {
        crm.insert_contact(&format!("Person {index}"));
    }
    let client = crm.client();

    let rows = ContactExporter::new(&client)
        .run(&DateRange::unbounded(), &JobContext::new())
        .await
        .expect("export");

    assert_eq!(rows.len(), 130);
    assert_eq!(crm.method_calls(CONTACT_LIST), 3);
}

#[tokio::test]
async fn exported_file_reimports_into_an_empty_crm() {
    let source = MockCrm::new();
    let acme = source.insert_company("Acme");
    let input = vec![
        Row::new()
            .with(Column::FirstName, "Ann")
            .with(Column::MiddleName, "B")
            .with(Column::LastName, "Lee")
            .with(Column::Phone, "+100")
            .with(Column::Email, "ann@example.com")
            .with(Column::Company, "Acme"),
        Row::new()
            .with(Column::FirstName, "Bob")
            .with(Column::LastName, "Stone"),
    ];
    let source_client = source.client();
    let created = ContactImporter::new(&source_client)
        .run(&input, &JobContext::new())
        .await;
    assert_eq!(created.success, 2);

    let exported = ContactExporter::new(&source_client)
        .run(&DateRange::unbounded(), &JobContext::new())
        .await
        .expect("export");
    let file = codec::write_rows(FileFormat::Csv, &exported, &codec_config()).expect("write");

    let target = MockCrm::new();
    let target_acme = target.insert_company("Acme");
    let target_client = target.client();
    let reread = codec::read_rows(FileFormat::Csv, &file, &codec_config()).expect("read");
    let report = ContactImporter::new(&target_client)
        .run(&reread, &JobContext::new())
        .await;

    assert_eq!(report.success, 2);
    assert_eq!(target.contact_count(), source.contact_count());
    assert_eq!(source.links()[0].1, acme);
    let target_links = target.links();
    assert_eq!(target_links.len(), 1);
    assert_eq!(target_links[0].1, target_acme);

    let mut original: Vec<Vec<String>> = exported.iter().map(cells).collect();
    let reexported = ContactExporter::new(&target_client)
        .run(&DateRange::unbounded(), &JobContext::new())
        .await
        .expect("export");
    let mut copied: Vec<Vec<String>> = reexported.iter().map(cells).collect();
    original.sort();
    copied.sort();
    assert_eq!(original, copied);
}

fn cells(row: &Row) -> Vec<String> {
    Column::ALL
        .iter()
        .map(|column| row.get(*column).to_string())
        .collect()
}

#[tokio::test]
async fn delete_all_empties_the_crm() {
    let crm = MockCrm::new();
    for index in 0..75 {
        crm.insert_contact(&format!("Person {index}"));
    }
    let client = crm.client();

    let report = ContactPurger::new(&client).run(&JobContext::new()).await;

    assert_eq!(report.total, 75);
    assert_eq!(report.success, 75);
    assert_eq!(report.success + report.failed, report.total);
    assert_eq!(crm.contact_count(), 0);
    assert_eq!(crm.batch_requests(), 2);
}

#[tokio::test]
async fn delete_failed_chunk_counts_as_failed() {
    let crm = MockCrm::new();
    for index in 0..75 {
        crm.insert_contact(&format!("Person {index}"));
    }
    crm.fail_batch_request(1);
    let client = crm.client();

    let report = ContactPurger::new(&client).run(&JobContext::new()).await;

    assert_eq!(report.success, 25);
    assert_eq!(report.failed, 50);
    assert_eq!(report.errors.len(), 50);
    assert_eq!(crm.contact_count(), 50);
}
