use crate::contacts::{Column, Row, SyncError};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use log::{debug, warn};

const UTF8_BOM: &str = "\u{feff}";

/// Parse a headed CSV document into rows.
///
/// Headers are matched through [`Column::from_header`]; unknown columns are
/// ignored and short records read the missing cells as empty. Rows with no
/// non-blank cell are dropped.
pub fn read_rows(bytes: &[u8], delimiter: u8) -> Result<Vec<Row>, SyncError> {
    let text = std::str::from_utf8(bytes)?;
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let columns: Vec<Option<Column>> = reader
        .headers()?
        .iter()
        .map(Column::from_header)
        .collect();

    let unknown: Vec<&str> = reader
        .headers()?
        .iter()
        .zip(&columns)
        .filter(|(_, column)| column.is_none())
        .map(|(header, _)| header)
        .collect();
    if !unknown.is_empty() {
        debug!("ignoring unknown columns: {:?}", unknown);
    }
    if columns.iter().all(Option::is_none) {
        warn!("no recognised columns in header; every row will be blank");
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = columns
            .iter()
            .zip(record.iter())
            .filter_map(|(column, value)| column.map(|column| (column, value)))
            .fold(Row::new(), |row, (column, value)| row.with(column, value));

        if !row.is_blank() {
            rows.push(row);
        }
    }

    Ok(rows)
}

/// Write rows with a canonical header line in export column order.
pub fn write_rows(rows: &[Row], delimiter: u8) -> Result<Vec<u8>, SyncError> {
    let mut writer = WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());

    writer.write_record(Column::EXPORT_ORDER.iter().map(Column::as_str))?;
    for row in rows {
        writer.write_record(Column::EXPORT_ORDER.iter().map(|column| row.get(*column)))?;
    }

    writer
        .into_inner()
        .map_err(|err| SyncError::Io(err.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_aliased_headers_and_skips_blank_lines() {
        let input = "\u{feff}Имя,Фамилия,Почта,Notes,Компания\n\
                     Ann , Lee ,ann@example.com,x,Acme\n\
                     ,,,,\n\
                     Bob,Stone\n";

        let rows = read_rows(input.as_bytes(), b',').expect("parses");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(Column::FirstName), "Ann");
        assert_eq!(rows[0].get(Column::LastName), "Lee");
        assert_eq!(rows[0].get(Column::Email), "ann@example.com");
        assert_eq!(rows[0].company(), Some("Acme"));
        assert_eq!(rows[1].get(Column::FirstName), "Bob");
        assert_eq!(rows[1].get(Column::Company), "");
    }

    #[test]
    fn rejects_invalid_utf8() {
        let result = read_rows(&[b'a', b'\n', 0xff, 0xfe], b',');
        assert!(matches!(result, Err(SyncError::Utf8(_))));
    }

    #[test]
    fn writes_export_header_and_quotes_when_needed() {
        let rows = vec![
            Row::new()
                .with(Column::FirstName, "Ann")
                .with(Column::LastName, "Lee")
                .with(Column::Company, "Acme, Inc."),
        ];

        let bytes = write_rows(&rows, b',').expect("writes");
        let text = String::from_utf8(bytes).expect("utf8");
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("first_name,last_name,middle_name,phone,email,company")
        );
        assert_eq!(lines.next(), Some("Ann,Lee,,,,\"Acme, Inc.\""));
    }

    #[test]
    fn written_file_reads_back() {
        let rows = vec![
            Row::new()
                .with(Column::FirstName, "Ann")
                .with(Column::MiddleName, "B")
                .with(Column::Phone, "+100")
                .with(Column::Company, "Acme"),
        ];

        let bytes = write_rows(&rows, b';').expect("writes");
        let parsed = read_rows(&bytes, b';').expect("reads");

        assert_eq!(parsed.len(), 1);
        for column in Column::ALL {
            assert_eq!(parsed[0].get(column), rows[0].get(column));
        }
    }
}
