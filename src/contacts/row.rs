use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fixed column vocabulary of a contact file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    FirstName,
    MiddleName,
    LastName,
    Phone,
    Email,
    Company,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::FirstName,
        Column::MiddleName,
        Column::LastName,
        Column::Phone,
        Column::Email,
        Column::Company,
    ];

    /// Header order used when writing files.
    pub const EXPORT_ORDER: [Column; 6] = [
        Column::FirstName,
        Column::LastName,
        Column::MiddleName,
        Column::Phone,
        Column::Email,
        Column::Company,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Column::FirstName => "first_name",
            Column::MiddleName => "middle_name",
            Column::LastName => "last_name",
            Column::Phone => "phone",
            Column::Email => "email",
            Column::Company => "company",
        }
    }

    /// Match a file header, accepting the canonical names and the localized
    /// headers written by older exports. Case and surrounding whitespace are
    /// ignored.
    pub fn from_header(header: &str) -> Option<Column> {
        let normalized = header.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "first_name" | "firstname" | "name" | "имя" => Some(Column::FirstName),
            "middle_name" | "middlename" | "second_name" | "отчество" => Some(Column::MiddleName),
            "last_name" | "lastname" | "surname" | "фамилия" => Some(Column::LastName),
            "phone" | "phone_number" | "номер_телефона" | "телефон" => Some(Column::Phone),
            "email" | "e_mail" | "почта" => Some(Column::Email),
            "company" | "company_name" | "компания" => Some(Column::Company),
            _ => None,
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One contact line of a file. Values are stored trimmed; absent columns
/// read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    values: BTreeMap<Column, String>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter used while a row is being assembled.
    pub fn with(mut self, column: Column, value: impl AsRef<str>) -> Self {
        self.values
            .insert(column, value.as_ref().trim().to_string());
        self
    }

    pub fn get(&self, column: Column) -> &str {
        self.values.get(&column).map(String::as_str).unwrap_or("")
    }

    /// Trimmed company name, `None` when blank.
    pub fn company(&self) -> Option<&str> {
        Some(self.get(Column::Company)).filter(|name| !name.is_empty())
    }

    pub fn is_blank(&self) -> bool {
        self.values.values().all(|value| value.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Column, &str)> {
        self.values
            .iter()
            .map(|(column, value)| (*column, value.as_str()))
    }
}
