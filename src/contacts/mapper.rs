//! Translation between file rows and the CRM contact schema.

use super::row::{Column, Row};
use crate::crm::RemoteId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;

pub const CONTACT_ADD: &str = "crm.contact.add";
pub const CONTACT_LIST: &str = "crm.contact.list";
pub const CONTACT_DELETE: &str = "crm.contact.delete";
pub const CONTACT_COMPANY_ADD: &str = "crm.contact.company.add";
pub const COMPANY_LIST: &str = "crm.company.list";

/// Fields selected when exporting contacts.
pub const EXPORT_SELECT: [&str; 8] = [
    "ID",
    "NAME",
    "SECOND_NAME",
    "LAST_NAME",
    "PHONE",
    "EMAIL",
    "COMPANY_ID",
    "DATE_CREATE",
];

const WORK: &str = "WORK";

/// Typed multi-value entry (`PHONE`, `EMAIL`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiField {
    #[serde(rename = "VALUE", default)]
    pub value: String,
    #[serde(rename = "VALUE_TYPE", default)]
    pub value_type: String,
}

impl MultiField {
    fn work(value: &str) -> Self {
        Self {
            value: value.to_string(),
            value_type: WORK.to_string(),
        }
    }
}

/// Contact fields in the CRM's schema, built from one [`Row`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContactFields {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "SECOND_NAME")]
    pub second_name: String,
    #[serde(rename = "LAST_NAME")]
    pub last_name: String,
    #[serde(rename = "PHONE", skip_serializing_if = "Vec::is_empty")]
    pub phone: Vec<MultiField>,
    #[serde(rename = "EMAIL", skip_serializing_if = "Vec::is_empty")]
    pub email: Vec<MultiField>,
}

impl ContactFields {
    pub fn from_row(row: &Row) -> Self {
        let phone = row.get(Column::Phone);
        let email = row.get(Column::Email);

        Self {
            name: row.get(Column::FirstName).to_string(),
            second_name: row.get(Column::MiddleName).to_string(),
            last_name: row.get(Column::LastName).to_string(),
            phone: if phone.is_empty() {
                Vec::new()
            } else {
                vec![MultiField::work(phone)]
            },
            email: if email.is_empty() {
                Vec::new()
            } else {
                vec![MultiField::work(email)]
            },
        }
    }

    /// Params for `crm.contact.add`.
    pub fn to_add_params(&self) -> Value {
        json!({ "fields": self })
    }
}

/// Params for `crm.contact.company.add`, making the company primary.
pub fn link_params(contact_id: &RemoteId, company_id: &RemoteId) -> Value {
    json!({
        "id": contact_id.as_str(),
        "fields": {
            "COMPANY_ID": company_id.as_str(),
            "IS_PRIMARY": "Y",
        }
    })
}

/// Params for looking a company up by its exact title.
pub fn company_lookup_params(title: &str) -> Value {
    json!({
        "filter": { "TITLE": title },
        "select": ["ID", "TITLE"],
    })
}

fn optional_id<'de, D>(deserializer: D) -> Result<Option<RemoteId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(RemoteId::from_value))
}

/// Contact record as returned by `crm.contact.list`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteContact {
    #[serde(rename = "ID")]
    pub id: RemoteId,
    #[serde(rename = "NAME", default)]
    pub name: Option<String>,
    #[serde(rename = "SECOND_NAME", default)]
    pub second_name: Option<String>,
    #[serde(rename = "LAST_NAME", default)]
    pub last_name: Option<String>,
    #[serde(rename = "PHONE", default)]
    pub phone: Option<Vec<MultiField>>,
    #[serde(rename = "EMAIL", default)]
    pub email: Option<Vec<MultiField>>,
    #[serde(rename = "COMPANY_ID", default, deserialize_with = "optional_id")]
    pub company_id: Option<RemoteId>,
    #[serde(rename = "DATE_CREATE", default)]
    pub date_create: Option<String>,
}

fn first_value(values: &Option<Vec<MultiField>>) -> &str {
    values
        .as_ref()
        .and_then(|values| values.first())
        .map(|field| field.value.as_str())
        .unwrap_or("")
}

impl RemoteContact {
    /// Flatten into a file row, replacing the company id with its title.
    /// Unknown or unresolved companies become an empty cell.
    pub fn to_row(&self, company_titles: &HashMap<RemoteId, String>) -> Row {
        let company = self
            .company_id
            .as_ref()
            .and_then(|id| company_titles.get(id))
            .map(String::as_str)
            .unwrap_or("");

        Row::new()
            .with(Column::FirstName, self.name.as_deref().unwrap_or(""))
            .with(Column::MiddleName, self.second_name.as_deref().unwrap_or(""))
            .with(Column::LastName, self.last_name.as_deref().unwrap_or(""))
            .with(Column::Phone, first_value(&self.phone))
            .with(Column::Email, first_value(&self.email))
            .with(Column::Company, company)
    }
}

/// Company record as returned by `crm.company.list` with `ID`/`TITLE`.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCompany {
    #[serde(rename = "ID")]
    pub id: RemoteId,
    #[serde(rename = "TITLE", default)]
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_maps_to_contact_fields() {
        let row = Row::new()
            .with(Column::FirstName, "Ann")
            .with(Column::MiddleName, "B.")
            .with(Column::LastName, "Lee")
            .with(Column::Phone, "+100")
            .with(Column::Company, "Acme");

        let fields = ContactFields::from_row(&row);
        let params = fields.to_add_params();

        assert_eq!(params["fields"]["NAME"], "Ann");
        assert_eq!(params["fields"]["SECOND_NAME"], "B.");
        assert_eq!(params["fields"]["LAST_NAME"], "Lee");
        assert_eq!(
            params["fields"]["PHONE"],
            json!([{"VALUE": "+100", "VALUE_TYPE": "WORK"}])
        );
        assert!(params["fields"].get("EMAIL").is_none());
        assert!(params["fields"].get("COMPANY_ID").is_none());
    }

    #[test]
    fn remote_contact_flattens_to_row() {
        let contact: RemoteContact = serde_json::from_value(json!({
            "ID": "12",
            "NAME": "Ann",
            "SECOND_NAME": null,
            "LAST_NAME": "Lee",
            "PHONE": [
                {"ID": "1", "VALUE": "+100", "VALUE_TYPE": "WORK"},
                {"ID": "2", "VALUE": "+200", "VALUE_TYPE": "HOME"}
            ],
            "COMPANY_ID": "7",
            "DATE_CREATE": "2024-05-01T10:00:00+03:00"
        }))
        .expect("contact decodes");

        let titles = HashMap::from([(RemoteId::new("7"), "Acme".to_string())]);
        let row = contact.to_row(&titles);

        assert_eq!(row.get(Column::FirstName), "Ann");
        assert_eq!(row.get(Column::MiddleName), "");
        assert_eq!(row.get(Column::Phone), "+100");
        assert_eq!(row.get(Column::Email), "");
        assert_eq!(row.get(Column::Company), "Acme");
    }

    #[test]
    fn zero_company_id_means_no_company() {
        let contact: RemoteContact =
            serde_json::from_value(json!({"ID": 3, "COMPANY_ID": "0"})).expect("decodes");
        assert_eq!(contact.company_id, None);
        assert_eq!(contact.to_row(&HashMap::new()).get(Column::Company), "");
    }
}
