use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// One product entry: an open-ended field map. Required fields are checked by
/// the validator; every other field is carried through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Returns the field as text when it is a JSON string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(field.into(), value.into())
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.get_str("id")
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub missing_fields: Vec<String>,
}

impl ValidationOutcome {
    pub fn from_missing(missing_fields: Vec<String>) -> Self {
        Self {
            is_valid: missing_fields.is_empty(),
            missing_fields,
        }
    }
}

/// A record that failed validation, tagged with the fields it lacks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvalidRecord {
    #[serde(flatten)]
    pub record: Record,
    #[serde(rename = "missingFields")]
    pub missing_fields: Vec<String>,
}

/// Output of one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportResult {
    pub valid_records: Vec<Record>,
    pub invalid_records: Vec<InvalidRecord>,
    pub valid_path: PathBuf,
    pub invalid_path: PathBuf,
}

impl ExportResult {
    pub fn valid_count(&self) -> usize {
        self.valid_records.len()
    }

    pub fn invalid_count(&self) -> usize {
        self.invalid_records.len()
    }
}

/// A queued request to run the export pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub timestamp: DateTime<Utc>,
    pub triggered_by: String,
    pub product_id: Option<String>,
}

impl Job {
    pub fn new(triggered_by: impl Into<String>, product_id: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            triggered_by: triggered_by.into(),
            product_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub queue_length: usize,
    pub is_processing: bool,
    pub server_time: DateTime<Utc>,
}

/// JSON envelope shared by every HTTP endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub message: String,
    pub queue_position: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CsvResponse {
    pub valid_products_count: usize,
    pub invalid_products_count: usize,
    pub valid_csv_url: String,
    pub invalid_csv_url: String,
    pub invalid_products: Vec<InvalidRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequiredFieldsResponse {
    pub required_fields: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileDetails {
    pub name: String,
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilesResponse {
    pub files: Vec<FileDetails>,
}

/// Body of the catalog's product listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductsResponse {
    pub count: usize,
    pub data: Vec<Record>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}
