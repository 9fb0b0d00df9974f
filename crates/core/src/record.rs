//! Job-posting records and their identity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::RecordError;

/// Fixed field list of a job posting, in export column order.
///
/// The crawl source projects raw postings onto these fields and the CSV export
/// writes them as its header. The pipeline core itself places no schema on
/// records beyond the unique key field.
pub const JOB_FIELDS: &[&str] = &[
    "slug",
    "language",
    "req_id",
    "title",
    "description",
    "street_address",
    "city",
    "state",
    "country_code",
    "postal_code",
    "location_type",
    "latitude",
    "longitude",
    "categories",
    "tags",
    "tags5",
    "tags6",
    "brand",
    "promotion_value",
    "salary_currency",
    "salary_value",
    "salary_min_value",
    "salary_max_value",
    "benefits",
    "employment_type",
    "hiring_organization",
    "source",
    "apply_url",
    "internal",
    "searchable",
    "applyable",
    "li_easy_applyable",
    "ats_code",
    "meta_data",
    "update_date",
    "create_date",
    "category",
    "full_location",
    "short_location",
];

/// A mapping of named fields to scalar, list or nested-mapping values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, JsonValue>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(fields: Map<String, JsonValue>) -> Self {
        Self(fields)
    }

    /// Build a record from an arbitrary JSON value.
    pub fn from_value(value: JsonValue) -> Result<Self, RecordError> {
        match value {
            JsonValue::Object(fields) => Ok(Self(fields)),
            other => Err(RecordError::NotAnObject(json_type_name(&other))),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&JsonValue> {
        self.0.get(field)
    }

    pub fn fields(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, JsonValue> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Extract the unique key from `field`.
    ///
    /// Non-empty strings are used verbatim; numbers and booleans use their
    /// JSON text. Missing, null, empty-string, list and map values have no key.
    pub fn key(&self, field: &str) -> Option<RecordKey> {
        match self.0.get(field)? {
            JsonValue::String(s) if !s.is_empty() => Some(RecordKey(s.clone())),
            JsonValue::Number(n) => Some(RecordKey(n.to_string())),
            JsonValue::Bool(b) => Some(RecordKey(b.to_string())),
            _ => None,
        }
    }

    /// Like [`Record::key`], but reports a missing key as a [`RecordError`].
    pub fn require_key(&self, field: &str) -> Result<RecordKey, RecordError> {
        self.key(field)
            .ok_or_else(|| RecordError::MissingKey(field.to_string()))
    }

    /// Keep only the listed fields (exact-match projection).
    pub fn project(&self, fields: &[String]) -> Record {
        let projected = fields
            .iter()
            .filter_map(|f| self.0.get(f).map(|v| (f.clone(), v.clone())))
            .collect();
        Record(projected)
    }

    /// True if every field in `filter` is present here with an equal value.
    pub fn matches(&self, filter: &Record) -> bool {
        filter
            .0
            .iter()
            .all(|(field, expected)| self.0.get(field) == Some(expected))
    }
}

impl From<Map<String, JsonValue>> for Record {
    fn from(value: Map<String, JsonValue>) -> Self {
        Self(value)
    }
}

impl From<Record> for JsonValue {
    fn from(value: Record) -> Self {
        JsonValue::Object(value.0)
    }
}

/// Identity of a record for both deduplication and storage uniqueness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
