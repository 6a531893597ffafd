//! Extracted record types

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Value of one extracted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Single(String),
    Multiple(Vec<String>),
}

impl FieldValue {
    /// Individual lines of the value: list items, or the lines of a string.
    pub fn lines(&self) -> Vec<&str> {
        match self {
            FieldValue::Single(text) => text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .collect(),
            FieldValue::Multiple(items) => items
                .iter()
                .map(String::as_str)
                .filter(|item| !item.is_empty())
                .collect(),
        }
    }

    /// Flat text used in CSV cells.
    pub fn joined(&self) -> String {
        match self {
            FieldValue::Single(text) => text.clone(),
            FieldValue::Multiple(items) => items.join(", "),
        }
    }
}

/// Fields extracted from one detail page, tagged with the page URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedRecord {
    pub url: String,
    fields: Vec<(String, FieldValue)>,
}

impl ExtractedRecord {
    pub fn new(url: impl Into<String>, fields: Vec<(String, FieldValue)>) -> Self {
        Self {
            url: url.into(),
            fields,
        }
    }

    /// Value of the field called `name`.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Fields in mapping order, without the url.
    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }
}

/// `{"url": ..., "<field>": ...}` with fields in extraction order.
impl Serialize for ExtractedRecord {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("url", &self.url)?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
