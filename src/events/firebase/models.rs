use indexmap::IndexMap;
use serde::Deserialize;

/// A single event record as stored in the database. The record key is not part of the body.
#[derive(Debug, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"))]
pub struct EventRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub is_featured: bool,
}

/// The records of a collection.
///
/// The database returns an object keyed by record id. Collections whose keys are all small
/// integers come back as an array instead, with `null` holes for missing keys.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Records {
    Keyed(IndexMap<String, EventRecord>),
    Indexed(Vec<Option<EventRecord>>),
}

impl Records {
    /// Pairs each record with its key, in response order.
    pub fn into_keyed(self) -> Vec<(String, EventRecord)> {
        match self {
            Records::Keyed(records) => records.into_iter().collect(),
            Records::Indexed(records) => records
                .into_iter()
                .enumerate()
                .filter_map(|(index, record)| record.map(|record| (index.to_string(), record)))
                .collect(),
        }
    }
}
