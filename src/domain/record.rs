use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub type Dimensions = BTreeMap<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Person {
    pub id: String,
    pub type_id: Option<String>,
    pub name: String,
    pub external_id: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<String>,
    pub dimensions: Dimensions,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub id: String,
    pub type_id: Option<String>,
    pub name: String,
    pub uri: Option<String>,
    pub description: Option<String>,
    pub dimensions: Dimensions,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub type_id: Option<String>,
    pub name: String,
    pub starts_at: String,
    pub ends_at: Option<String>,
    pub person_id: Option<String>,
    pub resource_id: Option<String>,
    pub dimensions: Dimensions,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fact {
    pub id: String,
    pub type_id: Option<String>,
    pub observed_at: String,
    pub person_id: Option<String>,
    pub resource_id: Option<String>,
    pub event_id: Option<String>,
    pub note: Option<String>,
    pub dimensions: Dimensions,
    pub tags: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewPerson {
    pub type_id: Option<String>,
    pub name: String,
    pub external_id: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonPatch {
    pub type_id: Option<String>,
    pub name: Option<String>,
    pub external_id: Option<String>,
    pub email: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub dimensions: Option<Dimensions>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewResource {
    pub type_id: Option<String>,
    pub name: String,
    pub uri: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcePatch {
    pub type_id: Option<String>,
    pub name: Option<String>,
    pub uri: Option<String>,
    pub description: Option<String>,
    pub dimensions: Option<Dimensions>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub type_id: Option<String>,
    pub name: String,
    pub starts_at: DateTime<chrono::FixedOffset>,
    pub ends_at: Option<DateTime<chrono::FixedOffset>>,
    pub person_id: Option<String>,
    pub resource_id: Option<String>,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPatch {
    pub type_id: Option<String>,
    pub name: Option<String>,
    pub starts_at: Option<DateTime<chrono::FixedOffset>>,
    pub ends_at: Option<DateTime<chrono::FixedOffset>>,
    pub person_id: Option<String>,
    pub resource_id: Option<String>,
    pub dimensions: Option<Dimensions>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFact {
    pub type_id: Option<String>,
    pub observed_at: DateTime<chrono::FixedOffset>,
    pub person_id: Option<String>,
    pub resource_id: Option<String>,
    pub event_id: Option<String>,
    pub note: Option<String>,
    #[serde(default)]
    pub dimensions: Dimensions,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactPatch {
    pub type_id: Option<String>,
    pub observed_at: Option<DateTime<chrono::FixedOffset>>,
    pub person_id: Option<String>,
    pub resource_id: Option<String>,
    pub event_id: Option<String>,
    pub note: Option<String>,
    pub dimensions: Option<Dimensions>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersonFilter {
    pub type_id: Option<String>,
    pub tag: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceFilter {
    pub type_id: Option<String>,
    pub tag: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventFilter {
    pub type_id: Option<String>,
    pub person_id: Option<String>,
    pub resource_id: Option<String>,
    pub from: Option<DateTime<chrono::FixedOffset>>,
    pub to: Option<DateTime<chrono::FixedOffset>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactFilter {
    pub type_id: Option<String>,
    pub person_id: Option<String>,
    pub resource_id: Option<String>,
    pub event_id: Option<String>,
    pub from: Option<DateTime<chrono::FixedOffset>>,
    pub to: Option<DateTime<chrono::FixedOffset>>,
}
