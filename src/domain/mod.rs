//! Domain data shapes and the pure rules that govern them.
//!
//! Nothing in here touches the database; storage and HTTP layers call into
//! these types to check dimension values, parse tag paths, evaluate cohort
//! rules and match capabilities.

pub mod auth;
pub mod cohort;
pub mod dimension;
pub mod record;
pub mod tag;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use auth::{Capability, Policy, Role, User};
pub use cohort::{Cohort, CohortMember, CohortRule};
pub use dimension::{DataType, DimensionType, EntityType, SchemaField, TypeSchema};
pub use record::{Event, Fact, Person, Resource};
pub use tag::{Tag, TagPath};

/// The four record kinds that carry an entity type, dimensions and tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Person,
    Resource,
    Event,
    Fact,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Person,
        EntityKind::Resource,
        EntityKind::Event,
        EntityKind::Fact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Person => "person",
            EntityKind::Resource => "resource",
            EntityKind::Event => "event",
            EntityKind::Fact => "fact",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Person => "people",
            EntityKind::Resource => "resources",
            EntityKind::Event => "events",
            EntityKind::Fact => "facts",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "person" => Ok(EntityKind::Person),
            "resource" => Ok(EntityKind::Resource),
            "event" => Ok(EntityKind::Event),
            "fact" => Ok(EntityKind::Fact),
            other => Err(format!("unknown entity kind '{other}'")),
        }
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 500;

/// `limit`/`offset` pagination shared by every list endpoint.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Page {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Page {
    pub fn limit(&self) -> i64 {
        i64::from(self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE))
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.offset.unwrap_or(0))
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current time as an RFC 3339 UTC string, the storage format for timestamps.
pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Storage form of a client-supplied timestamp; same layout as [`now`] so
/// stored values order correctly as strings.
pub fn timestamp(value: &DateTime<FixedOffset>) -> String {
    value
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}
