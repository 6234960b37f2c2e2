//! Declarative request validators.
//!
//! Every request body has a JSON Schema under `schemas/`. They are embedded at
//! build time and compiled once on first use.

use jsonschema::JSONSchema;
use once_cell::sync::Lazy;
use serde_json::Value;
use std::collections::HashMap;

use crate::error::{ApiError, Result};

const SCHEMA_SOURCES: &[(&str, &str)] = &[
    ("login", include_str!("../schemas/login.json")),
    ("user.create", include_str!("../schemas/user.create.json")),
    ("user.update", include_str!("../schemas/user.update.json")),
    ("role.create", include_str!("../schemas/role.create.json")),
    ("role.update", include_str!("../schemas/role.update.json")),
    ("policy.create", include_str!("../schemas/policy.create.json")),
    ("policy.update", include_str!("../schemas/policy.update.json")),
    ("id_list", include_str!("../schemas/id_list.json")),
    ("tag_list", include_str!("../schemas/tag_list.json")),
    (
        "dimension_type.create",
        include_str!("../schemas/dimension_type.create.json"),
    ),
    (
        "dimension_type.update",
        include_str!("../schemas/dimension_type.update.json"),
    ),
    (
        "entity_type.create",
        include_str!("../schemas/entity_type.create.json"),
    ),
    (
        "entity_type.update",
        include_str!("../schemas/entity_type.update.json"),
    ),
    ("person.create", include_str!("../schemas/person.create.json")),
    ("person.update", include_str!("../schemas/person.update.json")),
    ("resource.create", include_str!("../schemas/resource.create.json")),
    ("resource.update", include_str!("../schemas/resource.update.json")),
    ("event.create", include_str!("../schemas/event.create.json")),
    ("event.update", include_str!("../schemas/event.update.json")),
    ("fact.create", include_str!("../schemas/fact.create.json")),
    ("fact.update", include_str!("../schemas/fact.update.json")),
    ("tag.create", include_str!("../schemas/tag.create.json")),
    ("tag.update", include_str!("../schemas/tag.update.json")),
    ("cohort.create", include_str!("../schemas/cohort.create.json")),
    ("cohort.update", include_str!("../schemas/cohort.update.json")),
    ("data_insert", include_str!("../schemas/data_insert.json")),
];

static VALIDATORS: Lazy<HashMap<&'static str, JSONSchema>> = Lazy::new(|| {
    SCHEMA_SOURCES
        .iter()
        .map(|(name, source)| {
            let schema: Value = serde_json::from_str(source)
                .unwrap_or_else(|e| panic!("schema '{name}' is not valid JSON: {e}"));
            // jsonschema 0.17 borrows the schema for compilation errors; leak it for 'static
            let schema: &'static Value = Box::leak(Box::new(schema));
            let compiled = JSONSchema::options()
                .compile(schema)
                .unwrap_or_else(|e| panic!("schema '{name}' does not compile: {e}"));
            (*name, compiled)
        })
        .collect()
});

pub fn schema_names() -> impl Iterator<Item = &'static str> {
    SCHEMA_SOURCES.iter().map(|(name, _)| *name)
}

/// Validate `instance` against the named schema, collecting every violation.
pub fn validate(schema: &str, instance: &Value) -> Result<()> {
    let validator = VALIDATORS
        .get(schema)
        .ok_or_else(|| ApiError::Internal(format!("no validator named '{schema}'")))?;

    validator.validate(instance).map_err(|errors| {
        ApiError::Validation(
            errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{path}: {e}")
                    }
                })
                .collect(),
        )
    })
}

/// Validate then deserialize a request body.
pub fn parse<T: serde::de::DeserializeOwned>(schema: &str, instance: Value) -> Result<T> {
    validate(schema, &instance)?;
    serde_json::from_value(instance).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Request bodies that declare their validator.
pub trait Validated: serde::de::DeserializeOwned {
    const SCHEMA: &'static str;
}
