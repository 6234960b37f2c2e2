use jsonschema::JSONSchema;
use serde_json::{json, Value};

use cohort_api::domain::cohort::{CohortRule, NewCohort};
use cohort_api::storage::BulkInsert;
use cohort_api::validation;

fn compile(schema: &str) -> JSONSchema {
    let schema_json: Value = serde_json::from_str(schema).unwrap();
    let schema_static: &'static Value = Box::leak(Box::new(schema_json));
    JSONSchema::options().compile(schema_static).unwrap()
}

#[test]
fn bulk_insert_example_is_valid() {
    let compiled = compile(include_str!("../schemas/data_insert.json"));
    let instance: Value =
        serde_json::from_str(include_str!("resources/data_insert.json")).unwrap();
    assert!(compiled.is_valid(&instance));

    let batch: BulkInsert = validation::parse("data_insert", instance).unwrap();
    assert_eq!(batch.people.len(), 1);
    assert_eq!(batch.facts.len(), 1);
}

#[test]
fn empty_bulk_insert_is_rejected() {
    let compiled = compile(include_str!("../schemas/data_insert.json"));
    assert!(!compiled.is_valid(&json!({})));
    assert!(!compiled.is_valid(&json!({"cohorts": []})));
}

#[test]
fn cohort_example_parses_into_a_rule() {
    let instance: Value =
        serde_json::from_str(include_str!("resources/cohort_create.json")).unwrap();
    let cohort: NewCohort = validation::parse("cohort.create", instance).unwrap();

    let Some(CohortRule::All(clauses)) = cohort.rule else {
        panic!("expected an `all` rule");
    };
    assert_eq!(clauses.len(), 3);
    assert!(matches!(clauses[0], CohortRule::Any(_)));
}

#[test]
fn cohort_rule_has_one_operator() {
    let compiled = compile(include_str!("../schemas/cohort.create.json"));
    let mut instance: Value =
        serde_json::from_str(include_str!("resources/cohort_create.json")).unwrap();
    instance["rule"]["any"] = json!([]);
    assert!(!compiled.is_valid(&instance), "two operators in one rule node");
}

#[test]
fn cohort_update_accepts_null_rule() {
    let compiled = compile(include_str!("../schemas/cohort.update.json"));
    assert!(compiled.is_valid(&json!({"rule": null})));
    assert!(!compiled.is_valid(&json!({"person_ids": []})));
}

#[test]
fn event_times_must_be_timestamps() {
    let compiled = compile(include_str!("../schemas/event.create.json"));
    assert!(compiled.is_valid(&json!({"name": "Visit", "starts_at": "2024-01-08T09:00:00Z"})));
    assert!(!compiled.is_valid(&json!({"name": "Visit", "starts_at": "next tuesday"})));
    assert!(!compiled.is_valid(&json!({"name": "Visit"})));
}

#[test]
fn every_registered_schema_has_a_title_matching_its_name() {
    let sources = [
        ("person.create", include_str!("../schemas/person.create.json")),
        ("tag.create", include_str!("../schemas/tag.create.json")),
        ("data_insert", include_str!("../schemas/data_insert.json")),
    ];
    for (name, source) in sources {
        let schema: Value = serde_json::from_str(source).unwrap();
        assert_eq!(schema["title"], name);
        assert!(validation::schema_names().any(|n| n == name));
    }
}
