use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use super::record::Person;
use super::tag::{path_is_within, TagPath};

const MAX_RULE_DEPTH: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cohort {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub rule: Option<CohortRule>,
    pub created_at: String,
    pub updated_at: String,
}

/// Membership predicate over a person.
///
/// Serialized externally tagged, e.g.
/// `{"all": [{"tag": "conditions/diabetes"}, {"dimension": {"key": "age", "op": "gte", "value": 65}}]}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum CohortRule {
    All(Vec<CohortRule>),
    Any(Vec<CohortRule>),
    Not(Box<CohortRule>),
    /// Person carries this tag or one below it. Renaming a tag rewrites
    /// the paths in stored rules.
    Tag(String),
    /// Person's entity type has this name.
    Type(String),
    Dimension(DimensionPredicate),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DimensionPredicate {
    pub key: String,
    pub op: Comparison,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Exists,
}

impl CohortRule {
    /// Structural problems that deserialization alone does not catch.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        self.validate_at(0, &mut errors);
        errors
    }

    fn validate_at(&self, depth: usize, errors: &mut Vec<String>) {
        if depth > MAX_RULE_DEPTH {
            errors.push(format!("rule is nested deeper than {MAX_RULE_DEPTH} levels"));
            return;
        }
        match self {
            CohortRule::All(rules) | CohortRule::Any(rules) => {
                for rule in rules {
                    rule.validate_at(depth + 1, errors);
                }
            }
            CohortRule::Not(rule) => rule.validate_at(depth + 1, errors),
            CohortRule::Tag(path) => {
                if let Err(e) = TagPath::parse(path) {
                    errors.push(e);
                }
            }
            CohortRule::Type(name) => {
                if name.trim().is_empty() {
                    errors.push("type rule needs a type name".to_string());
                }
            }
            CohortRule::Dimension(predicate) => {
                if predicate.op != Comparison::Exists && predicate.value.is_none() {
                    errors.push(format!(
                        "dimension rule on '{}' needs a value for '{:?}'",
                        predicate.key, predicate.op
                    ));
                }
            }
        }
    }

    /// Move `tag` rules at or below `from` to the same place under `to`.
    /// Returns true when any path changed.
    pub fn rename_tag(&mut self, from: &TagPath, to: &TagPath) -> bool {
        match self {
            CohortRule::All(rules) | CohortRule::Any(rules) => rules
                .iter_mut()
                .fold(false, |changed, rule| rule.rename_tag(from, to) | changed),
            CohortRule::Not(rule) => rule.rename_tag(from, to),
            CohortRule::Tag(path) => match TagPath::parse(path) {
                Ok(current) if current.is_within(from) => {
                    let current = current.to_string();
                    let suffix = &current[from.to_string().len()..];
                    *path = format!("{to}{suffix}");
                    true
                }
                _ => false,
            },
            CohortRule::Type(_) | CohortRule::Dimension(_) => false,
        }
    }

    pub fn matches(&self, person: &Person, type_name: Option<&str>) -> bool {
        match self {
            CohortRule::All(rules) => rules.iter().all(|r| r.matches(person, type_name)),
            CohortRule::Any(rules) => rules.iter().any(|r| r.matches(person, type_name)),
            CohortRule::Not(rule) => !rule.matches(person, type_name),
            CohortRule::Tag(path) => match TagPath::parse(path) {
                Ok(wanted) => {
                    let wanted = wanted.to_string();
                    person.tags.iter().any(|t| path_is_within(t, &wanted))
                }
                Err(_) => false,
            },
            CohortRule::Type(name) => type_name == Some(name.as_str()),
            CohortRule::Dimension(predicate) => predicate.matches(person),
        }
    }
}

impl DimensionPredicate {
    fn matches(&self, person: &Person) -> bool {
        let actual = person.dimensions.get(&self.key);
        match (self.op, actual, self.value.as_ref()) {
            (Comparison::Exists, actual, _) => actual.is_some(),
            (Comparison::Ne, None, _) => true,
            (_, None, _) | (_, _, None) => false,
            (op, Some(actual), Some(expected)) => compare(op, actual, expected),
        }
    }
}

fn compare(op: Comparison, actual: &Value, expected: &Value) -> bool {
    match op {
        Comparison::Eq => values_equal(actual, expected),
        Comparison::Ne => !values_equal(actual, expected),
        Comparison::Gt => order(actual, expected) == Some(Ordering::Greater),
        Comparison::Gte => matches!(
            order(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Comparison::Lt => order(actual, expected) == Some(Ordering::Less),
        Comparison::Lte => matches!(
            order(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Comparison::Contains => match (actual, expected) {
            (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
            (Value::Array(items), needle) => items.iter().any(|i| values_equal(i, needle)),
            _ => false,
        },
        Comparison::Exists => true,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn order(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// A resolved cohort member and how they got there.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CohortMember {
    pub person: Person,
    #[serde(rename = "static")]
    pub static_member: bool,
    pub matched_rule: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCohort {
    pub name: String,
    pub description: Option<String>,
    pub rule: Option<CohortRule>,
    #[serde(default)]
    pub person_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CohortPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    /// `null` clears the rule; absent leaves it untouched.
    #[serde(default, deserialize_with = "double_option")]
    pub rule: Option<Option<CohortRule>>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn person(tags: &[&str], dimensions: Value) -> Person {
        let dimensions: BTreeMap<String, Value> = serde_json::from_value(dimensions).unwrap();
        Person {
            id: "p1".into(),
            type_id: Some("t1".into()),
            name: "Ada".into(),
            external_id: None,
            email: None,
            birth_date: None,
            dimensions,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn rule(value: Value) -> CohortRule {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn rules_deserialize_from_tagged_json() {
        let parsed = rule(json!({
            "all": [
                {"tag": "conditions/diabetes"},
                {"not": {"type": "staff"}},
                {"dimension": {"key": "age", "op": "gte", "value": 65}}
            ]
        }));
        let CohortRule::All(children) = &parsed else {
            panic!("expected all");
        };
        assert_eq!(children.len(), 3);
        assert!(parsed.validate().is_empty());
    }

    #[test]
    fn tag_rule_includes_descendants() {
        let p = person(&["conditions/diabetes/type-2"], json!({}));
        assert!(rule(json!({"tag": "conditions/diabetes"})).matches(&p, None));
        assert!(rule(json!({"tag": "Conditions"})).matches(&p, None));
        assert!(!rule(json!({"tag": "conditions/diab"})).matches(&p, None));
    }

    #[test]
    fn rename_tag_moves_matching_paths_only() {
        let from = TagPath::parse("conditions/cardio").unwrap();
        let to = TagPath::parse("conditions/heart").unwrap();
        let mut renamed = rule(json!({
            "any": [
                {"tag": "Conditions/Cardio"},
                {"not": {"tag": "conditions/cardio/hypertension"}},
                {"tag": "conditions/cardiology"},
                {"type": "participant"}
            ]
        }));

        assert!(renamed.rename_tag(&from, &to));
        assert_eq!(
            renamed,
            rule(json!({
                "any": [
                    {"tag": "conditions/heart"},
                    {"not": {"tag": "conditions/heart/hypertension"}},
                    {"tag": "conditions/cardiology"},
                    {"type": "participant"}
                ]
            }))
        );
        assert!(!renamed.rename_tag(&from, &to));
    }

    #[test]
    fn dimension_comparisons() {
        let p = person(
            &[],
            json!({"age": 70, "visit": "2024-03-01", "meds": ["metformin"], "name": "Ada L"}),
        );
        let check = |r: Value| rule(r).matches(&p, None);

        assert!(check(json!({"dimension": {"key": "age", "op": "gte", "value": 65}})));
        assert!(check(json!({"dimension": {"key": "age", "op": "eq", "value": 70.0}})));
        assert!(!check(json!({"dimension": {"key": "age", "op": "lt", "value": 65}})));
        assert!(check(json!({"dimension": {"key": "visit", "op": "gt", "value": "2024-01-15"}})));
        assert!(check(json!({"dimension": {"key": "meds", "op": "contains", "value": "metformin"}})));
        assert!(check(json!({"dimension": {"key": "name", "op": "contains", "value": "Ada"}})));
        assert!(check(json!({"dimension": {"key": "age", "op": "exists"}})));
        assert!(!check(json!({"dimension": {"key": "bmi", "op": "exists"}})));
    }

    #[test]
    fn missing_or_mismatched_values_only_satisfy_ne() {
        let p = person(&[], json!({"age": 70}));
        let check = |r: Value| rule(r).matches(&p, None);

        assert!(!check(json!({"dimension": {"key": "bmi", "op": "eq", "value": 20}})));
        assert!(check(json!({"dimension": {"key": "bmi", "op": "ne", "value": 20}})));
        assert!(!check(json!({"dimension": {"key": "age", "op": "gt", "value": "60"}})));
        assert!(check(json!({"dimension": {"key": "age", "op": "ne", "value": "70"}})));
    }

    #[test]
    fn empty_groups() {
        let p = person(&[], json!({}));
        assert!(rule(json!({"all": []})).matches(&p, None));
        assert!(!rule(json!({"any": []})).matches(&p, None));
    }

    #[test]
    fn type_rule_matches_type_name() {
        let p = person(&[], json!({}));
        assert!(rule(json!({"type": "patient"})).matches(&p, Some("patient")));
        assert!(!rule(json!({"type": "patient"})).matches(&p, None));
    }

    #[test]
    fn validate_reports_bad_tags_and_missing_values() {
        let errors = rule(json!({
            "any": [
                {"tag": "bad path!"},
                {"dimension": {"key": "age", "op": "gt"}}
            ]
        }))
        .validate();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn patch_distinguishes_null_from_absent() {
        let cleared: CohortPatch = serde_json::from_value(json!({"rule": null})).unwrap();
        assert_eq!(cleared.rule, Some(None));

        let untouched: CohortPatch = serde_json::from_value(json!({"name": "x"})).unwrap();
        assert_eq!(untouched.rule, None);
    }
}
