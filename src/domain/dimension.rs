use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use super::EntityKind;

/// Storage type of a dimension value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    Datetime,
    Json,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::String => "string",
            DataType::Integer => "integer",
            DataType::Number => "number",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Datetime => "datetime",
            DataType::Json => "json",
        }
    }

    /// Check a value against this type and return its normalized form.
    ///
    /// Dates come back as `YYYY-MM-DD`, datetimes as RFC 3339 in UTC.
    pub fn check(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return Err("null is not allowed".to_string());
        }

        match self {
            DataType::String if value.is_string() => Ok(value.clone()),
            DataType::Integer if value.is_i64() || value.is_u64() => Ok(value.clone()),
            DataType::Number if value.is_number() => Ok(value.clone()),
            DataType::Boolean if value.is_boolean() => Ok(value.clone()),
            DataType::Date => {
                let raw = value.as_str().ok_or("expected a date string")?;
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                    .map_err(|_| format!("'{raw}' is not a YYYY-MM-DD date"))
            }
            DataType::Datetime => {
                let raw = value.as_str().ok_or("expected a datetime string")?;
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| {
                        Value::String(
                            dt.with_timezone(&Utc)
                                .to_rfc3339_opts(SecondsFormat::AutoSi, true),
                        )
                    })
                    .map_err(|_| format!("'{raw}' is not an RFC 3339 datetime"))
            }
            DataType::Json => Ok(value.clone()),
            other => Err(format!("expected {}", other.as_str())),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(DataType::String),
            "integer" => Ok(DataType::Integer),
            "number" => Ok(DataType::Number),
            "boolean" => Ok(DataType::Boolean),
            "date" => Ok(DataType::Date),
            "datetime" => Ok(DataType::Datetime),
            "json" => Ok(DataType::Json),
            other => Err(format!("unknown data type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DimensionType {
    pub id: String,
    /// Key under which values appear in a record's `dimensions` map.
    pub name: String,
    pub label: Option<String>,
    pub data_type: DataType,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One dimension declared by an entity type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchemaField {
    pub dimension_type_id: String,
    pub name: String,
    pub required: bool,
}

/// A `person_type`, `resource_type`, `event_type` or `fact_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntityType {
    pub id: String,
    pub kind: EntityKind,
    pub name: String,
    pub description: Option<String>,
    pub dimensions: Vec<SchemaField>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDimensionType {
    pub name: String,
    pub label: Option<String>,
    pub data_type: DataType,
    pub unit: Option<String>,
    pub description: Option<String>,
}

/// Name and data type are fixed once values exist; only presentation changes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DimensionTypePatch {
    pub label: Option<String>,
    pub unit: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub dimension_type_id: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewEntityType {
    pub kind: EntityKind,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub dimensions: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntityTypePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub dimensions: Option<Vec<FieldSpec>>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct EntityTypeFilter {
    pub kind: Option<EntityKind>,
}

pub type TypeSchema = [SchemaField];

/// Check a record's dimension map against the known dimension types and,
/// when the record is typed, against its type's schema.
///
/// Returns the resolved dimension types paired with normalized values, or
/// every violation found.
pub fn check_dimensions(
    schema: Option<&TypeSchema>,
    known: &HashMap<String, DimensionType>,
    values: &BTreeMap<String, Value>,
) -> Result<Vec<(DimensionType, Value)>, Vec<String>> {
    let mut errors = Vec::new();
    let mut resolved = Vec::with_capacity(values.len());

    for (key, value) in values {
        let Some(dimension) = known.get(key) else {
            errors.push(format!("{key}: unknown dimension"));
            continue;
        };

        if let Some(fields) = schema {
            if !fields.iter().any(|f| f.name == *key) {
                errors.push(format!("{key}: not declared by the record's type"));
                continue;
            }
        }

        match dimension.data_type.check(value) {
            Ok(normalized) => resolved.push((dimension.clone(), normalized)),
            Err(e) => errors.push(format!("{key}: {e}")),
        }
    }

    if let Some(fields) = schema {
        for field in fields.iter().filter(|f| f.required) {
            if !values.contains_key(&field.name) {
                errors.push(format!("{}: required by the record's type", field.name));
            }
        }
    }

    if errors.is_empty() {
        Ok(resolved)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dimension(name: &str, data_type: DataType) -> DimensionType {
        DimensionType {
            id: format!("dt-{name}"),
            name: name.to_string(),
            label: None,
            data_type,
            unit: None,
            description: None,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    fn known() -> HashMap<String, DimensionType> {
        [
            dimension("age", DataType::Integer),
            dimension("weight", DataType::Number),
            dimension("smoker", DataType::Boolean),
            dimension("diagnosed_on", DataType::Date),
            dimension("notes", DataType::String),
        ]
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect()
    }

    fn field(name: &str, required: bool) -> SchemaField {
        SchemaField {
            dimension_type_id: format!("dt-{name}"),
            name: name.to_string(),
            required,
        }
    }

    #[test]
    fn integer_rejects_fractions_but_number_accepts_integers() {
        assert!(DataType::Integer.check(&json!(3)).is_ok());
        assert!(DataType::Integer.check(&json!(3.5)).is_err());
        assert!(DataType::Number.check(&json!(3)).is_ok());
        assert!(DataType::Number.check(&json!("3")).is_err());
    }

    #[test]
    fn null_is_never_a_value() {
        for data_type in [DataType::String, DataType::Json, DataType::Boolean] {
            assert!(data_type.check(&Value::Null).is_err());
        }
    }

    #[test]
    fn dates_and_datetimes_are_normalized() {
        assert_eq!(
            DataType::Date.check(&json!("2024-02-29")).unwrap(),
            json!("2024-02-29")
        );
        assert!(DataType::Date.check(&json!("2023-02-29")).is_err());
        assert!(DataType::Date.check(&json!(20240229)).is_err());

        assert_eq!(
            DataType::Datetime
                .check(&json!("2024-03-01T10:00:00+02:00"))
                .unwrap(),
            json!("2024-03-01T08:00:00Z")
        );
        assert!(DataType::Datetime.check(&json!("yesterday")).is_err());
    }

    #[test]
    fn untyped_records_accept_any_known_dimension() {
        let values = BTreeMap::from([
            ("age".to_string(), json!(42)),
            ("smoker".to_string(), json!(false)),
        ]);
        let resolved = check_dimensions(None, &known(), &values).unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn unknown_keys_and_bad_values_are_all_reported() {
        let values = BTreeMap::from([
            ("age".to_string(), json!("forty")),
            ("height".to_string(), json!(180)),
        ]);
        let errors = check_dimensions(None, &known(), &values).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.starts_with("height: unknown")));
        assert!(errors.iter().any(|e| e.starts_with("age: expected integer")));
    }

    #[test]
    fn typed_records_follow_their_schema() {
        let schema = vec![field("age", true), field("weight", false)];

        let missing_required = BTreeMap::from([("weight".to_string(), json!(70.5))]);
        let errors = check_dimensions(Some(schema.as_slice()), &known(), &missing_required).unwrap_err();
        assert_eq!(errors, vec!["age: required by the record's type".to_string()]);

        let undeclared = BTreeMap::from([
            ("age".to_string(), json!(30)),
            ("smoker".to_string(), json!(true)),
        ]);
        let errors = check_dimensions(Some(schema.as_slice()), &known(), &undeclared).unwrap_err();
        assert_eq!(
            errors,
            vec!["smoker: not declared by the record's type".to_string()]
        );

        let ok = BTreeMap::from([("age".to_string(), json!(30))]);
        assert!(check_dimensions(Some(schema.as_slice()), &known(), &ok).is_ok());
    }
}
