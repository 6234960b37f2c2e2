//! Demo data for local development, loaded by `cohort_api seed`.

use chrono::{Duration, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use tracing::info;

use super::{exists, DatabaseStorage};
use crate::domain::dimension::{FieldSpec, NewDimensionType, NewEntityType};
use crate::domain::record::{NewFact, NewPerson};
use crate::domain::tag::NewTag;
use crate::domain::{DataType, EntityKind};
use crate::error::Result;

const PARTICIPANT_TYPE: &str = "participant";

const FIRST_NAMES: &[&str] = &[
    "Ada", "Grace", "Alan", "Edsger", "Barbara", "Donald", "Frances", "John", "Katherine",
    "Margaret", "Niklaus", "Radia", "Tim", "Hedy", "Claude",
];
const LAST_NAMES: &[&str] = &[
    "Lovelace", "Hopper", "Turing", "Dijkstra", "Liskov", "Knuth", "Allen", "Backus", "Johnson",
    "Hamilton", "Wirth", "Perlman", "Lee", "Lamarr", "Shannon",
];
const ARMS: &[&str] = &["study/arm-a", "study/arm-b", "study/control"];
const SITES: &[&str] = &["sites/oslo", "sites/lisbon", "sites/toronto"];

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SeedSummary {
    pub dimension_types: usize,
    pub entity_types: usize,
    pub tags: usize,
    pub people: usize,
    pub facts: usize,
}

impl DatabaseStorage {
    /// Insert `people` random participants with a few blood pressure readings
    /// each. Does nothing when the demo types already exist.
    pub async fn seed_demo_data(&self, people: usize) -> Result<SeedSummary> {
        let conn = self.conn().await?;
        if exists(
            &conn,
            "SELECT 1 FROM entity_types WHERE kind = 'person' AND name = ?1",
            [PARTICIPANT_TYPE],
        )
        .await?
        {
            info!("Demo data already present, skipping seed");
            return Ok(SeedSummary::default());
        }

        let mut summary = SeedSummary::default();

        let dimension = |name: &str, data_type: DataType, unit: Option<&str>| NewDimensionType {
            name: name.to_string(),
            label: None,
            data_type,
            unit: unit.map(str::to_string),
            description: None,
        };
        let enrolled_on = self
            .create_dimension_type(dimension("enrolled_on", DataType::Date, None))
            .await?;
        let height = self
            .create_dimension_type(dimension("height", DataType::Number, Some("cm")))
            .await?;
        let systolic = self
            .create_dimension_type(dimension("systolic", DataType::Integer, Some("mmHg")))
            .await?;
        let diastolic = self
            .create_dimension_type(dimension("diastolic", DataType::Integer, Some("mmHg")))
            .await?;
        summary.dimension_types = 4;

        let participant = self
            .create_entity_type(NewEntityType {
                kind: EntityKind::Person,
                name: PARTICIPANT_TYPE.to_string(),
                description: Some("Enrolled study participant".to_string()),
                dimensions: vec![
                    FieldSpec {
                        dimension_type_id: enrolled_on.id.clone(),
                        required: true,
                    },
                    FieldSpec {
                        dimension_type_id: height.id.clone(),
                        required: false,
                    },
                ],
            })
            .await?;
        let blood_pressure = self
            .create_entity_type(NewEntityType {
                kind: EntityKind::Fact,
                name: "blood_pressure".to_string(),
                description: None,
                dimensions: vec![
                    FieldSpec {
                        dimension_type_id: systolic.id.clone(),
                        required: true,
                    },
                    FieldSpec {
                        dimension_type_id: diastolic.id.clone(),
                        required: true,
                    },
                ],
            })
            .await?;
        summary.entity_types = 2;

        for path in ARMS.iter().chain(SITES) {
            self.create_tag(NewTag {
                path: path.to_string(),
                description: None,
            })
            .await?;
        }
        summary.tags = ARMS.len() + SITES.len();

        for i in 0..people {
            // rand's thread-local rng is not Send; keep it out of scope across awaits
            let (name, arm, site, enrolled, height_cm) = {
                let mut rng = rand::thread_rng();
                let name = format!(
                    "{} {}",
                    FIRST_NAMES.choose(&mut rng).copied().unwrap_or("Ada"),
                    LAST_NAMES.choose(&mut rng).copied().unwrap_or("Lovelace")
                );
                let arm = ARMS.choose(&mut rng).copied().unwrap_or(ARMS[0]);
                let site = SITES.choose(&mut rng).copied().unwrap_or(SITES[0]);
                let enrolled = Utc::now().date_naive() - Duration::days(rng.gen_range(0..365));
                let height_cm = (rng.gen_range(150.0..200.0_f64) * 10.0).round() / 10.0;
                (name, arm, site, enrolled, height_cm)
            };

            let mut input = NewPerson {
                type_id: Some(participant.id.clone()),
                name,
                external_id: Some(format!("P-{:04}", i + 1)),
                tags: vec![arm.to_string(), site.to_string()],
                ..Default::default()
            };
            input
                .dimensions
                .insert("enrolled_on".into(), json!(enrolled.to_string()));
            input.dimensions.insert("height".into(), json!(height_cm));
            let person = self.create_person(input).await?;
            summary.people += 1;

            let readings: Vec<(i64, i64, i64)> = {
                let mut rng = rand::thread_rng();
                (0..rng.gen_range(1..=4))
                    .map(|_| {
                        (
                            rng.gen_range(1..90),
                            rng.gen_range(100..160),
                            rng.gen_range(60..100),
                        )
                    })
                    .collect()
            };
            for (days_ago, sys, dia) in readings {
                let mut fact = NewFact {
                    type_id: Some(blood_pressure.id.clone()),
                    observed_at: (Utc::now() - Duration::days(days_ago)).into(),
                    person_id: Some(person.id.clone()),
                    resource_id: None,
                    event_id: None,
                    note: None,
                    dimensions: Default::default(),
                    tags: Vec::new(),
                };
                fact.dimensions.insert("systolic".into(), json!(sys));
                fact.dimensions.insert("diastolic".into(), json!(dia));
                self.create_fact(fact).await?;
                summary.facts += 1;
            }
        }

        info!(
            "Seeded {} people and {} facts",
            summary.people, summary.facts
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::PersonFilter;
    use crate::domain::Page;
    use crate::storage::test_support::test_storage;

    #[tokio::test]
    async fn seed_populates_once() {
        let (storage, _dir) = test_storage().await;
        let summary = storage.seed_demo_data(5).await.unwrap();
        assert_eq!(summary.people, 5);
        assert!(summary.facts >= 5);
        assert_eq!(summary.tags, 6);

        let people = storage
            .list_people(
                PersonFilter {
                    tag: Some("study".into()),
                    ..Default::default()
                },
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(people.len(), 5);
        assert!(people.iter().all(|p| p.dimensions.contains_key("enrolled_on")));

        assert_eq!(
            storage.seed_demo_data(5).await.unwrap(),
            SeedSummary::default()
        );
    }
}
