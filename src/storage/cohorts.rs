use libsql::{Connection, Row};
use std::collections::{HashMap, HashSet};
use tracing::info;

use super::attributes::check_references;
use super::people::{load_all_people, load_person};
use super::{exists, query_all, query_one, DatabaseStorage};
use crate::domain::cohort::{CohortPatch, NewCohort};
use crate::domain::{new_id, now, Cohort, CohortMember, CohortRule, EntityKind, Page, TagPath};
use crate::error::{ApiError, Result};

const COHORT_COLUMNS: &str = "id, name, description, rule, created_at, updated_at";

fn map_cohort(row: &Row) -> Result<Cohort> {
    let rule: Option<String> = row.get(3)?;
    Ok(Cohort {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        rule: rule.map(|r| serde_json::from_str(&r)).transpose()?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn check_rule(rule: Option<&CohortRule>) -> Result<Option<String>> {
    let Some(rule) = rule else {
        return Ok(None);
    };
    let errors = rule.validate();
    if !errors.is_empty() {
        return Err(ApiError::Validation(
            errors.into_iter().map(|e| format!("rule: {e}")).collect(),
        ));
    }
    Ok(Some(serde_json::to_string(rule)?))
}

async fn load_cohort(conn: &Connection, id: &str) -> Result<Cohort> {
    query_one(
        conn,
        &format!("SELECT {COHORT_COLUMNS} FROM cohorts WHERE id = ?1"),
        [id],
        map_cohort,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("cohort", id))
}

async fn static_member_ids(conn: &Connection, cohort_id: &str) -> Result<Vec<String>> {
    query_all(
        conn,
        "SELECT person_id FROM cohort_members WHERE cohort_id = ?1",
        [cohort_id],
        |row| Ok(row.get::<String>(0)?),
    )
    .await
}

async fn insert_members(conn: &Connection, cohort_id: &str, person_ids: &[String]) -> Result<()> {
    let references: Vec<(String, &str)> = person_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (format!("person_ids/{i}"), id.as_str()))
        .collect();
    let references: Vec<(&str, EntityKind, Option<&str>)> = references
        .iter()
        .map(|(field, id)| (field.as_str(), EntityKind::Person, Some(*id)))
        .collect();
    check_references(conn, &references).await?;

    let added_at = now();
    for person_id in person_ids {
        conn.execute(
            "INSERT OR IGNORE INTO cohort_members (cohort_id, person_id, added_at) VALUES (?1, ?2, ?3)",
            libsql::params![cohort_id, person_id.as_str(), added_at.clone()],
        )
        .await?;
    }
    Ok(())
}

/// Point stored `tag` rules at a renamed tag. Runs inside the rename's transaction.
pub(super) async fn rename_rule_tags(
    conn: &Connection,
    from: &TagPath,
    to: &TagPath,
) -> Result<usize> {
    let cohorts = query_all(
        conn,
        &format!("SELECT {COHORT_COLUMNS} FROM cohorts WHERE rule IS NOT NULL"),
        (),
        map_cohort,
    )
    .await?;

    let mut rewritten = 0;
    for cohort in cohorts {
        let Some(mut rule) = cohort.rule else {
            continue;
        };
        if rule.rename_tag(from, to) {
            conn.execute(
                "UPDATE cohorts SET rule = ?2, updated_at = ?3 WHERE id = ?1",
                libsql::params![cohort.id.as_str(), serde_json::to_string(&rule)?, now()],
            )
            .await?;
            rewritten += 1;
        }
    }
    Ok(rewritten)
}

impl DatabaseStorage {
    pub async fn create_cohort(&self, input: NewCohort) -> Result<Cohort> {
        let rule = check_rule(input.rule.as_ref())?;
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let id = new_id();

        tx.execute(
            "INSERT INTO cohorts (id, name, description, rule, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            libsql::params![
                id.as_str(),
                input.name.as_str(),
                input.description,
                rule,
                now()
            ],
        )
        .await?;
        insert_members(&tx, &id, &input.person_ids).await?;

        let cohort = load_cohort(&tx, &id).await?;
        tx.commit().await?;

        info!(
            "Created cohort {} with {} static members",
            cohort.name,
            input.person_ids.len()
        );
        Ok(cohort)
    }

    pub async fn get_cohort(&self, id: &str) -> Result<Cohort> {
        let conn = self.conn().await?;
        load_cohort(&conn, id).await
    }

    pub async fn list_cohorts(&self, page: Page) -> Result<Vec<Cohort>> {
        let conn = self.conn().await?;
        query_all(
            &conn,
            &format!("SELECT {COHORT_COLUMNS} FROM cohorts ORDER BY name LIMIT ?1 OFFSET ?2"),
            libsql::params![page.limit(), page.offset()],
            map_cohort,
        )
        .await
    }

    pub async fn update_cohort(&self, id: &str, patch: CohortPatch) -> Result<Cohort> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        load_cohort(&tx, id).await?;

        if let Some(rule) = &patch.rule {
            let encoded = check_rule(rule.as_ref())?;
            tx.execute(
                "UPDATE cohorts SET rule = ?2 WHERE id = ?1",
                libsql::params![id, encoded],
            )
            .await?;
        }

        tx.execute(
            "UPDATE cohorts SET
                name = COALESCE(?2, name),
                description = COALESCE(?3, description),
                updated_at = ?4
             WHERE id = ?1",
            libsql::params![id, patch.name, patch.description, now()],
        )
        .await?;

        let cohort = load_cohort(&tx, id).await?;
        tx.commit().await?;
        Ok(cohort)
    }

    pub async fn delete_cohort(&self, id: &str) -> Result<()> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM cohorts WHERE id = ?1", [id])
            .await?;
        if deleted == 0 {
            return Err(ApiError::not_found("cohort", id));
        }
        info!("Deleted cohort {}", id);
        Ok(())
    }

    pub async fn add_cohort_member(&self, cohort_id: &str, person_id: &str) -> Result<()> {
        let conn = self.conn().await?;
        load_cohort(&conn, cohort_id).await?;
        if !exists(&conn, "SELECT 1 FROM people WHERE id = ?1", [person_id]).await? {
            return Err(ApiError::not_found("person", person_id));
        }
        conn.execute(
            "INSERT OR IGNORE INTO cohort_members (cohort_id, person_id, added_at) VALUES (?1, ?2, ?3)",
            libsql::params![cohort_id, person_id, now()],
        )
        .await?;
        Ok(())
    }

    pub async fn remove_cohort_member(&self, cohort_id: &str, person_id: &str) -> Result<()> {
        let conn = self.conn().await?;
        load_cohort(&conn, cohort_id).await?;
        let removed = conn
            .execute(
                "DELETE FROM cohort_members WHERE cohort_id = ?1 AND person_id = ?2",
                [cohort_id, person_id],
            )
            .await?;
        if removed == 0 {
            return Err(ApiError::NotFound(format!(
                "person '{person_id}' in cohort '{cohort_id}'"
            )));
        }
        Ok(())
    }

    pub async fn replace_cohort_members(
        &self,
        cohort_id: &str,
        person_ids: Vec<String>,
    ) -> Result<Vec<CohortMember>> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        load_cohort(&tx, cohort_id).await?;
        tx.execute(
            "DELETE FROM cohort_members WHERE cohort_id = ?1",
            [cohort_id],
        )
        .await?;
        insert_members(&tx, cohort_id, &person_ids).await?;
        tx.commit().await?;

        self.cohort_members(cohort_id).await
    }

    /// Static members plus everyone the rule currently matches.
    pub async fn cohort_members(&self, cohort_id: &str) -> Result<Vec<CohortMember>> {
        let conn = self.conn().await?;
        let cohort = load_cohort(&conn, cohort_id).await?;
        let static_ids: HashSet<String> = static_member_ids(&conn, cohort_id)
            .await?
            .into_iter()
            .collect();

        let Some(rule) = cohort.rule else {
            let mut members = Vec::with_capacity(static_ids.len());
            for id in &static_ids {
                members.push(CohortMember {
                    person: load_person(&conn, id).await?,
                    static_member: true,
                    matched_rule: false,
                });
            }
            members.sort_by(|a, b| {
                (&a.person.name, &a.person.id).cmp(&(&b.person.name, &b.person.id))
            });
            return Ok(members);
        };

        let type_names: HashMap<String, String> = self
            .entity_type_names(EntityKind::Person)
            .await?
            .into_iter()
            .collect();

        let members = load_all_people(&conn)
            .await?
            .into_iter()
            .filter_map(|person| {
                let type_name = person
                    .type_id
                    .as_ref()
                    .and_then(|t| type_names.get(t))
                    .map(String::as_str);
                let matched_rule = rule.matches(&person, type_name);
                let static_member = static_ids.contains(&person.id);
                (matched_rule || static_member).then_some(CohortMember {
                    person,
                    static_member,
                    matched_rule,
                })
            })
            .collect();
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::dimension::NewEntityType;
    use crate::domain::record::NewPerson;
    use crate::storage::test_support::test_storage;
    use serde_json::json;

    async fn person(storage: &DatabaseStorage, name: &str, tags: &[&str]) -> String {
        storage
            .create_person(NewPerson {
                name: name.into(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }

    fn rule(value: serde_json::Value) -> Option<CohortRule> {
        Some(serde_json::from_value(value).unwrap())
    }

    #[tokio::test]
    async fn members_combine_static_and_rule() {
        let (storage, _dir) = test_storage().await;
        let ada = person(&storage, "Ada", &["conditions/diabetes/type-2"]).await;
        let grace = person(&storage, "Grace", &[]).await;
        person(&storage, "Alan", &["conditions/asthma"]).await;

        let cohort = storage
            .create_cohort(NewCohort {
                name: "diabetes".into(),
                description: None,
                rule: rule(json!({"tag": "conditions/diabetes"})),
                person_ids: vec![grace.clone(), ada.clone()],
            })
            .await
            .unwrap();

        let members = storage.cohort_members(&cohort.id).await.unwrap();
        let summary: Vec<(&str, bool, bool)> = members
            .iter()
            .map(|m| (m.person.name.as_str(), m.static_member, m.matched_rule))
            .collect();
        assert_eq!(
            summary,
            vec![("Ada", true, true), ("Grace", true, false)]
        );

        storage.remove_cohort_member(&cohort.id, &ada).await.unwrap();
        let members = storage.cohort_members(&cohort.id).await.unwrap();
        assert!(members
            .iter()
            .any(|m| m.person.id == ada && !m.static_member && m.matched_rule));
    }

    #[tokio::test]
    async fn type_rules_use_entity_type_names() {
        let (storage, _dir) = test_storage().await;
        let participant = storage
            .create_entity_type(NewEntityType {
                kind: EntityKind::Person,
                name: "participant".into(),
                description: None,
                dimensions: vec![],
            })
            .await
            .unwrap();
        storage
            .create_person(NewPerson {
                name: "Ada".into(),
                type_id: Some(participant.id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        person(&storage, "Grace", &[]).await;

        let cohort = storage
            .create_cohort(NewCohort {
                name: "participants".into(),
                description: None,
                rule: rule(json!({"type": "participant"})),
                person_ids: vec![],
            })
            .await
            .unwrap();
        let members = storage.cohort_members(&cohort.id).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].person.name, "Ada");
    }

    #[tokio::test]
    async fn static_only_cohort_and_replace() {
        let (storage, _dir) = test_storage().await;
        let ada = person(&storage, "Ada", &[]).await;
        let grace = person(&storage, "Grace", &[]).await;

        let cohort = storage
            .create_cohort(NewCohort {
                name: "pilot".into(),
                description: Some("hand picked".into()),
                rule: None,
                person_ids: vec![],
            })
            .await
            .unwrap();
        storage.add_cohort_member(&cohort.id, &ada).await.unwrap();
        // Adding twice is a no-op
        storage.add_cohort_member(&cohort.id, &ada).await.unwrap();
        assert_eq!(storage.cohort_members(&cohort.id).await.unwrap().len(), 1);

        let replaced = storage
            .replace_cohort_members(&cohort.id, vec![grace.clone()])
            .await
            .unwrap();
        assert_eq!(replaced.len(), 1);
        assert_eq!(replaced[0].person.id, grace);

        let err = storage
            .replace_cohort_members(&cohort.id, vec!["ghost".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        // Failed replacement keeps the previous members
        assert_eq!(storage.cohort_members(&cohort.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_can_clear_rule() {
        let (storage, _dir) = test_storage().await;
        let cohort = storage
            .create_cohort(NewCohort {
                name: "everyone".into(),
                description: None,
                rule: rule(json!({"all": []})),
                person_ids: vec![],
            })
            .await
            .unwrap();
        assert!(cohort.rule.is_some());

        let renamed = storage
            .update_cohort(
                &cohort.id,
                CohortPatch {
                    name: Some("all people".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(renamed.name, "all people");
        assert!(renamed.rule.is_some());

        let cleared = storage
            .update_cohort(
                &cohort.id,
                CohortPatch {
                    rule: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(cleared.rule.is_none());
    }

    #[tokio::test]
    async fn failed_update_keeps_rule() {
        let (storage, _dir) = test_storage().await;
        let cohort = storage
            .create_cohort(NewCohort {
                name: "everyone".into(),
                description: None,
                rule: rule(json!({"all": []})),
                person_ids: vec![],
            })
            .await
            .unwrap();
        storage
            .create_cohort(NewCohort {
                name: "pilot".into(),
                description: None,
                rule: None,
                person_ids: vec![],
            })
            .await
            .unwrap();

        let err = storage
            .update_cohort(
                &cohort.id,
                CohortPatch {
                    name: Some("pilot".into()),
                    rule: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let unchanged = storage.get_cohort(&cohort.id).await.unwrap();
        assert_eq!(unchanged.name, "everyone");
        assert!(unchanged.rule.is_some());
    }

    #[tokio::test]
    async fn invalid_rule_is_rejected() {
        let (storage, _dir) = test_storage().await;
        let err = storage
            .create_cohort(NewCohort {
                name: "bad".into(),
                description: None,
                rule: rule(json!({"dimension": {"key": "age", "op": "gt"}})),
                person_ids: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
