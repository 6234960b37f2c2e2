//! Users, roles, policies and login sessions.

use chrono::{Duration, SecondsFormat, Utc};
use libsql::{Connection, Row};
use tracing::{info, warn};

use super::{count, exists, query_all, query_one, DatabaseStorage};
use crate::domain::auth::{
    generate_token, hash_password, hash_token, normalize_email, verify_password, Capability,
    NewPolicy, NewRole, NewUser, PolicyPatch, RolePatch, Session, UserPatch, SUPERUSER,
};
use crate::domain::{new_id, now, Page, Policy, Role, User};
use crate::error::{ApiError, Result};
use crate::metrics;

const USER_COLUMNS: &str = "id, email, name, active, created_at, updated_at";
const ROLE_COLUMNS: &str = "id, name, description, created_at, updated_at";
const POLICY_COLUMNS: &str = "id, name, description, capabilities, created_at, updated_at";

pub const ADMIN_ROLE: &str = "admin";
pub const SUPERUSER_POLICY: &str = "superuser";

fn map_user(row: &Row) -> Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        active: row.get::<i64>(3)? != 0,
        role_ids: Vec::new(),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn map_role(row: &Row) -> Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        policy_ids: Vec::new(),
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn map_policy(row: &Row) -> Result<Policy> {
    let capabilities: String = row.get(3)?;
    Ok(Policy {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        capabilities: serde_json::from_str(&capabilities)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn encode_capabilities(capabilities: &[String]) -> Result<String> {
    let errors: Vec<String> = capabilities
        .iter()
        .enumerate()
        .filter(|(_, c)| Capability::parse(c).is_none())
        .map(|(i, c)| format!("capabilities/{i}: '{c}' is not resource:action"))
        .collect();
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }
    Ok(serde_json::to_string(capabilities)?)
}

async fn load_user(conn: &Connection, id: &str) -> Result<User> {
    let mut user = query_one(
        conn,
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        [id],
        map_user,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("user", id))?;
    user.role_ids = query_all(
        conn,
        "SELECT role_id FROM user_roles WHERE user_id = ?1 ORDER BY role_id",
        [id],
        |row| Ok(row.get::<String>(0)?),
    )
    .await?;
    Ok(user)
}

async fn load_role(conn: &Connection, id: &str) -> Result<Role> {
    let mut role = query_one(
        conn,
        &format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?1"),
        [id],
        map_role,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("role", id))?;
    role.policy_ids = query_all(
        conn,
        "SELECT policy_id FROM role_policies WHERE role_id = ?1 ORDER BY policy_id",
        [id],
        |row| Ok(row.get::<String>(0)?),
    )
    .await?;
    Ok(role)
}

async fn load_policy(conn: &Connection, id: &str) -> Result<Policy> {
    query_one(
        conn,
        &format!("SELECT {POLICY_COLUMNS} FROM policies WHERE id = ?1"),
        [id],
        map_policy,
    )
    .await?
    .ok_or_else(|| ApiError::not_found("policy", id))
}

/// Replace a link table's rows for `owner_id`, rejecting ids missing from `target_table`.
async fn replace_links(
    conn: &Connection,
    link_table: &str,
    owner_column: &str,
    target_column: &str,
    target_table: &str,
    owner_id: &str,
    target_ids: &[String],
) -> Result<()> {
    let mut errors = Vec::new();
    for (i, target_id) in target_ids.iter().enumerate() {
        let sql = format!("SELECT 1 FROM {target_table} WHERE id = ?1");
        if !exists(conn, &sql, [target_id.as_str()]).await? {
            errors.push(format!("{i}: unknown {target_column} '{target_id}'"));
        }
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    conn.execute(
        &format!("DELETE FROM {link_table} WHERE {owner_column} = ?1"),
        [owner_id],
    )
    .await?;
    for target_id in target_ids {
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {link_table} ({owner_column}, {target_column}) VALUES (?1, ?2)"
            ),
            [owner_id, target_id.as_str()],
        )
        .await?;
    }
    Ok(())
}

async fn insert_user(conn: &Connection, input: &NewUser) -> Result<String> {
    let id = new_id();
    conn.execute(
        "INSERT INTO users (id, email, name, password_hash, active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        libsql::params![
            id.as_str(),
            normalize_email(&input.email),
            input.name.as_str(),
            hash_password(&input.password),
            i64::from(input.active),
            now()
        ],
    )
    .await?;
    replace_links(
        conn,
        "user_roles",
        "user_id",
        "role_id",
        "roles",
        &id,
        &input.role_ids,
    )
    .await?;
    Ok(id)
}

impl DatabaseStorage {
    // Users

    pub async fn create_user(&self, input: NewUser) -> Result<User> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let id = insert_user(&tx, &input).await?;
        let user = load_user(&tx, &id).await?;
        tx.commit().await?;

        info!("Created user {}", user.email);
        Ok(user)
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        let conn = self.conn().await?;
        load_user(&conn, id).await
    }

    pub async fn list_users(&self, page: Page) -> Result<Vec<User>> {
        let conn = self.conn().await?;
        let ids = query_all(
            &conn,
            "SELECT id FROM users ORDER BY email LIMIT ?1 OFFSET ?2",
            libsql::params![page.limit(), page.offset()],
            |row| Ok(row.get::<String>(0)?),
        )
        .await?;
        let mut users = Vec::with_capacity(ids.len());
        for id in ids {
            users.push(load_user(&conn, &id).await?);
        }
        Ok(users)
    }

    /// Deactivating a user or changing their password ends their sessions.
    pub async fn update_user(&self, id: &str, patch: UserPatch) -> Result<User> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        load_user(&tx, id).await?;

        tx.execute(
            "UPDATE users SET
                email = COALESCE(?2, email),
                name = COALESCE(?3, name),
                password_hash = COALESCE(?4, password_hash),
                active = COALESCE(?5, active),
                updated_at = ?6
             WHERE id = ?1",
            libsql::params![
                id,
                patch.email.as_deref().map(normalize_email),
                patch.name,
                patch.password.as_deref().map(hash_password),
                patch.active.map(i64::from),
                now()
            ],
        )
        .await?;

        if patch.password.is_some() || patch.active == Some(false) {
            tx.execute("DELETE FROM sessions WHERE user_id = ?1", [id])
                .await?;
        }

        let user = load_user(&tx, id).await?;
        tx.commit().await?;
        Ok(user)
    }

    pub async fn delete_user(&self, id: &str) -> Result<()> {
        let conn = self.conn().await?;
        let deleted = conn.execute("DELETE FROM users WHERE id = ?1", [id]).await?;
        if deleted == 0 {
            return Err(ApiError::not_found("user", id));
        }
        info!("Deleted user {}", id);
        Ok(())
    }

    pub async fn set_user_roles(&self, id: &str, role_ids: Vec<String>) -> Result<User> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        load_user(&tx, id).await?;
        replace_links(&tx, "user_roles", "user_id", "role_id", "roles", id, &role_ids).await?;
        let user = load_user(&tx, id).await?;
        tx.commit().await?;
        Ok(user)
    }

    pub async fn user_roles(&self, user_id: &str) -> Result<Vec<Role>> {
        let conn = self.conn().await?;
        let ids = query_all(
            &conn,
            "SELECT r.id FROM roles r JOIN user_roles ur ON ur.role_id = r.id
             WHERE ur.user_id = ?1 ORDER BY r.name",
            [user_id],
            |row| Ok(row.get::<String>(0)?),
        )
        .await?;
        let mut roles = Vec::with_capacity(ids.len());
        for id in ids {
            roles.push(load_role(&conn, &id).await?);
        }
        Ok(roles)
    }

    /// Union of the capabilities of every policy reachable through the user's roles.
    pub async fn user_capabilities(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self.conn().await?;
        let encoded = query_all(
            &conn,
            "SELECT DISTINCT p.capabilities FROM policies p
             JOIN role_policies rp ON rp.policy_id = p.id
             JOIN user_roles ur ON ur.role_id = rp.role_id
             WHERE ur.user_id = ?1",
            [user_id],
            |row| Ok(row.get::<String>(0)?),
        )
        .await?;

        let mut capabilities = Vec::new();
        for raw in encoded {
            capabilities.extend(serde_json::from_str::<Vec<String>>(&raw)?);
        }
        capabilities.sort();
        capabilities.dedup();
        Ok(capabilities)
    }

    // Roles

    pub async fn create_role(&self, input: NewRole) -> Result<Role> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let id = new_id();
        tx.execute(
            "INSERT INTO roles (id, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            libsql::params![id.as_str(), input.name.as_str(), input.description, now()],
        )
        .await?;
        replace_links(
            &tx,
            "role_policies",
            "role_id",
            "policy_id",
            "policies",
            &id,
            &input.policy_ids,
        )
        .await?;
        let role = load_role(&tx, &id).await?;
        tx.commit().await?;

        info!("Created role {}", role.name);
        Ok(role)
    }

    pub async fn get_role(&self, id: &str) -> Result<Role> {
        let conn = self.conn().await?;
        load_role(&conn, id).await
    }

    pub async fn list_roles(&self, page: Page) -> Result<Vec<Role>> {
        let conn = self.conn().await?;
        let ids = query_all(
            &conn,
            "SELECT id FROM roles ORDER BY name LIMIT ?1 OFFSET ?2",
            libsql::params![page.limit(), page.offset()],
            |row| Ok(row.get::<String>(0)?),
        )
        .await?;
        let mut roles = Vec::with_capacity(ids.len());
        for id in ids {
            roles.push(load_role(&conn, &id).await?);
        }
        Ok(roles)
    }

    pub async fn update_role(&self, id: &str, patch: RolePatch) -> Result<Role> {
        let conn = self.conn().await?;
        load_role(&conn, id).await?;
        conn.execute(
            "UPDATE roles SET
                name = COALESCE(?2, name),
                description = COALESCE(?3, description),
                updated_at = ?4
             WHERE id = ?1",
            libsql::params![id, patch.name, patch.description, now()],
        )
        .await?;
        load_role(&conn, id).await
    }

    pub async fn delete_role(&self, id: &str) -> Result<()> {
        let conn = self.conn().await?;
        let deleted = conn.execute("DELETE FROM roles WHERE id = ?1", [id]).await?;
        if deleted == 0 {
            return Err(ApiError::not_found("role", id));
        }
        info!("Deleted role {}", id);
        Ok(())
    }

    pub async fn set_role_policies(&self, id: &str, policy_ids: Vec<String>) -> Result<Role> {
        let conn = self.conn().await?;
        let tx = conn.transaction().await?;
        load_role(&tx, id).await?;
        replace_links(
            &tx,
            "role_policies",
            "role_id",
            "policy_id",
            "policies",
            id,
            &policy_ids,
        )
        .await?;
        let role = load_role(&tx, id).await?;
        tx.commit().await?;
        Ok(role)
    }

    // Policies

    pub async fn create_policy(&self, input: NewPolicy) -> Result<Policy> {
        let capabilities = encode_capabilities(&input.capabilities)?;
        let conn = self.conn().await?;
        let id = new_id();
        conn.execute(
            "INSERT INTO policies (id, name, description, capabilities, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            libsql::params![
                id.as_str(),
                input.name.as_str(),
                input.description,
                capabilities,
                now()
            ],
        )
        .await?;

        info!("Created policy {} {:?}", input.name, input.capabilities);
        load_policy(&conn, &id).await
    }

    pub async fn get_policy(&self, id: &str) -> Result<Policy> {
        let conn = self.conn().await?;
        load_policy(&conn, id).await
    }

    pub async fn list_policies(&self, page: Page) -> Result<Vec<Policy>> {
        let conn = self.conn().await?;
        query_all(
            &conn,
            &format!("SELECT {POLICY_COLUMNS} FROM policies ORDER BY name LIMIT ?1 OFFSET ?2"),
            libsql::params![page.limit(), page.offset()],
            map_policy,
        )
        .await
    }

    pub async fn update_policy(&self, id: &str, patch: PolicyPatch) -> Result<Policy> {
        let capabilities = patch
            .capabilities
            .as_deref()
            .map(encode_capabilities)
            .transpose()?;
        let conn = self.conn().await?;
        load_policy(&conn, id).await?;
        conn.execute(
            "UPDATE policies SET
                name = COALESCE(?2, name),
                description = COALESCE(?3, description),
                capabilities = COALESCE(?4, capabilities),
                updated_at = ?5
             WHERE id = ?1",
            libsql::params![id, patch.name, patch.description, capabilities, now()],
        )
        .await?;
        load_policy(&conn, id).await
    }

    pub async fn delete_policy(&self, id: &str) -> Result<()> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute("DELETE FROM policies WHERE id = ?1", [id])
            .await?;
        if deleted == 0 {
            return Err(ApiError::not_found("policy", id));
        }
        info!("Deleted policy {}", id);
        Ok(())
    }

    // Sessions

    /// Check credentials. Unknown emails, wrong passwords and inactive users
    /// are indistinguishable to the caller.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let conn = self.conn().await?;
        let email = normalize_email(email);
        let found = query_one(
            &conn,
            "SELECT id, password_hash, active FROM users WHERE email = ?1",
            [email.as_str()],
            |row| {
                Ok((
                    row.get::<String>(0)?,
                    row.get::<String>(1)?,
                    row.get::<i64>(2)? != 0,
                ))
            },
        )
        .await?;

        match found {
            Some((id, hash, true)) if verify_password(password, &hash) => {
                metrics::record_login(true);
                load_user(&conn, &id).await
            }
            _ => {
                metrics::record_login(false);
                warn!("Failed login for {}", email);
                Err(ApiError::Unauthorized)
            }
        }
    }

    pub async fn create_session(&self, user: User, ttl_hours: i64) -> Result<Session> {
        let token = generate_token();
        let created_at = now();
        let expires_at = Duration::try_hours(ttl_hours)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl))
            .ok_or_else(|| {
                ApiError::Config(format!(
                    "Session lifetime of {ttl_hours} hours is out of range"
                ))
            })?
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            libsql::params![
                hash_token(&token),
                user.id.as_str(),
                created_at,
                expires_at.as_str()
            ],
        )
        .await?;

        Ok(Session {
            token,
            expires_at,
            user,
        })
    }

    /// The active user owning an unexpired session for `token`.
    pub async fn session_user(&self, token: &str) -> Result<Option<User>> {
        let conn = self.conn().await?;
        let user_id = query_one(
            &conn,
            "SELECT s.user_id FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token_hash = ?1 AND s.expires_at > ?2 AND u.active = 1",
            libsql::params![hash_token(token), now()],
            |row| Ok(row.get::<String>(0)?),
        )
        .await?;

        match user_id {
            Some(id) => Ok(Some(load_user(&conn, &id).await?)),
            None => Ok(None),
        }
    }

    pub async fn revoke_session(&self, token: &str) -> Result<()> {
        let conn = self.conn().await?;
        conn.execute(
            "DELETE FROM sessions WHERE token_hash = ?1",
            [hash_token(token)],
        )
        .await?;
        Ok(())
    }

    pub async fn purge_expired_sessions(&self) -> Result<u64> {
        let conn = self.conn().await?;
        let purged = conn
            .execute("DELETE FROM sessions WHERE expires_at <= ?1", [now()])
            .await?;
        if purged > 0 {
            info!("Purged {} expired sessions", purged);
        }
        Ok(purged)
    }

    /// On an empty user table, create the `admin` role with a `*` policy and
    /// an admin user holding it. Returns the user when one was created.
    pub async fn bootstrap_admin(&self, email: &str, password: &str) -> Result<Option<User>> {
        let conn = self.conn().await?;
        if count(&conn, "SELECT COUNT(*) FROM users", ()).await? > 0 {
            return Ok(None);
        }

        let tx = conn.transaction().await?;
        let timestamp = now();

        let policy_id = match query_one(
            &tx,
            "SELECT id FROM policies WHERE name = ?1",
            [SUPERUSER_POLICY],
            |row| Ok(row.get::<String>(0)?),
        )
        .await?
        {
            Some(id) => id,
            None => {
                let id = new_id();
                tx.execute(
                    "INSERT INTO policies (id, name, description, capabilities, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    libsql::params![
                        id.as_str(),
                        SUPERUSER_POLICY,
                        "Every capability",
                        encode_capabilities(&[SUPERUSER.to_string()])?,
                        timestamp.as_str()
                    ],
                )
                .await?;
                id
            }
        };

        let role_id = match query_one(
            &tx,
            "SELECT id FROM roles WHERE name = ?1",
            [ADMIN_ROLE],
            |row| Ok(row.get::<String>(0)?),
        )
        .await?
        {
            Some(id) => id,
            None => {
                let id = new_id();
                tx.execute(
                    "INSERT INTO roles (id, name, description, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?4)",
                    libsql::params![id.as_str(), ADMIN_ROLE, "Administrators", timestamp.as_str()],
                )
                .await?;
                id
            }
        };
        tx.execute(
            "INSERT OR IGNORE INTO role_policies (role_id, policy_id) VALUES (?1, ?2)",
            [role_id.as_str(), policy_id.as_str()],
        )
        .await?;

        let user_id = insert_user(
            &tx,
            &NewUser {
                email: email.to_string(),
                name: "Administrator".to_string(),
                password: password.to_string(),
                active: true,
                role_ids: vec![role_id],
            },
        )
        .await?;
        let user = load_user(&tx, &user_id).await?;
        tx.commit().await?;

        info!("Bootstrapped admin user {}", user.email);
        Ok(Some(user))
    }
}
