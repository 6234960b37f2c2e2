use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const HASH_SCHEME: &str = "sha256";
const HASH_ROUNDS: u32 = 10_000;
const SALT_BYTES: usize = 16;
const TOKEN_BYTES: usize = 32;

/// Capability granting everything.
pub const SUPERUSER: &str = "*";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub active: bool,
    pub role_ids: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub policy_ids: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub capabilities: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub role_ids: Vec<String>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserPatch {
    pub email: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub policy_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RolePatch {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPolicy {
    pub name: String,
    pub description: Option<String>,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub capabilities: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// An issued bearer token. `token` is only ever returned here, at login.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub expires_at: String,
    pub user: User,
}

/// A `resource:action` permission, `resource:*`, or `*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability<'a> {
    resource: &'a str,
    action: &'a str,
}

impl<'a> Capability<'a> {
    pub fn parse(raw: &'a str) -> Option<Self> {
        if raw == SUPERUSER {
            return Some(Self {
                resource: SUPERUSER,
                action: SUPERUSER,
            });
        }
        let (resource, action) = raw.split_once(':')?;
        if resource.is_empty() || action.is_empty() || action.contains(':') {
            return None;
        }
        Some(Self { resource, action })
    }

    /// Whether holding `self` satisfies `required`.
    pub fn allows(&self, required: &Capability<'_>) -> bool {
        (self.resource == SUPERUSER || self.resource == required.resource)
            && (self.action == SUPERUSER || self.action == required.action)
    }
}

/// Whether any granted capability satisfies `required`. Malformed grants are ignored.
pub fn grants(granted: &[String], required: &str) -> bool {
    let Some(required) = Capability::parse(required) else {
        return false;
    };
    granted
        .iter()
        .filter_map(|g| Capability::parse(g))
        .any(|g| g.allows(&required))
}

pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::thread_rng().fill_bytes(&mut salt);
    encode_hash(password, &salt, HASH_ROUNDS)
}

fn encode_hash(password: &str, salt: &[u8], rounds: u32) -> String {
    let digest = stretch(password, salt, rounds);
    format!(
        "{HASH_SCHEME}${rounds}${}${}",
        hex::encode(salt),
        hex::encode(digest)
    )
}

fn stretch(password: &str, salt: &[u8], rounds: u32) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let mut out = hasher.finalize().to_vec();

    for _ in 1..rounds {
        let mut hasher = Sha256::new();
        hasher.update(&out);
        hasher.update(salt);
        hasher.update(password.as_bytes());
        out = hasher.finalize().to_vec();
    }
    out
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(rounds), Some(salt), Some(digest), None) = (
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
        parts.next(),
    ) else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let (Ok(rounds), Ok(salt), Ok(expected)) =
        (rounds.parse::<u32>(), hex::decode(salt), hex::decode(digest))
    else {
        return false;
    };
    if rounds == 0 {
        return false;
    }

    constant_time_eq(&stretch(password, &salt, rounds), &expected)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// A fresh bearer token. Only its [`hash_token`] digest is persisted.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn check_password(password: &str, min_length: usize) -> Result<(), String> {
    if password.chars().count() < min_length {
        return Err(format!(
            "password: must be at least {min_length} characters"
        ));
    }
    Ok(())
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_and_wildcard_grants() {
        assert!(grants(&caps(&["people:read"]), "people:read"));
        assert!(!grants(&caps(&["people:read"]), "people:write"));
        assert!(grants(&caps(&["people:*"]), "people:write"));
        assert!(!grants(&caps(&["people:*"]), "facts:read"));
        assert!(grants(&caps(&["*"]), "roles:write"));
        assert!(grants(&caps(&["*:read"]), "tags:read"));
        assert!(!grants(&caps(&["*:read"]), "tags:write"));
    }

    #[test]
    fn malformed_capabilities_grant_nothing() {
        assert!(!grants(&caps(&["people", "people:read:extra", ":read"]), "people:read"));
        assert!(!grants(&caps(&["*"]), "not-a-capability"));
        assert!(!grants(&[], "people:read"));
    }

    #[test]
    fn password_hash_round_trip() {
        let stored = hash_password("correct horse");
        assert!(stored.starts_with("sha256$10000$"));
        assert!(verify_password("correct horse", &stored));
        assert!(!verify_password("wrong horse", &stored));
    }

    #[test]
    fn same_password_gets_different_salts() {
        assert_ne!(hash_password("secret"), hash_password("secret"));
    }

    #[test]
    fn verify_rejects_malformed_hashes() {
        assert!(!verify_password("x", ""));
        assert!(!verify_password("x", "md5$1$00$00"));
        assert!(!verify_password("x", "sha256$zero$00$00"));
        assert!(!verify_password("x", "sha256$0$00$00"));
        assert!(!verify_password("x", "sha256$1$zz$00"));
    }

    #[test]
    fn tokens_are_random_hex_and_hash_stably() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert_ne!(a, b);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), a);
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn password_length_counts_characters() {
        assert!(check_password("短い", 3).is_err());
        assert!(check_password("ÅÅÅ", 3).is_ok());
    }
}
