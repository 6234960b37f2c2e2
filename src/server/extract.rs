//! Request extractors: schema-checked JSON bodies, query strings and bearer-token users.

use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::{header::AUTHORIZATION, request::Parts},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::AppState;
use crate::domain::auth::grants;
use crate::domain::User;
use crate::error::{ApiError, Result};
use crate::validation::{self, Validated};

/// A JSON body checked against `T::SCHEMA` before deserializing.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: Validated + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self> {
        let Json(value) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        validation::parse(T::SCHEMA, value).map(ValidatedJson)
    }
}

/// Query string parameters; a malformed string is a `BadRequest` in the
/// usual error envelope.
pub struct QueryParams<T>(pub T);

#[axum::async_trait]
impl<S, T> FromRequestParts<S> for QueryParams<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        Ok(QueryParams(value))
    }
}

/// `{"ids": [...]}` bodies that replace a set of links.
#[derive(Debug, Deserialize)]
pub struct IdList {
    pub ids: Vec<String>,
}

impl Validated for IdList {
    const SCHEMA: &'static str = "id_list";
}

/// `{"tags": [...]}` bodies that replace a record's tags.
#[derive(Debug, Deserialize)]
pub struct TagList {
    pub tags: Vec<String>,
}

impl Validated for TagList {
    const SCHEMA: &'static str = "tag_list";
}

/// The user behind a valid `Authorization: Bearer` token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub capabilities: Vec<String>,
    pub token: String,
}

impl AuthUser {
    pub fn require(&self, capability: &str) -> Result<()> {
        if grants(&self.capabilities, capability) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(capability.to_string()))
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        let user = state
            .storage
            .session_user(token)
            .await?
            .ok_or(ApiError::Unauthorized)?;
        let capabilities = state.storage.user_capabilities(&user.id).await?;

        Ok(AuthUser {
            user,
            capabilities,
            token: token.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request as HttpRequest;

    fn parts(header: Option<&str>) -> Parts {
        let mut builder = HttpRequest::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token(&parts(Some("Bearer abc"))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("bearer  abc "))), Some("abc"));
        assert_eq!(bearer_token(&parts(Some("Basic abc"))), None);
        assert_eq!(bearer_token(&parts(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts(None)), None);
    }

    #[tokio::test]
    async fn malformed_query_is_a_bad_request() {
        let mut parts = HttpRequest::builder()
            .uri("/people?limit=abc")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let err = QueryParams::<crate::domain::Page>::from_request_parts(&mut parts, &())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let mut parts = HttpRequest::builder()
            .uri("/people?limit=5")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let QueryParams(page) =
            QueryParams::<crate::domain::Page>::from_request_parts(&mut parts, &())
                .await
                .unwrap();
        assert_eq!(page.limit(), 5);
    }

    #[test]
    fn require_reports_missing_capability() {
        let auth = AuthUser {
            user: User {
                id: "u1".into(),
                email: "ada@example.org".into(),
                name: "Ada".into(),
                active: true,
                role_ids: vec![],
                created_at: String::new(),
                updated_at: String::new(),
            },
            capabilities: vec!["people:read".into()],
            token: "t".into(),
        };
        assert!(auth.require("people:read").is_ok());
        assert!(matches!(
            auth.require("people:write"),
            Err(ApiError::Forbidden(cap)) if cap == "people:write"
        ));
    }
}
