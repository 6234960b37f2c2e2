use axum::{extract::State, routing::post, Router};

use super::{AppState, AuthUser, Envelope, ValidatedJson};
use crate::error::Result;
use crate::storage::{BulkInsert, BulkInsertSummary};

/// Insert people, resources, events and facts in one transaction.
/// Items may name each other through `ref`/`*_ref` keys.
async fn insert(
    State(state): State<AppState>,
    auth: AuthUser,
    ValidatedJson(batch): ValidatedJson<BulkInsert>,
) -> Result<Envelope<BulkInsertSummary>> {
    auth.require("data:write")?;
    Ok(Envelope::created(state.storage.bulk_insert(batch).await?))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/data/insert", post(insert))
}
