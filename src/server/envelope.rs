use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// `{"status": "success", "data": ...}` with the given HTTP status.
pub struct Envelope<T> {
    status: StatusCode,
    data: T,
}

#[derive(Serialize)]
struct Body<'a, T> {
    status: &'static str,
    data: &'a T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::OK,
            data,
        }
    }

    pub fn created(data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let body = Body {
            status: "success",
            data: &self.data,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Body of a successful delete.
#[derive(Serialize)]
pub struct Deleted {
    pub id: String,
    pub deleted: bool,
}

impl Deleted {
    pub fn new(id: String) -> Envelope<Self> {
        Envelope::ok(Self { id, deleted: true })
    }
}
