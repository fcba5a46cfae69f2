use axum::{http::StatusCode, Json};
use serde::Serialize;
use serde_json::{json, Value};

pub type ApiResponse = (StatusCode, Json<Value>);

pub fn ok<T: Serialize>(data: T) -> ApiResponse {
    envelope(StatusCode::OK, data)
}

pub fn created<T: Serialize>(data: T) -> ApiResponse {
    envelope(StatusCode::CREATED, data)
}

pub fn accepted<T: Serialize>(data: T) -> ApiResponse {
    envelope(StatusCode::ACCEPTED, data)
}

pub fn envelope<T: Serialize>(status: StatusCode, data: T) -> ApiResponse {
    (
        status,
        Json(json!({
            "success": true,
            "data": data,
        })),
    )
}
