//! Request/response bodies for event CRUD.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct EventCreateRequest {
    pub name: String,
    pub location: String,
    /// Base64-encoded image. Stored inline; there is no object storage.
    pub photo: Option<String>,
    /// ISO-8601 timestamp.
    pub time: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EventUpdateRequest {
    pub name: Option<String>,
    pub location: Option<String>,
    pub photo: Option<String>,
    pub time: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EventResponse {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub photo: Option<String>,
    pub time: String,
    pub description: Option<String>,
    pub owner_id: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OkResponse {
    pub ok: bool,
}
