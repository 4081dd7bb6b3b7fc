use super::Collection;
use crate::command::CommandEnvelope;
use crate::error::CityError;
use crate::model::{House, Record};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use std::sync::Arc;

/// Body of a command submission
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub action: String,
    #[serde(default)]
    pub value: Option<f64>,
}

type Accepted = (StatusCode, Json<CommandEnvelope>);

/// PATCH /houses/:id/devices/:device_id
pub(super) async fn device_command(
    State(houses): State<Arc<Collection<House>>>,
    Path((house_id, device_id)): Path<(String, String)>,
    Json(request): Json<CommandRequest>,
) -> Result<Accepted, CityError> {
    let envelope = houses
        .commands
        .submit(&house_id, Some(&device_id), &request.action, request.value)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(envelope)))
}

/// PATCH /<collection>/:id - command addressed to the record itself
pub(super) async fn entity_command<E: Record>(
    State(collection): State<Arc<Collection<E>>>,
    Path(id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> Result<Accepted, CityError> {
    let envelope = collection
        .commands
        .submit(&id, None, &request.action, request.value)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(envelope)))
}
