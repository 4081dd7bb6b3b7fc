// Record CRUD handlers, generic over the collection

use super::Collection;
use crate::error::CityError;
use crate::model::Record;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// GET /<collection>
pub(super) async fn list<E: Record>(
    State(collection): State<Arc<Collection<E>>>,
) -> Result<Json<Vec<E>>, CityError> {
    Ok(Json(collection.records.get_all().await?))
}

/// GET /<collection>/:id
pub(super) async fn fetch<E: Record>(
    State(collection): State<Arc<Collection<E>>>,
    Path(id): Path<String>,
) -> Result<Json<E>, CityError> {
    Ok(Json(collection.records.get(&id).await?))
}

/// POST /<collection> - create or replace a record
pub(super) async fn create<E: Record>(
    State(collection): State<Arc<Collection<E>>>,
    Json(mut record): Json<E>,
) -> Result<(StatusCode, Json<E>), CityError> {
    record.validate().map_err(CityError::InvalidRecord)?;

    if let Some(audit) = record.audit_mut() {
        audit.stamp_created(Utc::now());
    }

    collection.records.put(&record).await?;

    info!(collection = E::COLLECTION, id = %record.id(), "Record saved");
    Ok((StatusCode::CREATED, Json(record)))
}

/// DELETE /<collection>/:id
pub(super) async fn remove<E: Record>(
    State(collection): State<Arc<Collection<E>>>,
    Path(id): Path<String>,
) -> Result<StatusCode, CityError> {
    collection.records.delete(&id).await?;

    info!(collection = E::COLLECTION, id = %id, "Record deleted");
    Ok(StatusCode::NO_CONTENT)
}
