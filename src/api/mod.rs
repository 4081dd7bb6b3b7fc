// Control-service HTTP API

mod commands;
mod error;
mod records;

pub use commands::CommandRequest;

use crate::cache::CacheAside;
use crate::dispatch::Dispatcher;
use crate::model::{Battery, EnergySource, House, Record};
use axum::{
    response::Json,
    routing::{get, patch},
    Router,
};
use std::sync::Arc;

/// Read path and write path for one record collection.
pub struct Collection<E: Record> {
    pub records: CacheAside<E>,
    pub commands: Dispatcher<E>,
}

impl<E: Record> Collection<E> {
    pub fn new(records: CacheAside<E>, commands: Dispatcher<E>) -> Self {
        Self { records, commands }
    }
}

/// Shared state for the control API
#[derive(Clone)]
pub struct AppState {
    pub houses: Arc<Collection<House>>,
    pub energy_sources: Arc<Collection<EnergySource>>,
    pub batteries: Arc<Collection<Battery>>,
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn crud_routes<E: Record>(path: &str) -> Router<Arc<Collection<E>>> {
    Router::new()
        .route(path, get(records::list::<E>).post(records::create::<E>))
        .route(
            &format!("{}/:id", path),
            get(records::fetch::<E>).delete(records::remove::<E>),
        )
}

/// CRUD plus `PATCH /<collection>/:id` for commands addressed to the record.
fn commanded_routes<E: Record>(path: &str) -> Router<Arc<Collection<E>>> {
    crud_routes::<E>(path).route(
        &format!("{}/:id", path),
        patch(commands::entity_command::<E>),
    )
}

/// Create the control API router
pub fn create_router(state: AppState) -> Router {
    let houses = crud_routes::<House>("/houses")
        .route(
            "/houses/:id/devices/:device_id",
            patch(commands::device_command),
        )
        .with_state(state.houses);

    let energy_sources =
        commanded_routes::<EnergySource>("/energy-sources").with_state(state.energy_sources);

    let batteries = commanded_routes::<Battery>("/batteries").with_state(state.batteries);

    Router::new()
        .route("/health", get(health))
        .merge(houses)
        .merge(energy_sources)
        .merge(batteries)
}
