use crate::error::CityError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use tracing::error;

impl CityError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CityError::NotFound(_) => StatusCode::NOT_FOUND,
            CityError::InvalidAction(_) | CityError::InvalidRecord(_) => StatusCode::BAD_REQUEST,
            CityError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CityError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CityError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }

        let body = Json(serde_json::json!({
            "error": self.to_string(),
        }));

        (status, body).into_response()
    }
}
