use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::includes::Includes;
use crate::network::{resolve_region, ClientIp, GeoError, GeoLocator, Region};
use crate::snowflake::{SnowflakeGenerator, SnowflakeMeta};

pub struct AppState {
    /// Region lookups are skipped when no database is configured
    pub geo_locator: Option<Arc<dyn GeoLocator>>,
    pub snowflake: Arc<SnowflakeGenerator>,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ClientInfoResponse {
    pub ip: String,
    pub region: Region,
    pub includes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct IdResponse {
    /// Rendered as a string so JavaScript clients keep all 64 bits
    pub id: String,
    pub meta: SnowflakeMeta,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error: String) -> ApiError {
    (status, Json(ErrorResponse { error }))
}

/// Describe the calling client
pub async fn client_info(
    State(state): State<Arc<AppState>>,
    ClientIp(ip): ClientIp,
    Includes(includes): Includes,
) -> Result<Json<ClientInfoResponse>, ApiError> {
    let region = match state.geo_locator.as_deref() {
        Some(locator) => match resolve_region(locator, &ip) {
            Ok(region) => region,
            // e.g. IPv6 clients against an IPv4-only database
            Err(GeoError::InvalidIp(_)) => {
                tracing::debug!(%ip, "client address not supported by geolocation database");
                Region::default()
            }
            Err(e) => {
                tracing::error!(%ip, error = %e, "region lookup failed");
                return Err(error_response(
                    StatusCode::BAD_GATEWAY,
                    format!("Failed to resolve region: {}", e),
                ));
            }
        },
        None => Region::default(),
    };

    Ok(Json(ClientInfoResponse {
        ip,
        region,
        includes,
    }))
}

/// Issue a new snowflake ID
///
/// Generation may wait for the next millisecond while holding the generator
/// lock, so it runs on the blocking pool.
pub async fn generate_id(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<IdResponse>), ApiError> {
    let generator = Arc::clone(&state.snowflake);
    let generated = tokio::task::spawn_blocking(move || generator.generate())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "snowflake generation task failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to generate id".to_string(),
            )
        })?;

    match generated {
        Ok(id) => Ok((
            StatusCode::CREATED,
            Json(IdResponse {
                id: id.to_string(),
                meta: state.snowflake.decompose(id),
            }),
        )),
        Err(e) => {
            tracing::error!(error = %e, "failed to generate snowflake id");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to generate id: {}", e),
            ))
        }
    }
}

/// Decompose an existing snowflake ID
pub async fn decompose_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Json<IdResponse> {
    Json(IdResponse {
        id: id.to_string(),
        meta: state.snowflake.decompose(id),
    })
}

/// Health check endpoint
pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}
