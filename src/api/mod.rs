//! HTTP surface: REST routes, the WebSocket endpoint and router
//! composition.
//!
//! REST endpoints are mounted under `/api/v1`; `/health` and `/ws` live
//! at the root.

pub mod handlers;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// OpenAPI description of the HTTP surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "jam-relay", description = "Real-time fan-out relay for jam sessions"),
    paths(
        handlers::system::health_handler,
        handlers::session::get_session,
        handlers::session::open_session,
        handlers::session::close_session,
        crate::ws::handler::ws_handler,
    ),
    components(schemas(
        handlers::system::HealthResponse,
        handlers::session::OpenSessionRequest,
        crate::hub::HubStats,
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
    ))
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}

/// Builds the full application: REST, WebSocket, tracing and CORS layers.
pub fn build_app(state: AppState) -> Router {
    let router = Router::new()
        .merge(build_router())
        .route("/ws", get(ws_handler));

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
