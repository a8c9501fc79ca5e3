pub mod error;
pub mod git;
pub mod routes;
pub mod scheduler;
pub mod state;

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::Router;
use immunity_core::Pipeline;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(pipeline: Arc<Pipeline>) -> Router {
    let app_state = state::AppState::new(pipeline);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Builds
        .route(
            "/builds",
            get(routes::builds::list_builds).post(routes::builds::create_build),
        )
        .route(
            "/builds/test_builds",
            delete(routes::builds::delete_test_builds),
        )
        .route(
            "/builds/{id}",
            get(routes::builds::get_build).delete(routes::builds::delete_build),
        )
        .route(
            "/builds/{id}/deploy_status",
            put(routes::builds::put_deploy_status),
        )
        .route(
            "/builds/{id}/test_status",
            put(routes::builds::put_test_status),
        )
        .route("/builds/{id}/events", post(routes::builds::post_event))
        .route("/builds/{id}/statuses", get(routes::builds::list_statuses))
        .route(
            "/build_status/{build_id}/{region}",
            get(routes::builds::get_build_status),
        )
        // Agent callbacks (form-encoded)
        .route("/deploy_succeed", post(routes::legacy::deploy_succeed))
        .route("/deploy_failed", post(routes::legacy::deploy_failed))
        .route("/test_succeed", post(routes::legacy::test_succeed))
        .route("/test_failed", post(routes::legacy::test_failed))
        .route("/monitor_succeed", post(routes::legacy::monitor_succeed))
        .route("/monitor_failed", post(routes::legacy::monitor_failed))
        .route(
            "/manual_deploy_confirmed",
            post(routes::legacy::manual_deploy_confirmed),
        )
        // Regions
        .route("/regions", get(routes::regions::list_regions))
        .route("/regions/{name}", delete(routes::regions::delete_region))
        .route(
            "/regions/{name}/history",
            get(routes::regions::region_history),
        )
        .route(
            "/applications/{name}/regions",
            get(routes::regions::application_regions),
        )
        .route(
            "/applications/{app}/regions/{name}",
            put(routes::regions::put_region),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Start the HTTP API and the commit poller.
pub async fn serve(pipeline: Arc<Pipeline>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(pipeline, listener).await
}

/// Like `serve`, on a listener the caller already bound.
pub async fn serve_on(
    pipeline: Arc<Pipeline>,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let scheduler = scheduler::spawn(Arc::clone(&pipeline));
    let app = build_router(pipeline);

    tracing::info!("immunity listening on http://localhost:{actual_port}");

    let result = axum::serve(listener, app).await;
    scheduler.abort();
    result?;
    Ok(())
}
