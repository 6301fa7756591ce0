//! Route table and middleware layering.

use axum::http::{HeaderValue, Method, header};
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::auth::auth_middleware;

use super::handlers::{agents, health, runner, runners, runs, sessions, stream};
use super::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let authenticated = Router::new()
        .route("/sessions", get(sessions::list_sessions))
        .route(
            "/sessions/{id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/sessions/{id}/runs", get(sessions::list_runs))
        .route("/sessions/{id}/events", get(sessions::list_events))
        .route("/sessions/{id}/result", get(sessions::get_result))
        .route("/sessions/{id}/stop", post(sessions::stop_session))
        .route("/runs", post(runs::create_run))
        .route("/runs/{id}", get(runs::get_run))
        .route("/runs/{id}/stop", post(runs::stop_run))
        .route("/runner/register", post(runner::register))
        .route("/runner/heartbeat", post(runner::heartbeat))
        .route("/runner/runs", get(runner::get_work))
        .route("/runner/runs/{id}/started", post(runner::report_started))
        .route("/runner/runs/{id}/completed", post(runner::report_completed))
        .route("/runner/runs/{id}/failed", post(runner::report_failed))
        .route("/runner/runs/{id}/stopped", post(runner::report_stopped))
        .route("/runners", get(runners::list_runners))
        .route("/runners/{id}", delete(runners::deregister_runner))
        .route(
            "/agents",
            get(agents::list_agents).post(agents::create_agent),
        )
        .route(
            "/agents/{name}",
            get(agents::get_agent)
                .patch(agents::patch_agent)
                .delete(agents::delete_agent),
        )
        .route("/stream/sessions", get(stream::stream_sessions))
        .layer(middleware::from_fn_with_state(
            state.auth.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    let public = Router::new()
        .route("/health", get(health::health))
        .with_state(state);

    Router::new()
        .merge(public)
        .merge(authenticated)
        .layer(cors)
        .layer(trace_layer)
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PATCH, Method::DELETE];
    let headers = [header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT];

    let origins: Vec<HeaderValue> = state
        .cors
        .origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    if origins.is_empty() {
        if state.auth.dev_mode {
            tracing::warn!("CORS_ORIGINS not set, allowing any origin (dev mode)");
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(methods)
                .allow_headers(headers)
        } else {
            tracing::warn!("CORS_ORIGINS not set, denying all cross-origin requests");
            CorsLayer::new().allow_origin(tower_http::cors::AllowOrigin::exact(
                HeaderValue::from_static("null"),
            ))
        }
    } else {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .allow_credentials(true)
    }
}
