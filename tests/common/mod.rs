//! Test utilities and common setup.

use axum::Router;

use coordinator::api;
use coordinator::config::AppConfig;
use coordinator::db::Database;
use coordinator::store::Store;

/// Builds a fully wired router against an in-memory database, dev-mode auth.
pub async fn test_app() -> Router {
    let (router, _) = test_app_with_state().await;
    router
}

/// Like `test_app`, but with a caller-supplied config (e.g. a shortened
/// `no_match_timeout_seconds` for a sweep test).
pub async fn test_app_with_config(config: AppConfig) -> (Router, api::state::AppState) {
    let db = Database::in_memory().await.unwrap();
    let store = Store::new(db.pool().clone());
    let state = api::state::AppState::new(store, &config);
    (api::routes::create_router(state.clone()), state)
}

/// Same as `test_app`, but also returns the `AppState` for direct service
/// calls alongside HTTP requests (e.g. driving a runner's lifecycle reports
/// without round-tripping JSON).
pub async fn test_app_with_state() -> (Router, api::state::AppState) {
    let db = Database::in_memory().await.unwrap();
    let store = Store::new(db.pool().clone());
    let config = AppConfig::default();
    let state = api::state::AppState::new(store, &config);
    (api::routes::create_router(state.clone()), state)
}
