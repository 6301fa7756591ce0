//! Application state shared across handlers.

use std::sync::Arc;

use crate::auth::AuthState;
use crate::blueprint::BlueprintResolver;
use crate::bus::EventBus;
use crate::config::{AppConfig, CorsConfig, SchedulingConfig};
use crate::queue::RunQueue;
use crate::registry::RunnerRegistry;
use crate::session::SessionController;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub bus: EventBus,
    pub registry: RunnerRegistry,
    pub blueprints: BlueprintResolver,
    pub queue: Arc<RunQueue>,
    pub sessions: Arc<SessionController>,
    pub auth: AuthState,
    pub scheduling: SchedulingConfig,
    pub cors: CorsConfig,
}

impl AppState {
    pub fn new(store: Store, config: &AppConfig) -> Self {
        let bus = EventBus::new();
        let registry = RunnerRegistry::new(store.clone(), config.scheduling.clone());
        let blueprints = BlueprintResolver::new(store.clone());
        let queue = Arc::new(RunQueue::new(
            store.clone(),
            bus.clone(),
            registry.clone(),
            blueprints.clone(),
            config.scheduling.clone(),
        ));
        let sessions = Arc::new(SessionController::new(
            store.clone(),
            bus.clone(),
            registry.clone(),
            config.scheduling.clone(),
        ));
        let auth = AuthState {
            dev_mode: config.auth.dev_mode,
            jwt_secret: config.auth.jwt_secret.clone(),
        };

        Self {
            store,
            bus,
            registry,
            blueprints,
            queue,
            sessions,
            auth,
            scheduling: config.scheduling.clone(),
            cors: config.cors.clone(),
        }
    }
}
