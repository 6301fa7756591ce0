//! Store (C1): the durable boundary. Owns all persistence and the only
//! atomic operation with cross-cutting semantics, `claim_first_matching`.

pub mod blueprints;
pub mod events;
pub mod models;
pub mod runners;
pub mod runs;
pub mod sessions;

use sqlx::SqlitePool;

use blueprints::BlueprintRepository;
use events::EventRepository;
use runners::RunnerRepository;
use runs::RunRepository;
use sessions::SessionRepository;

#[derive(Debug, Clone)]
pub struct Store {
    pub sessions: SessionRepository,
    pub runs: RunRepository,
    pub events: EventRepository,
    pub runners: RunnerRepository,
    pub blueprints: BlueprintRepository,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            sessions: SessionRepository::new(pool.clone()),
            runs: RunRepository::new(pool.clone()),
            events: EventRepository::new(pool.clone()),
            runners: RunnerRepository::new(pool.clone()),
            blueprints: BlueprintRepository::new(pool),
        }
    }
}
