mod cache;
mod clock;
mod commit;
mod engine;
mod models;
mod registry;
mod scheduler;
mod store;

pub use cache::{CachePatch, CachedTimer, LocalCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use commit::before_record_commit;
pub use engine::{
    SessionSnapshot, SessionState, TimerEngine, TimerSession, UNSAVED_RECORD_ID,
};
pub use models::{
    format_ms, LapEntry, RecordFields, RecordPatch, TimerMode, TimerStatus,
    COUNTDOWN_SEC_FIELD, ELAPSED_MS_FIELD, LAP_LOG_FIELD, MODE_FIELD, STARTED_AT_FIELD,
    STATUS_FIELD,
};
pub use registry::InstanceRegistry;
pub use scheduler::{Scheduler, SessionEvent, TICK_INTERVAL};
pub use store::{RecordStoreClient, StoreConfig, StoreError};


/// Инициализация логирования: по умолчанию info (если RUST_LOG не задан),
/// чтобы [TIMER]/[COMMIT] были видны
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
