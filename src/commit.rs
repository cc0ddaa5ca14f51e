use crate::engine::TimerEngine;
use crate::models::RecordFields;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Хук перед сохранением записи. Вызывается синхронно в контексте сабмита.
/// Контракт: вернуть управление без неограниченного ожидания и никогда не
/// сорвать коммит — значения полей best-effort при любой внутренней ошибке,
/// включая панику внутри финализации.
pub fn before_record_commit(engine: &TimerEngine, record_id: &str, fields: &mut RecordFields) {
    let result = catch_unwind(AssertUnwindSafe(|| {
        engine.finalize_for_commit(record_id, fields);
    }));

    if result.is_err() {
        error!(
            "[COMMIT] Finalize panicked for record {}. Committing fields as-is.",
            record_id
        );
        let fallback = fields.elapsed_ms;
        fields.finalize(fallback);
    }
}
