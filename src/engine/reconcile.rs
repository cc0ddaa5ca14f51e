use crate::cache::CachedTimer;
use crate::engine::{SessionState, TimerEngine, TimerSession, UNSAVED_RECORD_ID};
use crate::models::{RecordFields, TimerMode, TimerStatus};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

impl TimerEngine {
    /// Активация виджета: читает удалённую запись (если есть) и передаёт
    /// поля в синхронную часть. Отказ чтения не фатален — стартуем с
    /// дефолтных полей, следующая успешная загрузка выправит.
    pub async fn activate(
        &self,
        owner_id: &str,
        record_id: &str,
    ) -> Result<Arc<TimerSession>, String> {
        let fields = match &self.store {
            Some(store) if record_id != UNSAVED_RECORD_ID => {
                match store.read(record_id).await {
                    Ok(fields) => fields,
                    Err(e) => {
                        error!(
                            "[LOAD] Failed to read record {}: {}. Starting with defaults.",
                            record_id, e
                        );
                        RecordFields::default()
                    }
                }
            }
            _ => RecordFields::default(),
        };
        self.activate_with_fields(owner_id, record_id, &fields)
    }

    /// Сверка при загрузке (поля записи уже прочитаны):
    /// 1. числовая база из кэша важнее удалённого elapsed — кэш отражает
    ///    последний локальный тик, даже если удалённая запись проиграла гонку;
    /// 2. удалённый running + started_at перекрывает правило 1: время шло,
    ///    пока виджет не был открыт вовсе (в т.ч. на другом устройстве) —
    ///    база реконструируется по настенным часам и сессия сразу Running;
    /// 3. иначе остаёмся в покое с базой правила 1.
    pub fn activate_with_fields(
        &self,
        owner_id: &str,
        record_id: &str,
        fields: &RecordFields,
    ) -> Result<Arc<TimerSession>, String> {
        // Одна сессия на запись: повторная активация возвращает живую
        if let Some(existing) = self.registry.get(record_id) {
            return Ok(existing);
        }

        let local = match &self.cache {
            Some(cache) => cache.load(owner_id, record_id).unwrap_or_else(|e| {
                warn!(
                    "[LOAD] Failed to load cache for record {}: {}. Using remote values.",
                    record_id, e
                );
                CachedTimer::default()
            }),
            None => CachedTimer::default(),
        };

        // Правило 1: база покоя
        let mut base_elapsed_ms = local.base_elapsed_ms.unwrap_or(fields.elapsed_ms);
        // Кэш хранит последний несабмиченный выбор пользователя
        let mode = local.mode.unwrap_or(fields.mode);
        let countdown_sec = local.countdown_sec.unwrap_or(fields.countdown_sec);

        // Правило 2: авто-возобновление
        let state = match (fields.status, fields.started_at_ms) {
            (TimerStatus::Running, Some(started_at_ms)) => {
                let delta = (self.clock.wall_now_ms() - started_at_ms).max(0) as u64;
                base_elapsed_ms = fields.elapsed_ms.saturating_add(delta);
                info!(
                    "[LOAD] Record {} was running remotely, auto-resuming at {} ms",
                    record_id, base_elapsed_ms
                );
                SessionState::Running {
                    anchor_monotonic: self.clock.monotonic_now(),
                    anchor_wall_ms: self.clock.wall_now_ms(),
                }
            }
            // running без читаемого started_at: анкер потерян, остаёмся в покое
            (TimerStatus::Running, None) => {
                warn!(
                    "[LOAD] Record {} says running but Started_At is unreadable, staying paused",
                    record_id
                );
                SessionState::Paused
            }
            (TimerStatus::Paused, _) => SessionState::Paused,
            (TimerStatus::Ready, _) => SessionState::Ready,
        };

        let session = Arc::new(TimerSession {
            owner_id: owner_id.to_string(),
            record_id: record_id.to_string(),
            mode: Mutex::new(mode),
            countdown_sec: Mutex::new(countdown_sec),
            state: Mutex::new(state),
            base_elapsed_ms: Mutex::new(base_elapsed_ms),
            laps: Mutex::new(Vec::new()),
            lap_text: Mutex::new(fields.lap_log.clone()),
            ticking: AtomicBool::new(false),
        });

        self.registry.insert(record_id, session.clone());
        Ok(session)
    }

    /// Teardown контекста редактирования: сессия уходит из реестра,
    /// её тикер гаснет на следующей итерации
    pub fn deactivate(&self, record_id: &str) {
        if let Some(session) = self.registry.remove(record_id) {
            session
                .ticking
                .store(false, std::sync::atomic::Ordering::Release);
            info!("[TIMER] Deactivated record {}", record_id);
        }
    }

    /// Финализация перед коммитом записи. Синхронно, без единого сетевого
    /// вызова: итог пишется прямо в in-memory поля, коммит несёт их сам.
    /// Любая внутренняя ошибка деградирует до best-effort значений —
    /// сохранение записи не блокируется никогда.
    pub fn finalize_for_commit(&self, record_id: &str, fields: &mut RecordFields) {
        match self.try_finalize(record_id, fields) {
            Ok(final_ms) => {
                fields.finalize(final_ms);
                info!(
                    "[COMMIT] Record {} finalized at {} ms",
                    record_id, final_ms
                );
            }
            Err(e) => {
                error!(
                    "[COMMIT] Finalize failed for record {}: {}. Committing stored value as-is.",
                    record_id, e
                );
                let fallback = fields.elapsed_ms;
                fields.finalize(fallback);
            }
        }
    }

    fn try_finalize(&self, record_id: &str, fields: &RecordFields) -> Result<u64, String> {
        // Живая сессия: локальный Stop (кэш обнуляется, удалённого патча нет)
        if let Some(session) = self.registry.get(record_id) {
            return self.stop_local(&session);
        }

        // Виджет в этой сессии не рисовался. Запись могла остаться running
        // с другого контекста — реконструируем elapsed по настенным часам.
        if fields.status == TimerStatus::Running {
            if let Some(started_at_ms) = fields.started_at_ms {
                let delta = (self.clock.wall_now_ms() - started_at_ms).max(0) as u64;
                let mut elapsed = fields.elapsed_ms.saturating_add(delta);
                if fields.mode == TimerMode::Countdown {
                    elapsed = elapsed.min(fields.target_duration_ms());
                }
                info!(
                    "[COMMIT] Record {} reconstructed without live session: {} ms",
                    record_id, elapsed
                );
                return Ok(elapsed);
            }
            // running без валидного анкера: оставляем сохранённое значение
            warn!(
                "[COMMIT] Record {} running without valid Started_At, keeping stored elapsed",
                record_id
            );
        }

        Ok(fields.elapsed_ms)
    }
}
