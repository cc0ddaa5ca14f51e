use crate::cache::CachePatch;
use crate::engine::{SessionState, SessionSnapshot, TimerEngine, TimerSession, UNSAVED_RECORD_ID};
use crate::models::{format_ms, LapEntry, RecordPatch, TimerMode, TimerStatus};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl TimerEngine {
    /// Текущий elapsed — чистый запрос состояния + Clock, без мутаций.
    /// Не зависит от того, рисовался ли виджет хоть раз.
    pub fn effective_elapsed_ms(&self, session: &TimerSession) -> Result<u64, String> {
        let state = session
            .state
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;
        let base = *session
            .base_elapsed_ms
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;

        Ok(match &*state {
            SessionState::Running {
                anchor_monotonic, ..
            } => {
                // Интервал считается ТОЛЬКО по монотонным часам:
                // wall-clock дельты ломаются при NTP/DST
                let delta = self.clock.monotonic_now().saturating_sub(*anchor_monotonic);
                base.saturating_add(delta.as_millis() as u64)
            }
            SessionState::Ready | SessionState::Paused => base,
        })
    }

    /// Снимок для отображения. Вызывается тикером и по visibility-regain —
    /// пересчёт без мутации base_elapsed_ms.
    pub fn snapshot(&self, session: &TimerSession) -> Result<SessionSnapshot, String> {
        let elapsed_ms = self.effective_elapsed_ms(session)?;
        let base_elapsed_ms = *session
            .base_elapsed_ms
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;
        let mode = session.mode()?;
        let status = session.status()?;

        let session_start_ms = {
            let state = session
                .state
                .lock()
                .map_err(|e| format!("Mutex poisoned: {}", e))?;
            match &*state {
                SessionState::Running { anchor_wall_ms, .. } => Some(*anchor_wall_ms),
                _ => None,
            }
        };

        // Для countdown клампится только отображаемый остаток, не elapsed
        let (remaining_ms, display) = match mode {
            TimerMode::Countdown => {
                let target = session.target_duration_ms()?;
                let remaining = target.saturating_sub(elapsed_ms);
                (Some(remaining), format_ms(remaining as i64))
            }
            TimerMode::Stopwatch => (None, format_ms(elapsed_ms as i64)),
        };

        Ok(SessionSnapshot {
            status,
            mode,
            elapsed_ms,
            base_elapsed_ms,
            remaining_ms,
            display,
            session_start_ms,
        })
    }

    /// Переход: Ready|Paused → Running. Уже Running — идемпотентный no-op.
    pub async fn start(&self, session: &Arc<TimerSession>) -> Result<(), String> {
        let anchor_wall_ms;
        {
            let mut state = session
                .state
                .lock()
                .map_err(|e| format!("Mutex poisoned: {}", e))?;
            if matches!(&*state, SessionState::Running { .. }) {
                debug!(
                    "[FSM] Start ignored for record {}: already running",
                    session.record_id
                );
                return Ok(());
            }
            anchor_wall_ms = self.clock.wall_now_ms();
            *state = SessionState::Running {
                anchor_monotonic: self.clock.monotonic_now(),
                anchor_wall_ms,
            };
        }

        info!("[TIMER] Started record {}", session.record_id);
        self.patch_remote(
            session,
            RecordPatch::new()
                .status(TimerStatus::Running)
                .started_at(anchor_wall_ms),
        )
        .await;
        Ok(())
    }

    /// Переход: Running → Paused. Не Running — идемпотентный no-op.
    pub async fn pause(&self, session: &Arc<TimerSession>) -> Result<(), String> {
        let Some(base) = self.freeze_if_running(session)? else {
            debug!(
                "[FSM] Pause ignored for record {}: not running",
                session.record_id
            );
            return Ok(());
        };

        // Кэш пишется до возврата: последующее чтение в этом же контексте
        // обязано видеть свежую базу
        self.save_cache(session, CachePatch::new().base_elapsed_ms(base));
        info!(
            "[TIMER] Paused record {} at {} ms",
            session.record_id, base
        );
        self.patch_remote(
            session,
            RecordPatch::new()
                .status(TimerStatus::Paused)
                .elapsed_ms(base)
                .clear_started_at(),
        )
        .await;
        Ok(())
    }

    /// Переход: любое состояние → Ready. Всегда разрешён, идемпотентен.
    /// Итоговое значение для countdown клампится к цели.
    pub async fn stop(&self, session: &Arc<TimerSession>) -> Result<(), String> {
        let final_ms = self.stop_local(session)?;
        info!(
            "[TIMER] Stopped record {} at {} ms",
            session.record_id, final_ms
        );
        self.patch_remote(
            session,
            RecordPatch::new()
                .status(TimerStatus::Ready)
                .elapsed_ms(final_ms)
                .clear_started_at(),
        )
        .await;
        Ok(())
    }

    /// Локальная часть Stop — без удалённого патча. Используется и самим
    /// stop(), и финализацией коммита (там значения несёт сам коммит).
    pub(crate) fn stop_local(&self, session: &TimerSession) -> Result<u64, String> {
        // Свёртка как у Pause, но статус сразу Ready
        {
            let mut state = session
                .state
                .lock()
                .map_err(|e| format!("Mutex poisoned: {}", e))?;
            if let SessionState::Running {
                anchor_monotonic, ..
            } = &*state
            {
                let delta = self.clock.monotonic_now().saturating_sub(*anchor_monotonic);
                let mut base = session
                    .base_elapsed_ms
                    .lock()
                    .map_err(|e| format!("Mutex poisoned: {}", e))?;
                *base = base.saturating_add(delta.as_millis() as u64);
            }
            *state = SessionState::Ready;
        }

        let mut final_ms = {
            let base = session
                .base_elapsed_ms
                .lock()
                .map_err(|e| format!("Mutex poisoned: {}", e))?;
            *base
        };

        // Countdown никогда не фиксирует больше цели
        if session.mode()? == TimerMode::Countdown {
            let target = session.target_duration_ms()?;
            if final_ms > target {
                final_ms = target;
                let mut base = session
                    .base_elapsed_ms
                    .lock()
                    .map_err(|e| format!("Mutex poisoned: {}", e))?;
                *base = target;
            }
        }

        // Кэшированная база сбрасывается в 0: следующая активация начинает
        // с чистого листа, а не с проигрыша устаревшего значения
        self.save_cache(session, CachePatch::new().base_elapsed_ms(0));
        Ok(final_ms)
    }

    /// Переход: любое состояние → Ready с обнулением
    pub async fn reset(&self, session: &Arc<TimerSession>) -> Result<(), String> {
        {
            let mut state = session
                .state
                .lock()
                .map_err(|e| format!("Mutex poisoned: {}", e))?;
            *state = SessionState::Ready;
            let mut base = session
                .base_elapsed_ms
                .lock()
                .map_err(|e| format!("Mutex poisoned: {}", e))?;
            *base = 0;
        }

        self.save_cache(session, CachePatch::new().base_elapsed_ms(0));
        info!("[TIMER] Reset record {}", session.record_id);
        self.patch_remote(
            session,
            RecordPatch::new()
                .status(TimerStatus::Ready)
                .elapsed_ms(0)
                .clear_started_at(),
        )
        .await;
        Ok(())
    }

    /// Лап: статус и base не меняются. Фиксируется effective_elapsed на
    /// момент вызова — ровно то, что дала бы пауза в этот миг.
    pub async fn lap(&self, session: &Arc<TimerSession>) -> Result<LapEntry, String> {
        let elapsed_ms = self.effective_elapsed_ms(session)?;
        let entry = LapEntry {
            wall_ms: self.clock.wall_now_ms(),
            elapsed_ms,
        };

        let full_text = {
            let mut text = session
                .lap_text
                .lock()
                .map_err(|e| format!("Mutex poisoned: {}", e))?;
            text.push_str(&entry.render_line());
            text.clone()
        };
        {
            let mut laps = session
                .laps
                .lock()
                .map_err(|e| format!("Mutex poisoned: {}", e))?;
            laps.push(entry);
        }

        info!(
            "[TIMER] Lap for record {} at {} ms",
            session.record_id, elapsed_ms
        );
        self.patch_remote(
            session,
            RecordPatch::new().lap_log(full_text).elapsed_ms(elapsed_ms),
        )
        .await;
        Ok(entry)
    }

    /// Смена режима виджета: только кэш, статус и elapsed не трогаем
    pub fn set_mode(&self, session: &TimerSession, mode: TimerMode) -> Result<(), String> {
        {
            let mut current = session
                .mode
                .lock()
                .map_err(|e| format!("Mutex poisoned: {}", e))?;
            *current = mode;
        }
        self.save_cache(session, CachePatch::new().mode(mode));
        Ok(())
    }

    /// Смена целевых секунд countdown; отрицательный ввод прижат к нулю
    /// на уровне типа (u64)
    pub fn set_countdown_sec(&self, session: &TimerSession, sec: u64) -> Result<(), String> {
        {
            let mut current = session
                .countdown_sec
                .lock()
                .map_err(|e| format!("Mutex poisoned: {}", e))?;
            *current = sec;
        }
        self.save_cache(session, CachePatch::new().countdown_sec(sec));
        Ok(())
    }

    /// Порог countdown пересечён? Чистый запрос, вызывается тикером.
    pub fn countdown_expired(&self, session: &TimerSession) -> Result<bool, String> {
        if session.mode()? != TimerMode::Countdown {
            return Ok(false);
        }
        if session.status()? != TimerStatus::Running {
            return Ok(false);
        }
        Ok(self.effective_elapsed_ms(session)? >= session.target_duration_ms()?)
    }

    /// Автозавершение countdown: pause-эквивалентная заморозка по первому
    /// пересечению цели. Зафиксированное значение клампится к цели, статус —
    /// paused, как при ручной паузе (завершение ≠ явный Stop).
    pub async fn auto_terminate_countdown(
        &self,
        session: &Arc<TimerSession>,
    ) -> Result<Option<u64>, String> {
        let Some(mut base) = self.freeze_if_running(session)? else {
            return Ok(None);
        };

        let target = session.target_duration_ms()?;
        if base > target {
            base = target;
            let mut stored = session
                .base_elapsed_ms
                .lock()
                .map_err(|e| format!("Mutex poisoned: {}", e))?;
            *stored = target;
        }

        self.save_cache(session, CachePatch::new().base_elapsed_ms(base));
        info!(
            "[COUNTDOWN] Record {} reached target, frozen at {} ms",
            session.record_id, base
        );
        self.patch_remote(
            session,
            RecordPatch::new()
                .status(TimerStatus::Paused)
                .elapsed_ms(base)
                .clear_started_at(),
        )
        .await;
        Ok(Some(base))
    }

    /// Свёртка running-интервала в base_elapsed_ms; переход в Paused.
    /// None = сессия не была Running (ничего не изменено).
    pub(crate) fn freeze_if_running(&self, session: &TimerSession) -> Result<Option<u64>, String> {
        let mut state = session
            .state
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;

        let SessionState::Running {
            anchor_monotonic, ..
        } = &*state
        else {
            return Ok(None);
        };

        let delta = self.clock.monotonic_now().saturating_sub(*anchor_monotonic);
        let new_base = {
            let mut base = session
                .base_elapsed_ms
                .lock()
                .map_err(|e| format!("Mutex poisoned: {}", e))?;
            *base = base.saturating_add(delta.as_millis() as u64);
            *base
        };
        *state = SessionState::Paused;
        Ok(Some(new_base))
    }

    /// Запись в кэш best-effort: отказ логируется, переход не блокируется
    pub(crate) fn save_cache(&self, session: &TimerSession, patch: CachePatch) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.save(&session.owner_id, &session.record_id, &patch) {
            warn!(
                "[CACHE] Failed to save cache for record {}: {}",
                session.record_id, e
            );
        }
    }

    /// Удалённый патч best-effort: отказ логируется, локальное состояние уже
    /// обновлено; расхождение доживёт до следующей успешной reconciliation.
    pub(crate) async fn patch_remote(&self, session: &TimerSession, patch: RecordPatch) {
        let Some(store) = &self.store else {
            debug!(
                "[STORE] No remote store configured, skipping patch for record {}",
                session.record_id
            );
            return;
        };
        if session.record_id == UNSAVED_RECORD_ID {
            // Несохранённая запись: значения понесёт сам коммит
            debug!("[STORE] Record not persisted yet, skipping patch");
            return;
        }
        if let Err(e) = store.patch(&session.record_id, &patch).await {
            warn!(
                "[STORE] Patch failed for record {}: {}",
                session.record_id, e
            );
        }
    }
}
