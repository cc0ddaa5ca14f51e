use crate::cache::LocalCache;
use crate::clock::Clock;
use crate::models::{LapEntry, TimerMode, TimerStatus};
use crate::registry::InstanceRegistry;
use crate::store::RecordStoreClient;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mod core;
mod reconcile;

/// Идентификатор ещё не сохранённой записи (экран создания):
/// удалённых патчей для неё не бывает, значения понесёт сам коммит
pub const UNSAVED_RECORD_ID: &str = "create";

/// Состояние сессии - строгая FSM.
/// Анкер существует только внутри Running - "анкер без running" непредставим.
#[derive(Debug, Clone)]
pub enum SessionState {
    /// Значение зафиксировано (после Stop/Reset либо свежая запись)
    Ready,
    /// Идёт отсчёт; анкер снят с обоих источников времени
    Running {
        anchor_monotonic: Duration, // для расчёта интервала
        anchor_wall_ms: i64,        // для персистентности/API
    },
    /// Отсчёт приостановлен, можно продолжить
    Paused,
}

impl SessionState {
    pub fn status(&self) -> TimerStatus {
        match self {
            SessionState::Ready => TimerStatus::Ready,
            SessionState::Running { .. } => TimerStatus::Running,
            SessionState::Paused => TimerStatus::Paused,
        }
    }
}

/// Живая сессия таймера одной записи.
/// Ровно одна на пару (owner, record) — инвариант держит InstanceRegistry.
pub struct TimerSession {
    pub(crate) owner_id: String,
    pub(crate) record_id: String,
    pub(crate) mode: Mutex<TimerMode>,
    pub(crate) countdown_sec: Mutex<u64>,
    pub(crate) state: Mutex<SessionState>,
    /// Накопленная длительность на последний не-running момент
    pub(crate) base_elapsed_ms: Mutex<u64>,
    /// Лапы, снятые в этом процессе
    pub(crate) laps: Mutex<Vec<LapEntry>>,
    /// Зеркало текста удалённого поля лога (append-only)
    pub(crate) lap_text: Mutex<String>,
    /// Single-flight флаг тикера; сброс также гасит цикл при teardown
    pub(crate) ticking: AtomicBool,
}

impl TimerSession {
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn status(&self) -> Result<TimerStatus, String> {
        let state = self
            .state
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;
        Ok(state.status())
    }

    pub fn mode(&self) -> Result<TimerMode, String> {
        let mode = self
            .mode
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;
        Ok(*mode)
    }

    pub fn countdown_sec(&self) -> Result<u64, String> {
        let sec = self
            .countdown_sec
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;
        Ok(*sec)
    }

    /// Целевая длительность countdown в миллисекундах
    pub fn target_duration_ms(&self) -> Result<u64, String> {
        Ok(self.countdown_sec()?.saturating_mul(1000))
    }

    pub fn laps(&self) -> Result<Vec<LapEntry>, String> {
        let laps = self
            .laps
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;
        Ok(laps.clone())
    }

    pub fn lap_text(&self) -> Result<String, String> {
        let text = self
            .lap_text
            .lock()
            .map_err(|e| format!("Mutex poisoned: {}", e))?;
        Ok(text.clone())
    }
}

/// Снимок сессии для отображения (без анкеров)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: TimerStatus,
    pub mode: TimerMode,
    /// Текущий elapsed (никогда не клампится)
    pub elapsed_ms: u64,
    pub base_elapsed_ms: u64,
    /// Остаток до цели; None в режиме секундомера.
    /// Клампится в [0, target] — только для отображения.
    pub remaining_ms: Option<u64>,
    /// Готовая строка HH:MM:SS.cc (остаток для countdown, elapsed иначе)
    pub display: String,
    /// Unix ms начала текущего running-интервала (только для Running)
    pub session_start_ms: Option<i64>,
}

/// Движок сверки таймеров: комбинирует Clock, LocalCache и удалённое
/// хранилище в трёх точках — загрузка, явные переходы, финализация коммита.
/// Кэш и стор опциональны: без них движок работает чисто в памяти
/// (несохранённая запись, тесты).
pub struct TimerEngine {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cache: Option<Arc<LocalCache>>,
    pub(crate) store: Option<Arc<RecordStoreClient>>,
    pub(crate) registry: Arc<InstanceRegistry>,
}

impl TimerEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            cache: None,
            store: None,
            registry: Arc::new(InstanceRegistry::new()),
        }
    }

    pub fn with_cache(mut self, cache: Arc<LocalCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_store(mut self, store: Arc<RecordStoreClient>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
