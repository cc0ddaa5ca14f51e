use chrono::Utc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Источник времени для движка таймера.
/// monotonic_now() — строго неубывающая отметка, не подвержена правкам
/// системных часов (NTP, DST). Используется ТОЛЬКО для измерения интервала
/// внутри запущенной сессии. wall_now_ms() — абсолютный unix timestamp,
/// используется для персистентности между перезапусками и для отображения.
/// Запущенный интервал никогда не считается по wall-clock дельтам.
pub trait Clock: Send + Sync {
    /// Монотонная отметка от произвольной начальной точки
    fn monotonic_now(&self) -> Duration;
    /// Unix timestamp в миллисекундах
    fn wall_now_ms(&self) -> i64;
}

/// Системные часы: Instant (монотонные) + chrono::Utc (настенные)
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn monotonic_now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn wall_now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Управляемые часы для детерминированных тестов.
/// Монотонное и настенное время двигаются независимо:
/// advance() двигает оба, jump_wall_ms() — только настенное
/// (имитация перевода системных часов во время работы таймера).
pub struct ManualClock {
    inner: Mutex<ManualState>,
}

struct ManualState {
    monotonic: Duration,
    wall_ms: i64,
}

impl ManualClock {
    pub fn new(wall_ms: i64) -> Self {
        Self {
            inner: Mutex::new(ManualState {
                monotonic: Duration::ZERO,
                wall_ms,
            }),
        }
    }

    /// Продвинуть оба источника времени вперёд
    pub fn advance(&self, delta: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.monotonic += delta;
        inner.wall_ms += delta.as_millis() as i64;
    }

    /// Сдвинуть только настенные часы (монотонные не трогаем)
    pub fn jump_wall_ms(&self, delta_ms: i64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.wall_ms += delta_ms;
    }
}

impl Clock for ManualClock {
    fn monotonic_now(&self) -> Duration {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .monotonic
    }

    fn wall_now_ms(&self) -> i64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).wall_ms
    }
}
