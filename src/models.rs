use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// Коды полей таймера в удалённой записи
pub const MODE_FIELD: &str = "Timer_Mode"; // 'Stopwatch' | 'Countdown'
pub const COUNTDOWN_SEC_FIELD: &str = "Countdown_Sec";
pub const STATUS_FIELD: &str = "Timer_Status"; // 'ready' | 'running' | 'paused'
pub const ELAPSED_MS_FIELD: &str = "Elapsed_ms"; // накопленные миллисекунды (строкой)
pub const STARTED_AT_FIELD: &str = "Started_At"; // RFC3339, пустая строка когда не running
pub const LAP_LOG_FIELD: &str = "Lap_Log";

/// Режим отображения/завершения таймера
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimerMode {
    Stopwatch,
    Countdown,
}

impl TimerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerMode::Stopwatch => "Stopwatch",
            TimerMode::Countdown => "Countdown",
        }
    }

    /// Неизвестное значение трактуем как Stopwatch (не фатально)
    pub fn parse(s: &str) -> Self {
        match s {
            "Countdown" => TimerMode::Countdown,
            _ => TimerMode::Stopwatch,
        }
    }
}

/// Авторитетный статус записи
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerStatus {
    Ready,
    Running,
    Paused,
}

impl TimerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerStatus::Ready => "ready",
            TimerStatus::Running => "running",
            TimerStatus::Paused => "paused",
        }
    }

    /// Неизвестное значение трактуем как ready (не фатально)
    pub fn parse(s: &str) -> Self {
        match s {
            "running" => TimerStatus::Running,
            "paused" => TimerStatus::Paused,
            _ => TimerStatus::Ready,
        }
    }
}

/// Поля записи, которые читает/пишет движок.
/// Все значения распарсены терпимо: мусор в числах → 0,
/// нечитаемый timestamp → None. Ошибки парсинга никогда не фатальны.
#[derive(Debug, Clone)]
pub struct RecordFields {
    pub mode: TimerMode,
    pub countdown_sec: u64,
    pub status: TimerStatus,
    pub elapsed_ms: u64,
    pub started_at_ms: Option<i64>,
    pub lap_log: String,
}

impl Default for RecordFields {
    fn default() -> Self {
        Self {
            mode: TimerMode::Stopwatch,
            countdown_sec: 0,
            status: TimerStatus::Ready,
            elapsed_ms: 0,
            started_at_ms: None,
            lap_log: String::new(),
        }
    }
}

impl RecordFields {
    /// Распарсить из wire-формата записи: { "<Field>": { "value": "<строка>" } }
    pub fn from_wire(record: &Value) -> Self {
        let field_str = |code: &str| -> Option<String> {
            record
                .get(code)
                .and_then(|f| f.get("value"))
                .and_then(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
        };

        let mode = field_str(MODE_FIELD)
            .map(|s| TimerMode::parse(&s))
            .unwrap_or(TimerMode::Stopwatch);
        let countdown_sec = field_str(COUNTDOWN_SEC_FIELD)
            .map(|s| parse_non_negative(&s))
            .unwrap_or(0);
        let status = field_str(STATUS_FIELD)
            .map(|s| TimerStatus::parse(&s))
            .unwrap_or(TimerStatus::Ready);
        let elapsed_ms = field_str(ELAPSED_MS_FIELD)
            .map(|s| parse_non_negative(&s))
            .unwrap_or(0);
        let started_at_ms = field_str(STARTED_AT_FIELD).and_then(|s| parse_timestamp_ms(&s));
        let lap_log = field_str(LAP_LOG_FIELD).unwrap_or_default();

        Self {
            mode,
            countdown_sec,
            status,
            elapsed_ms,
            started_at_ms,
            lap_log,
        }
    }

    /// Целевая длительность countdown в миллисекундах
    pub fn target_duration_ms(&self) -> u64 {
        self.countdown_sec.saturating_mul(1000)
    }

    /// Финализировать поля in-memory (коммит несёт значения сам, без PUT):
    /// status=ready, Started_At очищен, elapsed_ms — итоговое значение
    pub fn finalize(&mut self, final_elapsed_ms: u64) {
        self.status = TimerStatus::Ready;
        self.started_at_ms = None;
        self.elapsed_ms = final_elapsed_ms;
    }
}

/// Частичный патч записи. None = поле не трогаем.
/// started_at_ms: Some(None) = записать пустую строку (анкер снят).
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub status: Option<TimerStatus>,
    pub elapsed_ms: Option<u64>,
    pub started_at_ms: Option<Option<i64>>,
    pub lap_log: Option<String>,
}

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TimerStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn elapsed_ms(mut self, ms: u64) -> Self {
        self.elapsed_ms = Some(ms);
        self
    }

    pub fn started_at(mut self, wall_ms: i64) -> Self {
        self.started_at_ms = Some(Some(wall_ms));
        self
    }

    pub fn clear_started_at(mut self) -> Self {
        self.started_at_ms = Some(None);
        self
    }

    pub fn lap_log(mut self, log: String) -> Self {
        self.lap_log = Some(log);
        self
    }

    /// Wire-формат: только переданные поля, значения строками
    pub fn to_wire(&self) -> Value {
        let mut record = serde_json::Map::new();
        if let Some(status) = self.status {
            record.insert(
                STATUS_FIELD.to_string(),
                serde_json::json!({ "value": status.as_str() }),
            );
        }
        if let Some(ms) = self.elapsed_ms {
            record.insert(
                ELAPSED_MS_FIELD.to_string(),
                serde_json::json!({ "value": ms.to_string() }),
            );
        }
        if let Some(started) = &self.started_at_ms {
            let value = match started {
                Some(wall_ms) => wall_ms_to_rfc3339(*wall_ms),
                None => String::new(),
            };
            record.insert(
                STARTED_AT_FIELD.to_string(),
                serde_json::json!({ "value": value }),
            );
        }
        if let Some(log) = &self.lap_log {
            record.insert(
                LAP_LOG_FIELD.to_string(),
                serde_json::json!({ "value": log }),
            );
        }
        Value::Object(record)
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.elapsed_ms.is_none()
            && self.started_at_ms.is_none()
            && self.lap_log.is_none()
    }
}

/// Одна запись лапа: настенный момент + elapsed на этот момент
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LapEntry {
    pub wall_ms: i64,
    pub elapsed_ms: u64,
}

impl LapEntry {
    /// Человекочитаемая строка лога: "[<локальное время>] HH:MM:SS.cc\n"
    pub fn render_line(&self) -> String {
        let local = DateTime::<Utc>::from_timestamp_millis(self.wall_ms)
            .map(|dt| {
                dt.with_timezone(&Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            })
            .unwrap_or_else(|| "invalid time".to_string());
        format!("[{}] {}\n", local, format_ms(self.elapsed_ms as i64))
    }
}

/// Форматирование длительности для отображения и лога лапов:
/// HH:MM:SS.cc (сантисекунды). Отрицательное значение показываем как ноль.
pub fn format_ms(ms: i64) -> String {
    let ms = ms.max(0);
    let total_sec = ms / 1000;
    let h = total_sec / 3600;
    let m = (total_sec % 3600) / 60;
    let s = total_sec % 60;
    let cs = (ms % 1000) / 10;
    format!("{:02}:{:02}:{:02}.{:02}", h, m, s, cs)
}

/// Терпимый парсинг неотрицательного числа из строкового поля.
/// Дробные значения усекаются, мусор и отрицательные → 0.
pub(crate) fn parse_non_negative(s: &str) -> u64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0;
    }
    if let Ok(v) = trimmed.parse::<u64>() {
        return v;
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => v.floor() as u64,
        _ => 0,
    }
}

/// RFC3339 → unix ms. Пустая строка или мусор → None.
pub(crate) fn parse_timestamp_ms(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

pub(crate) fn wall_ms_to_rfc3339(wall_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(wall_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}
