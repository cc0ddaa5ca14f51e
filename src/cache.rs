use rusqlite::{params, Connection, Error::InvalidParameterName, Result as SqliteResult};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

use crate::models::TimerMode;

/// Log IO-related cache errors for easier diagnosis (disk full, permission denied).
/// Does not change error propagation — caller still returns Err.
fn log_io_error_if_any(context: &str, e: &rusqlite::Error) {
    use rusqlite::ffi::ErrorCode;
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = e {
        match ffi_err.code {
            ErrorCode::DiskFull => {
                error!(
                    "[CACHE] {}: Disk full. Free space on drive or check app data directory.",
                    context
                );
            }
            ErrorCode::ReadOnly | ErrorCode::CannotOpen => {
                error!(
                    "[CACHE] {}: Permission denied or read-only. Check cache directory is writable.",
                    context
                );
            }
            ErrorCode::SystemIoFailure => {
                error!("[CACHE] {}: I/O error. Check disk and permissions.", context);
            }
            _ => {}
        }
    }
}

/// Локальный эфемерный кэш таймера: по одной строке на пару (owner, record).
/// Переживает перезагрузку страницы, но НЕ авторитетен — источник истины
/// остаётся в удалённой записи.
pub struct LocalCache {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

/// Снимок кэша. Отсутствующая колонка = ключ ни разу не сохранялся.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachedTimer {
    pub base_elapsed_ms: Option<u64>,
    pub mode: Option<TimerMode>,
    pub countdown_sec: Option<u64>,
}

/// Частичная запись в кэш: merge-on-write, перезаписываются только
/// переданные ключи
#[derive(Debug, Clone, Default)]
pub struct CachePatch {
    pub base_elapsed_ms: Option<u64>,
    pub mode: Option<TimerMode>,
    pub countdown_sec: Option<u64>,
}

impl CachePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_elapsed_ms(mut self, ms: u64) -> Self {
        self.base_elapsed_ms = Some(ms);
        self
    }

    pub fn mode(mut self, mode: TimerMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn countdown_sec(mut self, sec: u64) -> Self {
        self.countdown_sec = Some(sec);
        self
    }
}

impl LocalCache {
    /// Безопасная блокировка соединения с обработкой poisoned mutex
    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, rusqlite::Error> {
        self.conn.lock().map_err(|e| {
            InvalidParameterName(format!(
                "Cache mutex poisoned: {}. A panic occurred while holding the lock.",
                e
            ))
        })
    }

    pub fn new(db_path: &str) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        // GUARD: Integrity check on startup — detect corruption before init
        let integrity: String = conn
            .query_row("PRAGMA integrity_check", [], |r| r.get(0))
            .map_err(|e| InvalidParameterName(format!("Integrity check failed: {}", e)))?;
        if integrity.to_lowercase() != "ok" {
            return Err(InvalidParameterName(format!(
                "Cache corruption detected: {}",
                integrity
            )));
        }

        // WAL для защиты от corruption при внезапном завершении
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| {
                warn!(
                    "[CACHE] Failed to enable WAL mode: {}. Continuing with default journal mode.",
                    e
                );
            })
            .ok();
        let _ = conn.pragma_update(None, "synchronous", "NORMAL");
        let _ = conn.pragma_update(None, "temp_store", "MEMORY");

        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cache.run_migrations()?;
        Ok(cache)
    }

    /// Кэш в памяти (для тестов)
    pub fn in_memory() -> SqliteResult<Self> {
        let conn = Connection::open_in_memory()?;
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cache.run_migrations()?;
        Ok(cache)
    }

    /// Current schema version (PRAGMA user_version). Bump when adding migrations.
    const SCHEMA_VERSION: i32 = 2;

    /// Versioned migrations using SQLite user_version pragma.
    fn run_migrations(&self) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let current: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;

        if current < 1 {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS timer_cache (
                owner_id TEXT NOT NULL,
                record_id TEXT NOT NULL,
                base_elapsed_ms INTEGER,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (owner_id, record_id)
            )",
                [],
            )?;
        }

        // Migration 2: кэшируем выбор режима и countdown секунд (idempotent ALTER)
        if current < 2 {
            let _ = conn.execute("ALTER TABLE timer_cache ADD COLUMN mode TEXT", []);
            let _ = conn.execute("ALTER TABLE timer_cache ADD COLUMN countdown_sec INTEGER", []);
        }

        conn.pragma_update(None, "user_version", Self::SCHEMA_VERSION)?;
        Ok(())
    }

    /// Прочитать снимок кэша. Нет строки = пустой снимок (не ошибка).
    pub fn load(&self, owner_id: &str, record_id: &str) -> SqliteResult<CachedTimer> {
        let conn = self.lock_conn()?;

        let mut stmt = conn.prepare(
            "SELECT base_elapsed_ms, mode, countdown_sec FROM timer_cache
             WHERE owner_id = ?1 AND record_id = ?2",
        )?;

        let result = stmt.query_map(params![owner_id, record_id], |row| {
            Ok(CachedTimer {
                base_elapsed_ms: row.get::<_, Option<i64>>(0)?.map(|v| v.max(0) as u64),
                mode: row
                    .get::<_, Option<String>>(1)?
                    .map(|s| TimerMode::parse(&s)),
                countdown_sec: row.get::<_, Option<i64>>(2)?.map(|v| v.max(0) as u64),
            })
        })?;

        for row in result {
            return Ok(row?);
        }

        Ok(CachedTimer::default())
    }

    /// Merge-on-write: перезаписываются только переданные ключи,
    /// остальные сохраняют прежнее значение (COALESCE на UPSERT).
    pub fn save(&self, owner_id: &str, record_id: &str, patch: &CachePatch) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        let now = chrono::Utc::now().timestamp();

        let result = conn.execute(
            "INSERT INTO timer_cache (owner_id, record_id, base_elapsed_ms, mode, countdown_sec, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(owner_id, record_id) DO UPDATE SET
                base_elapsed_ms = COALESCE(?3, timer_cache.base_elapsed_ms),
                mode = COALESCE(?4, timer_cache.mode),
                countdown_sec = COALESCE(?5, timer_cache.countdown_sec),
                updated_at = ?6",
            params![
                owner_id,
                record_id,
                patch.base_elapsed_ms.map(|v| v as i64),
                patch.mode.map(|m| m.as_str()),
                patch.countdown_sec.map(|v| v as i64),
                now
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                log_io_error_if_any("save", &e);
                error!("[CACHE] Failed to save timer cache: {}", e);
                Err(e)
            }
        }
    }

    /// Удалить строку кэша (при teardown виджета запись остаётся,
    /// этот метод — для явной очистки)
    pub fn remove(&self, owner_id: &str, record_id: &str) -> SqliteResult<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM timer_cache WHERE owner_id = ?1 AND record_id = ?2",
            params![owner_id, record_id],
        )?;
        Ok(())
    }
}
