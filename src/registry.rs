use crate::engine::TimerSession;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Явный реестр живых сессий процесса: record_id → сессия.
/// Ровно одна сессия на запись; хук коммита находит состояние здесь даже
/// без отрисованного виджета. Владеет реестром владелец движка —
/// никакого ambient-глобала.
pub struct InstanceRegistry {
    map: Mutex<HashMap<String, Arc<TimerSession>>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    // Poisoned map остаётся читаемой: реестр нужен хуку коммита,
    // которому нельзя падать
    fn lock_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<TimerSession>>> {
        self.map.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, record_id: &str) -> Option<Arc<TimerSession>> {
        self.lock_map().get(record_id).cloned()
    }

    /// Вставка заменяет существующую сессию той же записи (одна на запись)
    pub fn insert(&self, record_id: &str, session: Arc<TimerSession>) {
        self.lock_map().insert(record_id.to_string(), session);
    }

    pub fn remove(&self, record_id: &str) -> Option<Arc<TimerSession>> {
        self.lock_map().remove(record_id)
    }

    pub fn len(&self) -> usize {
        self.lock_map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_map().is_empty()
    }
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
