use crate::engine::{SessionSnapshot, TimerEngine, TimerSession};
use crate::models::TimerStatus;
use notify_rust::{Notification, Urgency};
use scopeguard::guard;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Фиксированный шаг перерисовки пока сессия Running
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// События для слоя отображения (отрисовка — внешний коллаборатор)
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Периодический пересчёт; base_elapsed_ms не мутируется
    Tick(SessionSnapshot),
    /// Countdown дошёл до цели; значение уже заморожено и сохранено
    CountdownFinished { record_id: String, frozen_ms: u64 },
}

/// Тикер: ведёт периодическую перерисовку, пока сессия Running.
/// На каждую сессию не больше одного цикла (single-flight через AtomicBool);
/// цикл гаснет ровно тогда, когда статус уходит из Running (Pause, Stop,
/// автозавершение) или при teardown, и никогда не остаётся висеть.
pub struct Scheduler {
    engine: Arc<TimerEngine>,
    events: mpsc::UnboundedSender<SessionEvent>,
    /// Поднимать ли десктопное уведомление при завершении countdown
    desktop_notify: bool,
}

impl Scheduler {
    pub fn new(engine: Arc<TimerEngine>) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                engine,
                events: tx,
                desktop_notify: true,
            },
            rx,
        )
    }

    pub fn without_desktop_notify(mut self) -> Self {
        self.desktop_notify = false;
        self
    }

    /// Запустить цикл тиков для сессии. Уже идущий цикл — no-op.
    pub fn spawn_ticker(&self, session: &Arc<TimerSession>) {
        if session
            .ticking
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!(
                "[TICK] Ticker already running for record {}",
                session.record_id()
            );
            return;
        }

        let engine = self.engine.clone();
        let events = self.events.clone();
        let session = session.clone();
        let desktop_notify = self.desktop_notify;

        tokio::spawn(async move {
            // Флаг освобождается на любом пути выхода, включая панику
            let flag = session.clone();
            let _guard = guard((), move |_| {
                flag.ticking.store(false, Ordering::Release);
            });

            loop {
                // Teardown сбрасывает флаг извне
                if !session.ticking.load(Ordering::Acquire) {
                    break;
                }
                // Отмена ровно в момент ухода из Running
                match session.status() {
                    Ok(TimerStatus::Running) => {}
                    Ok(_) => break,
                    Err(e) => {
                        warn!("[TICK] Ticker for record {} lost state: {}", session.record_id(), e);
                        break;
                    }
                }

                match engine.snapshot(&session) {
                    Ok(snapshot) => {
                        let _ = events.send(SessionEvent::Tick(snapshot));
                    }
                    Err(e) => {
                        warn!(
                            "[TICK] Snapshot failed for record {}: {}",
                            session.record_id(),
                            e
                        );
                        break;
                    }
                }

                // Завершение countdown ловится жадно на тике,
                // а не лениво при следующем явном переходе
                match engine.countdown_expired(&session) {
                    Ok(true) => {
                        match engine.auto_terminate_countdown(&session).await {
                            Ok(Some(frozen_ms)) => {
                                let _ = events.send(SessionEvent::CountdownFinished {
                                    record_id: session.record_id().to_string(),
                                    frozen_ms,
                                });
                                if desktop_notify {
                                    notify_countdown_finished(session.record_id());
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                warn!(
                                    "[TICK] Auto-terminate failed for record {}: {}",
                                    session.record_id(),
                                    e
                                );
                            }
                        }
                        break;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!(
                            "[TICK] Countdown check failed for record {}: {}",
                            session.record_id(),
                            e
                        );
                        break;
                    }
                }

                tokio::time::sleep(TICK_INTERVAL).await;
            }

            debug!("[TICK] Ticker stopped for record {}", session.record_id());
        });
    }

    /// Visibility-regain: немедленный пересчёт и перерисовка без мутации
    /// base_elapsed_ms — коррекция дрейфа отображения за время,
    /// пока тики подавлялись в фоне
    pub fn refresh(&self, session: &TimerSession) -> Result<SessionSnapshot, String> {
        let snapshot = self.engine.snapshot(session)?;
        let _ = self.events.send(SessionEvent::Tick(snapshot.clone()));
        Ok(snapshot)
    }
}

fn notify_countdown_finished(record_id: &str) {
    let _ = Notification::new()
        .summary("Countdown finished")
        .body(&format!("Timer for record {} reached its target.", record_id))
        .appname("rectimer")
        .icon("alarm-clock")
        .urgency(Urgency::Normal)
        .show();
}
