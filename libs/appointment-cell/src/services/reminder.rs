// libs/appointment-cell/src/services/reminder.rs
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::models::AppointmentError;
use crate::services::booking::AppointmentBookingService;

const REFUND_RETRY_BATCH: i64 = 50;

/// Counts from one scheduler pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub reminders_sent: usize,
    pub reminders_failed: usize,
    pub refunds_completed: usize,
}

/// Background job that sends appointment reminders and retries pending
/// refunds. Each appointment gets at most one reminder.
pub struct ReminderScheduler {
    service: Arc<AppointmentBookingService>,
    period: Duration,
    running: Mutex<Option<RunningLoop>>,
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReminderScheduler {
    pub fn new(service: Arc<AppointmentBookingService>, period: Duration) -> Self {
        Self {
            service,
            period: period.max(Duration::from_secs(1)),
            running: Mutex::new(None),
        }
    }

    /// Spawns the loop. Calling it while already running is a no-op.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            warn!("Reminder scheduler is already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let service = Arc::clone(&self.service);
        let period = self.period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match run_tick(&service).await {
                            Ok(report) if report != TickReport::default() => {
                                info!(
                                    "Reminder pass: {} sent, {} failed, {} refunds completed",
                                    report.reminders_sent, report.reminders_failed, report.refunds_completed
                                );
                            }
                            Ok(_) => debug!("Reminder pass found nothing to do"),
                            Err(e) => error!("Reminder pass failed: {}", e),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Reminder loop stopping due to shutdown");
                            break;
                        }
                    }
                }
            }
        });

        info!("Reminder scheduler started with period {:?}", period);
        *running = Some(RunningLoop { shutdown, handle });
    }

    /// Signals the loop and waits for the in-flight pass to finish.
    pub async fn stop(&self) {
        let Some(RunningLoop { shutdown, handle }) = self.running.lock().await.take() else {
            return;
        };

        let _ = shutdown.send(true);
        if let Err(e) = handle.await {
            error!("Reminder loop ended abnormally: {}", e);
        }
        info!("Reminder scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// One pass, outside the timer.
    pub async fn run_once(&self) -> Result<TickReport, AppointmentError> {
        run_tick(&self.service).await
    }
}

#[instrument(skip(service))]
async fn run_tick(service: &AppointmentBookingService) -> Result<TickReport, AppointmentError> {
    let mut report = TickReport::default();
    let now = service.clock.now();
    // Keyset paging: rows that keep failing must not hide the ones behind them.
    let mut after = None;

    loop {
        let due = service.due_reminders(now, after).await?;
        let Some(last) = due.last() else {
            break;
        };
        after = Some((last.appointment_date, last.id));

        for appointment in due {
            if let Err(e) = service.send_reminder(&appointment).await {
                warn!("Reminder for appointment {} not delivered: {}", appointment.id, e);
                report.reminders_failed += 1;
                continue;
            }

            match service.mark_reminder_sent(appointment.id).await {
                Ok(_) => report.reminders_sent += 1,
                Err(e) => {
                    warn!("Reminder for appointment {} sent but not recorded: {}", appointment.id, e);
                    report.reminders_failed += 1;
                }
            }
        }
    }

    report.refunds_completed = service.retry_pending_refunds(REFUND_RETRY_BATCH).await?;
    Ok(report)
}
