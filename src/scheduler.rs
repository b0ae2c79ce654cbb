//! Periodic background work: the retention sweep and the reminder poll.
//!
//! Each task exposes a single `tick` so tests can drive it without timers.
//! [`Scheduler::start`] runs every task once immediately and then on its
//! own interval until [`SchedulerHandle::stop`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::clock::ShopClock;
use crate::config::ReminderConfig;
use crate::notify::{reminder_email, Mailer};
use crate::reservations;

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;
    /// Must not panic; errors are logged and end the tick.
    async fn run_tick(&self);
}

pub struct RetentionSweeper {
    pool: SqlitePool,
    clock: ShopClock,
}

impl RetentionSweeper {
    pub fn new(pool: SqlitePool, clock: ShopClock) -> Self {
        Self { pool, clock }
    }

    /// Deletes reservations whose instant has passed. Returns how many.
    pub async fn tick(&self) -> u64 {
        let now = self.clock.now_string();
        match reservations::delete_elapsed(&self.pool, &now).await {
            Ok(0) => {
                debug!("retention sweep at {}: nothing to delete", now);
                0
            }
            Ok(deleted) => {
                info!("retention sweep at {}: deleted {} elapsed reservations", now, deleted);
                deleted
            }
            Err(e) => {
                error!("retention sweep failed: {}", e);
                0
            }
        }
    }
}

#[async_trait]
impl PeriodicTask for RetentionSweeper {
    fn name(&self) -> &'static str {
        "retention-sweep"
    }

    async fn run_tick(&self) {
        self.tick().await;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReminderReport {
    pub due: usize,
    pub sent: usize,
    pub failed: usize,
}

pub struct ReminderScheduler {
    pool: SqlitePool,
    clock: ShopClock,
    mailer: Arc<dyn Mailer>,
    window: ReminderConfig,
    shop_name: String,
}

impl ReminderScheduler {
    pub fn new(
        pool: SqlitePool,
        clock: ShopClock,
        mailer: Arc<dyn Mailer>,
        window: ReminderConfig,
        shop_name: String,
    ) -> Self {
        Self {
            pool,
            clock,
            mailer,
            window,
            shop_name,
        }
    }

    /// Mails every unsent reservation inside `[now + min, now + max]`.
    ///
    /// A failed send leaves `reminder_sent` false, so the reservation is
    /// retried on the next poll for as long as it stays in the window.
    pub async fn tick(&self) -> ReminderReport {
        let from = self.clock.offset_string(self.window.min_lead_minutes);
        let until = self.clock.offset_string(self.window.max_lead_minutes);
        let due = match reservations::due_for_reminder(&self.pool, &from, &until).await {
            Ok(due) => due,
            Err(e) => {
                error!("reminder poll failed: {}", e);
                return ReminderReport::default();
            }
        };

        let mut report = ReminderReport {
            due: due.len(),
            ..ReminderReport::default()
        };
        let lead = (self.window.min_lead_minutes + self.window.max_lead_minutes) / 2;
        for reservation in due {
            let email = reminder_email(&reservation, &self.shop_name, lead);
            if let Err(e) = self.mailer.send_email(email).await {
                error!(
                    "Failed to send reminder to {} (reservation #{}): {}",
                    reservation.email, reservation.id, e
                );
                report.failed += 1;
                continue;
            }
            report.sent += 1;
            match reservations::mark_reminder_sent(&self.pool, reservation.id).await {
                Ok(true) => {}
                Ok(false) => warn!("reservation #{} was already reminded or deleted", reservation.id),
                Err(e) => error!(
                    "Failed to mark reservation #{} as reminded: {}",
                    reservation.id, e
                ),
            }
        }

        if report.due > 0 {
            info!(
                "reminder poll [{} .. {}]: {} due, {} sent, {} failed",
                from, until, report.due, report.sent, report.failed
            );
        } else {
            debug!("reminder poll [{} .. {}]: nothing due", from, until);
        }
        report
    }
}

#[async_trait]
impl PeriodicTask for ReminderScheduler {
    fn name(&self) -> &'static str {
        "reminders"
    }

    async fn run_tick(&self) {
        self.tick().await;
    }
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<(Arc<dyn PeriodicTask>, Duration)>,
}

pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    pub fn every(mut self, period: Duration, task: Arc<dyn PeriodicTask>) -> Self {
        self.tasks.push((task, period));
        self
    }

    pub fn start(self) -> SchedulerHandle {
        let (shutdown, _) = watch::channel(false);
        let workers = self
            .tasks
            .into_iter()
            .map(|(task, period)| spawn_periodic(task, period, shutdown.subscribe()))
            .collect();
        SchedulerHandle { shutdown, workers }
    }
}

impl SchedulerHandle {
    /// Signals every task and waits for the ticks in flight to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                error!("scheduled task ended abnormally: {}", e);
            }
        }
    }
}

fn spawn_periodic(
    task: Arc<dyn PeriodicTask>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("starting {} every {:?}", task.name(), period);
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                // the first tick completes immediately: the startup run
                _ = ticker.tick() => task.run_tick().await,
                _ = shutdown.changed() => break,
            }
        }
        info!("stopped {}", task.name());
    })
}
