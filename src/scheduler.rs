use std::time::Duration;

use chrono::{prelude::*, Duration as ChronoDuration};
use chrono_tz::Tz;
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tracing::{error, info, warn};

use crate::{
    configuration::SchedulerSettings,
    server::{handover::run_auto_finalize, settlement::run_settlement_job, AppState},
};

/// in process worker running the daily auto finalization and the monthly settlement.
/// times are evaluated in the business time zone.
pub struct Scheduler {
    state: AppState,
    tick: Duration,
    tz: Tz,
    auto_finalize_at: NaiveTime,
    settlement_day_of_month: u32,
    settlement_at: NaiveTime,
    last_auto_finalize: Option<NaiveDate>,
    last_settlement: Option<NaiveDate>,
}

impl Scheduler {
    pub fn new(state: AppState, settings: &SchedulerSettings, tz: Tz) -> Self {
        Self {
            state,
            tick: Duration::from_secs(settings.tick_seconds.max(1)),
            tz,
            auto_finalize_at: settings.auto_finalize_time(),
            settlement_day_of_month: settings.settlement_day_of_month,
            settlement_at: settings.settlement_time(),
            last_auto_finalize: None,
            last_settlement: None,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run_loop())
    }

    async fn run_loop(mut self) {
        info!(
            "scheduler started, tick {:?}, auto finalize at {}, settlement on day {} at {}",
            self.tick, self.auto_finalize_at, self.settlement_day_of_month, self.settlement_at
        );
        let mut interval = time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let now_local = Utc::now().with_timezone(&self.tz).naive_local();
            self.run_due_jobs(now_local).await;
        }
    }

    async fn run_due_jobs(&mut self, now_local: NaiveDateTime) {
        let today = now_local.date();
        if is_due(now_local, self.auto_finalize_at, self.last_auto_finalize) {
            match run_auto_finalize(&self.state, today).await {
                Ok(Some(summary)) => {
                    info!("auto finalize finished: {summary:?}");
                    self.last_auto_finalize = Some(today);
                }
                Ok(None) => {
                    warn!("auto finalize skipped, lock is held by another run");
                    self.last_auto_finalize = Some(today);
                }
                Err(e) => error!("auto finalize failed, retry on next tick: {e}"),
            }
        }
        if is_monthly_due(
            now_local,
            self.settlement_day_of_month,
            self.settlement_at,
            self.last_settlement,
        ) {
            let (from, to) = previous_month(today);
            match run_settlement_job(&self.state, from, to).await {
                Ok(Some(outcome)) => {
                    info!("settlement {from}..{to} finished: {outcome:?}");
                    self.last_settlement = Some(today);
                }
                Ok(None) => {
                    warn!("settlement {from}..{to} skipped, lock is held by another run");
                    self.last_settlement = Some(today);
                }
                Err(e) => error!("settlement {from}..{to} failed, retry on next tick: {e}"),
            }
        }
    }
}

/// once per local date, as soon as the local time reaches `at`
pub fn is_due(now_local: NaiveDateTime, at: NaiveTime, last_run: Option<NaiveDate>) -> bool {
    if now_local.time() < at {
        return false;
    }
    last_run.map_or(true, |last| last < now_local.date())
}

/// once per month, from `day` at `at` on, so a missed day is caught up later in the month
pub fn is_monthly_due(
    now_local: NaiveDateTime,
    day: u32,
    at: NaiveTime,
    last_run: Option<NaiveDate>,
) -> bool {
    let today = now_local.date();
    if today.day() < day || (today.day() == day && now_local.time() < at) {
        return false;
    }
    last_run.map_or(true, |last| {
        (last.year(), last.month()) != (today.year(), today.month())
    })
}

/// first and last day of the calendar month before `date`
pub fn previous_month(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first_of_month = date - ChronoDuration::days(i64::from(date.day0()));
    let last = first_of_month - ChronoDuration::days(1);
    let first = last - ChronoDuration::days(i64::from(last.day0()));
    (first, last)
}
