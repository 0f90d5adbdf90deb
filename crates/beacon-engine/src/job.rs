use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use beacon_core::{
    all_ok,
    types::{QueryMetacardData, QueryResults, RepetitionUnit, ScheduleSpec},
    Failure, Fallible, FallibleExt,
};
use beacon_delivery::{resolve_destination, ChannelRegistry, PreferencesStore};
use beacon_scheduler::{Continuation, JobHandle, RunningJobRegistry, ScheduledTask};

use crate::catalog::QueryRunner;

/// Collaborators shared by every scheduled job of one engine.
pub struct JobContext {
    pub registry: Arc<dyn RunningJobRegistry>,
    pub queries: QueryRunner,
    pub preferences: Arc<dyn PreferencesStore>,
    pub channels: Arc<ChannelRegistry>,
    pub timers: LocalTimers,
}

/// Handles of the timers this process started, by query id and activation token.
#[derive(Default)]
pub struct LocalTimers {
    handles: DashMap<String, Vec<(Uuid, Box<dyn JobHandle>)>>,
}

impl LocalTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the timers of one activation, dropping any that already finished.
    pub fn track(&self, query_id: &str, token: Uuid, started: Vec<Box<dyn JobHandle>>) {
        let mut entry = self.handles.entry(query_id.to_string()).or_default();
        entry.retain(|(_, handle)| !handle.is_finished());
        entry.extend(started.into_iter().map(|handle| (token, handle)));
    }

    /// Forget the timers of the activation holding `token`, once it stopped on its own.
    pub fn release(&self, query_id: &str, token: Uuid) {
        if let Some(mut entry) = self.handles.get_mut(query_id) {
            entry.retain(|(owner, _)| *owner != token);
        }
        self.handles.remove_if(query_id, |_, timers| timers.is_empty());
    }

    /// Cancel and forget every timer of `query_id`. Returns how many there were.
    pub fn cancel_all(&self, query_id: &str) -> usize {
        let Some((_, timers)) = self.handles.remove(query_id) else {
            return 0;
        };
        for (_, handle) in &timers {
            handle.cancel();
        }
        timers.len()
    }

    /// Timers still running for `query_id`.
    pub fn count(&self, query_id: &str) -> usize {
        self.handles.get(query_id).map_or(0, |timers| {
            timers.iter().filter(|(_, h)| !h.is_finished()).count()
        })
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The registry no longer holds this job's token.
    Inactive,
    /// The schedule's start time has not been reached.
    BeforeStart,
    /// Fewer than `interval_amount` units since the last firing.
    Waiting,
    /// The query ran and every destination received the results.
    Delivered,
    /// The query or at least one delivery failed.
    Failed(Failure),
}

/// One enabled schedule of one stored query, driven by a timer.
pub struct ScheduledQueryJob {
    ctx: Arc<JobContext>,
    query: QueryMetacardData,
    schedule: ScheduleSpec,
    /// Written into the registry at activation; the job is live only while it is still there.
    token: Uuid,
    last_fired: Mutex<Option<DateTime<Utc>>>,
}

impl ScheduledQueryJob {
    pub fn new(
        ctx: Arc<JobContext>,
        query: QueryMetacardData,
        schedule: ScheduleSpec,
        token: Uuid,
    ) -> Self {
        Self {
            ctx,
            query,
            schedule,
            token,
            last_fired: Mutex::new(None),
        }
    }

    pub fn query_id(&self) -> &str {
        &self.query.id
    }

    /// Whether the registry still holds this job's token.
    ///
    /// A registry that cannot be read counts as live, so an outage does not
    /// silently stop every job.
    fn is_live(&self) -> bool {
        match self.ctx.registry.get(&self.query.id) {
            Ok(Some(marker)) => marker.token == self.token,
            Ok(None) => false,
            Err(e) => {
                warn!(query_id = %self.query.id, error = %e, "registry unreadable; assuming job is live");
                true
            }
        }
    }

    /// Decide whether to fire at `now`, and fire if so.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> TickOutcome {
        if !self.is_live() {
            return TickOutcome::Inactive;
        }
        if now < self.schedule.start {
            return TickOutcome::BeforeStart;
        }

        let now = to_minute(now);
        {
            let mut last_fired = self.last_fired.lock().expect("last_fired lock poisoned");
            if let Some(last) = *last_fired {
                if units_between(self.schedule.interval_unit, last, now)
                    < i64::from(self.schedule.interval_amount)
                {
                    return TickOutcome::Waiting;
                }
            }
            *last_fired = Some(now);
        }

        let outcome = match self.ctx.queries.run(&self.query.cql).await {
            Ok(results) => self.deliver_all(&results).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => TickOutcome::Delivered,
            Err(e) => TickOutcome::Failed(e),
        }
    }

    /// Deliver to every destination of the schedule, whatever happens to the others.
    pub async fn deliver_all(&self, results: &QueryResults) -> Fallible {
        let mut outcomes = Vec::with_capacity(self.schedule.delivery_ids.len());
        for delivery_id in &self.schedule.delivery_ids {
            outcomes.push(self.deliver_to(delivery_id, results).await);
        }
        all_ok(outcomes)
    }

    async fn deliver_to(&self, delivery_id: &str, results: &QueryResults) -> Fallible {
        let username = &self.schedule.username;
        let destination = resolve_destination(self.ctx.preferences.as_ref(), username, delivery_id)
            .await
            .prepend_to_error(format!(
                "There was a problem retrieving the delivery information with ID \"{delivery_id}\" for user '{username}': "
            ))?;

        self.ctx
            .channels
            .deliver(&destination, &self.query, results, username)
            .await
            .prepend_to_error(format!(
                "There was a problem delivering query results to delivery info with ID \"{delivery_id}\" for user '{username}': "
            ))
    }

    /// Whether the job should stop given the timer's next fire time.
    fn stop_reason(&self, next: Option<DateTime<Utc>>) -> Option<&'static str> {
        match next {
            None => Some("no further fire time"),
            Some(at) if at > self.schedule.end => Some("next fire time is past the end time"),
            _ if !self.is_live() => Some("no longer registered"),
            _ => None,
        }
    }
}

#[async_trait]
impl ScheduledTask for ScheduledQueryJob {
    async fn tick(&self, now: DateTime<Utc>) {
        match self.run_tick(now).await {
            TickOutcome::Delivered => {
                info!(query_id = %self.query.id, destinations = self.schedule.delivery_ids.len(), "scheduled query delivered")
            }
            TickOutcome::Failed(e) => {
                error!(query_id = %self.query.id, error = %e, "scheduled query run failed")
            }
            other => debug!(query_id = %self.query.id, outcome = ?other, "tick skipped"),
        }
    }

    async fn after_tick(&self, next: Option<DateTime<Utc>>) -> Continuation {
        let Some(reason) = self.stop_reason(next) else {
            return Continuation::Continue;
        };

        if let Err(e) = self.ctx.registry.remove_if_owned(&self.query.id, self.token) {
            warn!(query_id = %self.query.id, error = %e, "failed to clear registry entry");
        }
        self.ctx.timers.release(&self.query.id, self.token);
        info!(query_id = %self.query.id, reason, "scheduled query terminated");
        Continuation::Stop
    }
}

fn to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(at)
}

/// Whole `unit`s elapsed from `from` to `to`.
///
/// Minutes to weeks count elapsed wall-clock time; months and years count
/// calendar boundaries crossed.
fn units_between(unit: RepetitionUnit, from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let elapsed = to - from;
    match unit {
        RepetitionUnit::Minutes => elapsed.num_minutes(),
        RepetitionUnit::Hours => elapsed.num_hours(),
        RepetitionUnit::Days => elapsed.num_days(),
        RepetitionUnit::Weeks => elapsed.num_days() / 7,
        RepetitionUnit::Months => {
            let months = |t: DateTime<Utc>| i64::from(t.year()) * 12 + i64::from(t.month0());
            months(to) - months(from)
        }
        RepetitionUnit::Years => i64::from(to.year() - from.year()),
    }
}
