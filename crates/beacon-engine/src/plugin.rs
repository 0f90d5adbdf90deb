use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use beacon_core::{
    all_ok,
    config::{BeaconConfig, RegistryBackend},
    fail, retry,
    types::{QueryMetacardData, ScheduleRecord, ScheduleSpec},
    Failure, Fallible, FallibleExt, RetryPolicy,
};
use beacon_delivery::{ChannelRegistry, EmailChannel, PreferencesStore};
use beacon_scheduler::{
    recurrence_for, InMemoryRegistry, JobScheduler, LivenessMarker, RunningJobRegistry,
    SqliteRegistry, TokioScheduler,
};

use crate::{
    catalog::{QueryRunner, QueryService},
    error::Result,
    job::{JobContext, LocalTimers, ScheduledQueryJob},
};

/// Tag carried by every workspace record.
pub const WORKSPACE_TAG: &str = "workspace";
/// Workspace attribute holding the list of embedded queries.
pub const WORKSPACE_QUERIES: &str = "queries";

/// A record as it comes out of a catalog create/update/delete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl CatalogRecord {
    pub fn is_workspace(&self) -> bool {
        self.tags.iter().any(|t| t == WORKSPACE_TAG)
    }

    /// Embedded query objects that declare schedules.
    ///
    /// A workspace without a `queries` attribute has none.
    fn scheduled_queries(&self) -> Fallible<Vec<&Value>> {
        let queries = match self.attributes.get(WORKSPACE_QUERIES) {
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(other) => {
                return fail!("The value for \"{WORKSPACE_QUERIES}\" should be a list but was {other}")
            }
        };
        Ok(queries
            .iter()
            .filter(|q| QueryMetacardData::has_schedules(q))
            .collect())
    }
}

/// The before and after of one updated record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub old: CatalogRecord,
    pub new: CatalogRecord,
}

/// How a query's registry entry is claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Claim {
    Once,
    /// Keep trying while a just-cancelled entry may still be visible.
    Retrying,
}

/// Starts and stops scheduled queries as workspace records change.
pub struct QuerySchedulingPlugin {
    ctx: Arc<JobContext>,
    scheduler: Arc<dyn JobScheduler>,
    retry_policy: RetryPolicy,
}

impl QuerySchedulingPlugin {
    pub fn new(
        ctx: Arc<JobContext>,
        scheduler: Arc<dyn JobScheduler>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            ctx,
            scheduler,
            retry_policy,
        }
    }

    /// Wire an engine from config: registry backend, email channel, Tokio timers.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn from_config(
        config: &BeaconConfig,
        query_service: Arc<dyn QueryService>,
        preferences: Arc<dyn PreferencesStore>,
    ) -> Result<Self> {
        let registry: Arc<dyn RunningJobRegistry> = match config.scheduler.registry {
            RegistryBackend::Memory => Arc::new(InMemoryRegistry::new()),
            RegistryBackend::Sqlite => Arc::new(SqliteRegistry::open(&config.scheduler.database_path)?),
        };

        let channels = Arc::new(ChannelRegistry::new());
        if let Some(email) = &config.email {
            channels.register(Arc::new(EmailChannel::from_config(email)?));
        }

        let ctx = Arc::new(JobContext {
            registry,
            queries: QueryRunner::new(query_service, &config.scheduler),
            preferences,
            channels,
            timers: LocalTimers::new(),
        });
        let scheduler = Arc::new(TokioScheduler::new()?);

        info!(
            registry = ?config.scheduler.registry,
            retry_attempts = config.retry.max_attempts,
            "query scheduling engine ready"
        );
        Ok(Self::new(ctx, scheduler, config.retry.policy()))
    }

    pub fn context(&self) -> &Arc<JobContext> {
        &self.ctx
    }

    /// Activate the schedules of newly created workspaces.
    pub async fn on_create(&self, records: &[CatalogRecord]) -> Fallible {
        let mut problems = Vec::new();
        for record in records {
            if let Err(e) = self.activate_record(record, Claim::Once).await {
                problems.push((record.id.as_str(), e));
            }
        }
        report(problems)
    }

    /// Cancel the old side of every update, then activate the new side.
    pub async fn on_update(&self, updates: &[RecordUpdate]) -> Fallible {
        let mut problems = Vec::new();
        for update in updates {
            if let Err(e) = self.cancel_record(&update.old) {
                problems.push((update.old.id.as_str(), e));
            }
            if let Err(e) = self.activate_record(&update.new, Claim::Retrying).await {
                problems.push((update.new.id.as_str(), e));
            }
        }
        report(problems)
    }

    /// Cancel the schedules of deleted workspaces.
    pub fn on_delete(&self, records: &[CatalogRecord]) -> Fallible {
        let mut problems = Vec::new();
        for record in records {
            if let Err(e) = self.cancel_record(record) {
                problems.push((record.id.as_str(), e));
            }
        }
        report(problems)
    }

    async fn activate_record(&self, record: &CatalogRecord, claim: Claim) -> Fallible {
        if !record.is_workspace() {
            return Ok(());
        }
        debug!(record_id = %record.id, "activating workspace schedules");

        let mut outcomes = Vec::new();
        for query in record.scheduled_queries()? {
            outcomes.push(self.activate_query(query, claim).await);
        }
        all_ok(outcomes)
    }

    fn cancel_record(&self, record: &CatalogRecord) -> Fallible {
        if !record.is_workspace() {
            return Ok(());
        }
        debug!(record_id = %record.id, "cancelling workspace schedules");

        let outcomes: Vec<Fallible> = record
            .scheduled_queries()?
            .into_iter()
            .map(|query| QueryMetacardData::id_of(query).and_then(|id| self.cancel(&id)))
            .collect();
        all_ok(outcomes)
    }

    async fn activate_query(&self, value: &Value, claim: Claim) -> Fallible {
        let query = QueryMetacardData::from_value(value)?;
        let id = query.id.clone();
        self.activate(query, claim).await.prepend_to_error(format!(
            "There was a problem attempting to schedule a job for a query metacard \"{id}\": "
        ))
    }

    /// Register `query` as running and start one timer per enabled schedule.
    ///
    /// Invalid schedules are reported but do not stop the valid ones. The
    /// registry entry is released again if no timer could be started.
    async fn activate(&self, query: QueryMetacardData, claim: Claim) -> Fallible {
        let mut outcomes: Vec<Fallible> = Vec::new();
        let mut specs = Vec::new();
        for raw in &query.schedules {
            match ScheduleRecord::from_value(raw).and_then(|r| ScheduleSpec::from_record(&r)) {
                Ok(Some(spec)) => specs.push(spec),
                Ok(None) => {}
                Err(e) => outcomes.push(Err(e)),
            }
        }
        if specs.is_empty() {
            return all_ok(outcomes);
        }

        if let Err(e) = self.ctx.queries.validate(&query.cql) {
            outcomes.push(Err(e));
            return all_ok(outcomes);
        }

        let marker = LivenessMarker::new();
        let claimed = match claim {
            Claim::Once => self.claim(&query.id, &marker),
            Claim::Retrying => {
                let id = query.id.as_str();
                let marker = &marker;
                retry(&self.retry_policy, || async move { self.claim(id, marker) }).await
            }
        };
        if let Err(e) = claimed {
            outcomes.push(Err(e));
            return all_ok(outcomes);
        }

        let mut started = Vec::new();
        for spec in specs {
            let recurrence = recurrence_for(spec.interval_unit, &spec.start);
            let job = ScheduledQueryJob::new(Arc::clone(&self.ctx), query.clone(), spec, marker.token);
            match self.scheduler.schedule(&query.id, recurrence, Arc::new(job)) {
                Ok(handle) => started.push(handle),
                Err(e) => outcomes.push(Err(Failure::from(e))),
            }
        }

        if started.is_empty() {
            if let Err(e) = self.ctx.registry.remove_if_owned(&query.id, marker.token) {
                warn!(query_id = %query.id, error = %e, "failed to release registry entry");
            }
        } else {
            info!(query_id = %query.id, timers = started.len(), "query scheduled");
            self.ctx.timers.track(&query.id, marker.token, started);
        }
        all_ok(outcomes)
    }

    fn claim(&self, query_id: &str, marker: &LivenessMarker) -> Fallible {
        if self.ctx.registry.put_if_absent(query_id, marker)? {
            Ok(())
        } else {
            fail!("This query cannot be scheduled because a job is already scheduled for it!")
        }
    }

    /// Mark `query_id` as no longer running and stop its local timers.
    ///
    /// Cancelling a query that is not running succeeds. Timers in other
    /// processes notice on their next tick.
    pub fn cancel(&self, query_id: &str) -> Fallible {
        let removed = self
            .ctx
            .registry
            .remove(query_id)
            .map_err(Failure::from)
            .prepend_to_error(format!(
                "There was a problem attempting to cancel a job for the query metacard \"{query_id}\": "
            ))?;

        let stopped = self.ctx.timers.cancel_all(query_id);
        if removed || stopped > 0 {
            info!(%query_id, local_timers = stopped, "query schedule cancelled");
        }
        Ok(())
    }

    /// Number of local timers still tracked for `query_id`.
    pub fn local_timers(&self, query_id: &str) -> usize {
        self.ctx.timers.count(query_id)
    }
}

fn report(problems: Vec<(&str, Failure)>) -> Fallible {
    all_ok(problems.into_iter().map(|(id, failure)| {
        Err::<(), _>(failure.prepend(format!(
            "There was an error attempting to modify schedule execution of workspace metacard \"{id}\": "
        )))
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(tags: &[&str], attributes: Value) -> CatalogRecord {
        CatalogRecord {
            id: "ws1".into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            attributes: attributes.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn workspace_is_recognised_by_tag() {
        assert!(record(&["workspace"], json!({})).is_workspace());
        assert!(!record(&["resource"], json!({})).is_workspace());
    }

    #[test]
    fn only_queries_with_schedules_are_considered() {
        let ws = record(
            &["workspace"],
            json!({ "queries": [
                { "id": "a", "cql": "x", "schedules": [] },
                { "id": "b", "cql": "y" }
            ]}),
        );
        let queries = ws.scheduled_queries().unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0]["id"], "a");

        assert!(record(&["workspace"], json!({})).scheduled_queries().unwrap().is_empty());
        assert!(record(&["workspace"], json!({ "queries": "nope" }))
            .scheduled_queries()
            .is_err());
    }

    #[test]
    fn batch_report_names_every_record() {
        let err = report(vec![
            ("ws1", Failure::new("first")),
            ("ws2", Failure::new("second")),
        ])
        .unwrap_err();
        assert_eq!(
            err.message(),
            "There was an error attempting to modify schedule execution of workspace metacard \"ws1\": first\n\
             There was an error attempting to modify schedule execution of workspace metacard \"ws2\": second"
        );
        assert!(report(Vec::new()).is_ok());
    }
}
