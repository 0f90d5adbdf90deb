// Shared doubles for the engine integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use beacon_core::{
    fail,
    types::{QueryMetacardData, QueryResults, ResultItem},
    Fallible, RetryPolicy,
};
use beacon_delivery::{
    ChannelRegistry, DeliveryChannel, FieldType, InMemoryPreferences, RequiredField,
    UserPreferences,
};
use beacon_engine::{
    CatalogRecord, JobContext, LocalTimers, QueryError, QueryRequest, QueryRunner, QueryService,
    QuerySchedulingPlugin,
};
use beacon_scheduler::{
    InMemoryRegistry, JobHandle, JobScheduler, LivenessMarker, Recurrence, RunningJobRegistry,
    ScheduledTask, SchedulerError,
};
use uuid::Uuid;

pub const USER: &str = "alice";

/// Route engine logs to the test output; `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_engine=info,beacon_scheduler=info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Catalog that always answers with the same outcome.
pub struct FakeCatalog {
    pub outcome: Mutex<Result<QueryResults, QueryError>>,
    pub runs: AtomicU32,
}

impl FakeCatalog {
    pub fn new() -> Arc<Self> {
        let hit = ResultItem {
            id: "r1".into(),
            attributes: json!({ "title": "Harbor" }).as_object().cloned().unwrap(),
        };
        Arc::new(Self {
            outcome: Mutex::new(Ok(QueryResults {
                hits: vec![hit],
                total_hits: 1,
            })),
            runs: AtomicU32::new(0),
        })
    }

    pub fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryService for FakeCatalog {
    async fn execute(&self, _request: &QueryRequest) -> Result<QueryResults, QueryError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.outcome.lock().unwrap().clone()
    }
}

/// Channel that records every delivery id and fails the ones it is told to.
pub struct RecordingChannel {
    pub failing: Vec<String>,
    pub delivered: Mutex<Vec<String>>,
}

impl RecordingChannel {
    pub fn new(failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: failing.iter().map(|s| s.to_string()).collect(),
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    fn channel_type(&self) -> &str {
        "recording"
    }

    fn display_name(&self) -> &str {
        "Recording"
    }

    fn required_fields(&self) -> Vec<RequiredField> {
        vec![RequiredField::new("target", FieldType::Text)]
    }

    async fn deliver(
        &self,
        _query: &QueryMetacardData,
        _results: &QueryResults,
        _username: &str,
        delivery_id: &str,
        _parameters: &BTreeMap<String, String>,
    ) -> Fallible {
        self.delivered.lock().unwrap().push(delivery_id.to_string());
        if self.failing.iter().any(|f| f == delivery_id) {
            return fail!("{delivery_id} is unreachable");
        }
        Ok(())
    }
}

/// In-memory registry whose `put_if_absent` can be told to report a conflict
/// a number of times, like a store whose deletes are not yet visible.
#[derive(Default)]
pub struct LaggingRegistry {
    inner: InMemoryRegistry,
    pub conflicts: AtomicU32,
    pub claims: AtomicU32,
}

impl LaggingRegistry {
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn claims(&self) -> u32 {
        self.claims.load(Ordering::SeqCst)
    }
}

impl RunningJobRegistry for LaggingRegistry {
    fn get(&self, query_id: &str) -> beacon_scheduler::Result<Option<LivenessMarker>> {
        self.inner.get(query_id)
    }

    fn put_if_absent(&self, query_id: &str, marker: &LivenessMarker) -> beacon_scheduler::Result<bool> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        let lagging = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if lagging {
            return Ok(false);
        }
        self.inner.put_if_absent(query_id, marker)
    }

    fn remove(&self, query_id: &str) -> beacon_scheduler::Result<bool> {
        self.inner.remove(query_id)
    }

    fn remove_if_owned(&self, query_id: &str, token: Uuid) -> beacon_scheduler::Result<bool> {
        self.inner.remove_if_owned(query_id, token)
    }
}

#[derive(Default)]
struct ManualHandle {
    cancelled: AtomicBool,
}

struct SharedHandle(Arc<ManualHandle>);

impl JobHandle for SharedHandle {
    fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
    }

    fn is_finished(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }
}

pub struct ManualJob {
    pub name: String,
    pub recurrence: Recurrence,
    pub task: Arc<dyn ScheduledTask>,
    handle: Arc<ManualHandle>,
}

impl ManualJob {
    pub fn is_cancelled(&self) -> bool {
        self.handle.cancelled.load(Ordering::SeqCst)
    }
}

/// Scheduler that never fires on its own; tests call the tasks directly.
#[derive(Default)]
pub struct ManualScheduler {
    pub jobs: Mutex<Vec<Arc<ManualJob>>>,
    pub refuse: AtomicBool,
}

impl ManualScheduler {
    pub fn job(&self, index: usize) -> Arc<ManualJob> {
        Arc::clone(&self.jobs.lock().unwrap()[index])
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

impl JobScheduler for ManualScheduler {
    fn schedule(
        &self,
        name: &str,
        recurrence: Recurrence,
        task: Arc<dyn ScheduledTask>,
    ) -> beacon_scheduler::Result<Box<dyn JobHandle>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SchedulerError::NoRuntime("timer service stopped".into()));
        }
        let handle = Arc::new(ManualHandle::default());
        self.jobs.lock().unwrap().push(Arc::new(ManualJob {
            name: name.to_string(),
            recurrence,
            task,
            handle: Arc::clone(&handle),
        }));
        Ok(Box::new(SharedHandle(handle)))
    }
}

/// Preferences for [`USER`]: `d1`..`d3` use the recording channel, `d4` an unknown one.
pub fn preferences() -> Arc<InMemoryPreferences> {
    let store = InMemoryPreferences::new();
    let prefs = UserPreferences::from_json(
        r#"{
            "deliveryMethods": [
                { "deliveryId": "d1", "deliveryType": "recording", "fields": [{ "name": "target", "value": "one" }] },
                { "deliveryId": "d2", "deliveryType": "recording", "fields": [{ "name": "target", "value": "two" }] },
                { "deliveryId": "d3", "deliveryType": "recording", "fields": [{ "name": "target", "value": "three" }] },
                { "deliveryId": "d4", "deliveryType": "pager" }
            ]
        }"#,
    )
    .unwrap();
    store.add(USER, prefs);
    Arc::new(store)
}

pub struct Harness {
    pub plugin: QuerySchedulingPlugin,
    pub ctx: Arc<JobContext>,
    pub registry: Arc<LaggingRegistry>,
    pub scheduler: Arc<ManualScheduler>,
    pub catalog: Arc<FakeCatalog>,
    pub channel: Arc<RecordingChannel>,
}

impl Harness {
    pub fn new(failing: &[&str]) -> Self {
        let registry = Arc::new(LaggingRegistry::default());
        let scheduler = Arc::new(ManualScheduler::default());
        let catalog = FakeCatalog::new();
        let channel = RecordingChannel::new(failing);

        let channels = Arc::new(ChannelRegistry::new());
        channels.register(channel.clone());

        let ctx = Arc::new(JobContext {
            registry: registry.clone(),
            queries: QueryRunner::new(catalog.clone(), &Default::default()),
            preferences: preferences(),
            channels,
            timers: LocalTimers::new(),
        });
        let plugin = QuerySchedulingPlugin::new(
            Arc::clone(&ctx),
            scheduler.clone(),
            RetryPolicy::new(4, Duration::from_millis(350)),
        );

        Self {
            plugin,
            ctx,
            registry,
            scheduler,
            catalog,
            channel,
        }
    }
}

pub fn schedule(
    amount: i64,
    unit: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    delivery_ids: &[&str],
) -> Value {
    json!({
        "isScheduled": true,
        "userId": USER,
        "scheduleAmount": amount,
        "scheduleUnit": unit,
        "scheduleStart": start.to_rfc3339(),
        "scheduleEnd": end.to_rfc3339(),
        "deliveryIds": delivery_ids,
    })
}

pub fn query(id: &str, schedules: Vec<Value>) -> Value {
    json!({
        "id": id,
        "cql": "title like 'harbor'",
        "title": format!("Query {id}"),
        "schedules": schedules,
    })
}

pub fn workspace(id: &str, queries: Vec<Value>) -> CatalogRecord {
    CatalogRecord {
        id: id.to_string(),
        tags: vec!["workspace".into()],
        attributes: json!({ "queries": queries }).as_object().cloned().unwrap(),
    }
}
