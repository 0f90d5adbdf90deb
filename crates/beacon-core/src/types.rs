use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fail;
use crate::fallible::{from_option, Failure, Fallible};

/// Wire keys of a query object embedded in a workspace.
pub const QUERY_ID_KEY: &str = "id";
pub const QUERY_CQL_KEY: &str = "cql";
pub const QUERY_TITLE_KEY: &str = "title";
pub const QUERY_SCHEDULES_KEY: &str = "schedules";

/// The unit a schedule repeats in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepetitionUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl fmt::Display for RepetitionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RepetitionUnit::Minutes => "minutes",
            RepetitionUnit::Hours => "hours",
            RepetitionUnit::Days => "days",
            RepetitionUnit::Weeks => "weeks",
            RepetitionUnit::Months => "months",
            RepetitionUnit::Years => "years",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RepetitionUnit {
    type Err = Failure;

    /// Unit names are matched case-insensitively (`"days"`, `"DAYS"`, `"Days"`).
    fn from_str(s: &str) -> Fallible<Self> {
        match s.to_ascii_uppercase().as_str() {
            "MINUTES" => Ok(RepetitionUnit::Minutes),
            "HOURS" => Ok(RepetitionUnit::Hours),
            "DAYS" => Ok(RepetitionUnit::Days),
            "WEEKS" => Ok(RepetitionUnit::Weeks),
            "MONTHS" => Ok(RepetitionUnit::Months),
            "YEARS" => Ok(RepetitionUnit::Years),
            _ => fail!(
                "The unit of time \"{s}\" for the scheduled query time interval is not recognized!"
            ),
        }
    }
}

/// A schedule exactly as persisted inside a workspace record.
///
/// Everything except `isScheduled` is optional at this level: a disabled
/// schedule may be half filled in, and missing fields of an enabled one are
/// reported by [`ScheduleSpec::from_record`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRecord {
    pub is_scheduled: bool,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub schedule_amount: Option<i64>,
    #[serde(default)]
    pub schedule_unit: Option<String>,
    #[serde(default)]
    pub schedule_start: Option<String>,
    #[serde(default)]
    pub schedule_end: Option<String>,
    #[serde(default)]
    pub delivery_ids: Option<Vec<String>>,
}

impl ScheduleRecord {
    pub fn from_value(value: &Value) -> Fallible<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Failure::new(format!("The schedule data could not be read: {e}")))
    }
}

/// A validated, enabled schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    /// The user the results are delivered on behalf of.
    pub username: String,
    /// Always > 0.
    pub interval_amount: u32,
    pub interval_unit: RepetitionUnit,
    pub start: DateTime<Utc>,
    /// Expected to be >= `start`; not enforced here.
    pub end: DateTime<Utc>,
    pub delivery_ids: Vec<String>,
}

impl ScheduleSpec {
    /// Validate a persisted schedule.
    ///
    /// Returns `Ok(None)` for a schedule that is switched off, without
    /// looking at any of its other fields.
    pub fn from_record(record: &ScheduleRecord) -> Fallible<Option<Self>> {
        if !record.is_scheduled {
            return Ok(None);
        }

        let username = required(record.user_id.clone(), "userId")?;
        let amount = required(record.schedule_amount, "scheduleAmount")?;
        let unit_name = required(record.schedule_unit.clone(), "scheduleUnit")?;
        let start_text = required(record.schedule_start.clone(), "scheduleStart")?;
        let end_text = required(record.schedule_end.clone(), "scheduleEnd")?;
        let delivery_ids = required(record.delivery_ids.clone(), "deliveryIds")?;

        if amount <= 0 {
            return fail!("A task cannot be executed every {amount} {unit_name}!");
        }
        let interval_amount = u32::try_from(amount)
            .map_err(|_| Failure::new(format!("The interval {amount} {unit_name} is too large!")))?;

        let start = parse_timestamp(&start_text).map_err(|e| {
            Failure::new(format!(
                "The start date attribute of this metacard, \"{start_text}\", could not be parsed: {e}"
            ))
        })?;
        let end = parse_timestamp(&end_text).map_err(|e| {
            Failure::new(format!(
                "The end date attribute of this metacard, \"{end_text}\", could not be parsed: {e}"
            ))
        })?;

        let interval_unit = unit_name.parse::<RepetitionUnit>()?;

        Ok(Some(Self {
            username,
            interval_amount,
            interval_unit,
            start,
            end,
            delivery_ids,
        }))
    }
}

fn required<T>(value: Option<T>, key: &str) -> Fallible<T> {
    from_option(value, format!("The schedule has no value for \"{key}\"!"))
}

/// Parse an ISO-8601 timestamp as written by the workspace editor.
///
/// Accepts RFC 3339 (`2026-03-01T13:05:00.000Z`) as well as the numeric
/// offset form without a colon (`2026-03-01T13:05:00.000+0000`).
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s)
        .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|dt| dt.with_timezone(&Utc))
}

/// A stored query embedded in a workspace record.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryMetacardData {
    pub id: String,
    pub cql: String,
    pub title: Option<String>,
    /// Raw schedule objects; each is validated on its own.
    pub schedules: Vec<Value>,
    /// Every attribute of the query object, handed to delivery channels.
    pub attributes: Map<String, Value>,
}

impl QueryMetacardData {
    /// Whether a raw query object declares any schedules at all.
    pub fn has_schedules(value: &Value) -> bool {
        value
            .as_object()
            .is_some_and(|o| o.contains_key(QUERY_SCHEDULES_KEY))
    }

    pub fn from_value(value: &Value) -> Fallible<Self> {
        let attributes = from_option(
            value.as_object().cloned(),
            "The query data is not an object!",
        )?;

        let id = string_attr(&attributes, QUERY_ID_KEY)?;
        let cql = string_attr(&attributes, QUERY_CQL_KEY)?;
        let title = attributes
            .get(QUERY_TITLE_KEY)
            .and_then(Value::as_str)
            .map(String::from);
        let schedules = match attributes.get(QUERY_SCHEDULES_KEY) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items.clone(),
            Some(other) => {
                return fail!(
                    "The value for \"{QUERY_SCHEDULES_KEY}\" of query \"{id}\" should be a list but was {other}"
                )
            }
        };

        Ok(Self {
            id,
            cql,
            title,
            schedules,
            attributes,
        })
    }

    /// Only the identifier, for cancellation, which needs nothing else.
    pub fn id_of(value: &Value) -> Fallible<String> {
        let attributes = from_option(value.as_object(), "The query data is not an object!")?;
        string_attr(attributes, QUERY_ID_KEY)
    }
}

fn string_attr(attributes: &Map<String, Value>, key: &str) -> Fallible<String> {
    match attributes.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => fail!("The value for \"{key}\" should be a string but was {other}"),
        None => fail!("No value was found for \"{key}\"!"),
    }
}

/// One hit returned by the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultItem {
    pub id: String,
    /// Attribute name → value; `null` values are treated as absent.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// The outcome of one query re-execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResults {
    pub hits: Vec<ResultItem>,
    /// Total hits known to the catalog, which may exceed `hits.len()`.
    pub total_hits: u64,
}
