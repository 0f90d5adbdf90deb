use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Registry value marking a query's job as meant to be running.
///
/// The token identifies one activation. A job only counts itself as live
/// while the registry holds its own token, so a timer left over from an
/// earlier activation of the same query cannot be revived by a later one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessMarker {
    pub token: Uuid,
    pub activated_at: DateTime<Utc>,
}

impl LivenessMarker {
    pub fn new() -> Self {
        Self {
            token: Uuid::new_v4(),
            activated_at: Utc::now(),
        }
    }
}

impl Default for LivenessMarker {
    fn default() -> Self {
        Self::new()
    }
}
