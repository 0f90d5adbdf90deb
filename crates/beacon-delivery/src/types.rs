use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind of value a channel expects for one of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Email,
    Number,
    Boolean,
}

/// A parameter a channel needs in every destination that uses it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequiredField {
    pub name: String,
    pub field_type: FieldType,
}

impl RequiredField {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
        }
    }
}

/// Where one delivery goes, resolved from a user's preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryDestination {
    /// Selects the channel implementation (e.g. `"email"`).
    pub channel_type: String,
    pub delivery_id: String,
    /// Channel-specific settings such as the recipient address.
    pub parameters: BTreeMap<String, String>,
}
