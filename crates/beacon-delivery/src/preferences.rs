use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::error;

use beacon_core::{fail, Fallible, FallibleExt};

use crate::types::DeliveryDestination;

/// A user's stored delivery settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    #[serde(default)]
    pub delivery_methods: Vec<DeliveryMethod>,
}

/// One configured way of reaching a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryMethod {
    pub delivery_id: Option<String>,
    pub delivery_type: Option<String>,
    #[serde(default)]
    pub fields: Vec<MethodField>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodField {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl UserPreferences {
    pub fn from_json(json: &str) -> Fallible<Self> {
        serde_json::from_str(json)
            .map_err(|e| format!("The preferences could not be read: {e}").into())
    }
}

/// Lookup of stored user preferences.
#[async_trait]
pub trait PreferencesStore: Send + Sync {
    /// Every preferences record stored for `username`. Exactly one is expected.
    async fn preferences_for(&self, username: &str) -> Fallible<Vec<UserPreferences>>;
}

/// Process-local preferences, keyed by username.
#[derive(Default)]
pub struct InMemoryPreferences {
    records: RwLock<HashMap<String, Vec<UserPreferences>>>,
}

impl InMemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record for `username`; a second call adds a second record.
    pub fn add(&self, username: impl Into<String>, preferences: UserPreferences) {
        self.records
            .write()
            .expect("preferences lock poisoned")
            .entry(username.into())
            .or_default()
            .push(preferences);
    }
}

#[async_trait]
impl PreferencesStore for InMemoryPreferences {
    async fn preferences_for(&self, username: &str) -> Fallible<Vec<UserPreferences>> {
        Ok(self
            .records
            .read()
            .expect("preferences lock poisoned")
            .get(username)
            .cloned()
            .unwrap_or_default())
    }
}

/// Find where `delivery_id` of `username` should be delivered.
///
/// Requires exactly one preferences record for the user and exactly one
/// method in it carrying `delivery_id`. Methods without an id are skipped.
pub async fn resolve_destination(
    store: &dyn PreferencesStore,
    username: &str,
    delivery_id: &str,
) -> Fallible<DeliveryDestination> {
    let mut records = store.preferences_for(username).await.prepend_to_error(format!(
        "There was a problem attempting to retrieve the preferences for user '{username}': "
    ))?;
    if records.len() != 1 {
        return fail!(
            "There were {} preference entries found for user '{username}'!",
            records.len()
        );
    }
    let preferences = records.remove(0);

    let mut matching: Vec<DeliveryMethod> = preferences
        .delivery_methods
        .into_iter()
        .filter(|method| match &method.delivery_id {
            Some(id) => id == delivery_id,
            None => {
                error!(%username, "a delivery method in the user's preferences has no id");
                false
            }
        })
        .collect();
    if matching.len() != 1 {
        return fail!(
            "There were {} destinations matching the ID \"{delivery_id}\" for user '{username}'; only one is expected!",
            matching.len()
        );
    }
    let method = matching.remove(0);

    let Some(channel_type) = method.delivery_type else {
        return fail!(
            "The destination with ID \"{delivery_id}\" for user '{username}' has no delivery type!"
        );
    };
    let parameters: BTreeMap<String, String> = method
        .fields
        .into_iter()
        .map(|field| (field.name, field.value))
        .collect();

    Ok(DeliveryDestination {
        channel_type,
        delivery_id: delivery_id.to_string(),
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefs(json: &str) -> UserPreferences {
        UserPreferences::from_json(json).unwrap()
    }

    fn alice() -> UserPreferences {
        prefs(
            r#"{
                "deliveryMethods": [
                    {
                        "deliveryId": "inbox",
                        "deliveryType": "email",
                        "fields": [{ "name": "email", "value": "alice@example.com" }]
                    },
                    { "deliveryType": "email", "fields": [] },
                    { "deliveryId": "dup", "deliveryType": "email" },
                    { "deliveryId": "dup", "deliveryType": "ftp" },
                    { "deliveryId": "untyped" }
                ]
            }"#,
        )
    }

    #[tokio::test]
    async fn resolves_single_matching_method() {
        let store = InMemoryPreferences::new();
        store.add("alice", alice());

        let destination = resolve_destination(&store, "alice", "inbox").await.unwrap();
        assert_eq!(destination.channel_type, "email");
        assert_eq!(destination.delivery_id, "inbox");
        assert_eq!(destination.parameters["email"], "alice@example.com");
    }

    #[tokio::test]
    async fn requires_exactly_one_record() {
        let store = InMemoryPreferences::new();
        let err = resolve_destination(&store, "bob", "inbox").await.unwrap_err();
        assert_eq!(err.message(), "There were 0 preference entries found for user 'bob'!");

        store.add("bob", UserPreferences::default());
        store.add("bob", UserPreferences::default());
        let err = resolve_destination(&store, "bob", "inbox").await.unwrap_err();
        assert_eq!(err.message(), "There were 2 preference entries found for user 'bob'!");
    }

    #[tokio::test]
    async fn requires_exactly_one_matching_method() {
        let store = InMemoryPreferences::new();
        store.add("alice", alice());

        let err = resolve_destination(&store, "alice", "dup").await.unwrap_err();
        assert!(err.message().starts_with("There were 2 destinations matching the ID \"dup\""));
        let err = resolve_destination(&store, "alice", "missing").await.unwrap_err();
        assert!(err.message().starts_with("There were 0 destinations matching"));
    }

    #[tokio::test]
    async fn method_without_type_is_an_error() {
        let store = InMemoryPreferences::new();
        store.add("alice", alice());
        let err = resolve_destination(&store, "alice", "untyped").await.unwrap_err();
        assert!(err.message().contains("has no delivery type"));
    }

    struct Broken;

    #[async_trait]
    impl PreferencesStore for Broken {
        async fn preferences_for(&self, _username: &str) -> Fallible<Vec<UserPreferences>> {
            fail!("store offline")
        }
    }

    #[tokio::test]
    async fn store_failure_is_prefixed() {
        let err = resolve_destination(&Broken, "carol", "x").await.unwrap_err();
        assert_eq!(
            err.message(),
            "There was a problem attempting to retrieve the preferences for user 'carol': store offline"
        );
    }

    #[test]
    fn malformed_json_is_reported() {
        assert!(UserPreferences::from_json("{ not json").is_err());
    }
}
