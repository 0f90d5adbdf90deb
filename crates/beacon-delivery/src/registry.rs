use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use beacon_core::{
    fail,
    types::{QueryMetacardData, QueryResults},
    Fallible,
};

use crate::{channel::DeliveryChannel, types::DeliveryDestination};

/// Delivery channels available to scheduled jobs, populated at startup.
///
/// Several implementations may claim the same channel type; that is only
/// reported when a delivery actually asks for that type.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: RwLock<Vec<Arc<dyn DeliveryChannel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: Arc<dyn DeliveryChannel>) {
        info!(
            channel_type = %channel.channel_type(),
            implementation = channel.implementation_name(),
            "registering delivery channel"
        );
        self.channels
            .write()
            .expect("channel registry lock poisoned")
            .push(channel);
    }

    /// Every registered channel type, in registration order.
    pub fn channel_types(&self) -> Vec<String> {
        self.channels
            .read()
            .expect("channel registry lock poisoned")
            .iter()
            .map(|c| c.channel_type().to_string())
            .collect()
    }

    /// The single channel handling `channel_type`.
    pub fn select(&self, channel_type: &str) -> Fallible<Arc<dyn DeliveryChannel>> {
        let channels = self.channels.read().expect("channel registry lock poisoned");
        let mut selected: Vec<&Arc<dyn DeliveryChannel>> = channels
            .iter()
            .filter(|c| c.channel_type() == channel_type)
            .collect();

        match selected.len() {
            0 => {
                let known: Vec<&str> = channels.iter().map(|c| c.channel_type()).collect();
                fail!(
                    "The delivery method \"{channel_type}\" was not recognized; this query scheduling system found the following delivery methods: [{}].",
                    known.join(", ")
                )
            }
            1 => Ok(Arc::clone(selected.remove(0))),
            n => {
                let names: Vec<&str> = selected.iter().map(|c| c.implementation_name()).collect();
                fail!(
                    "{n} delivery services were found to handle the delivery type {channel_type}: {}.",
                    names.join(", ")
                )
            }
        }
    }

    /// Hand `results` to the channel named by `destination`.
    pub async fn deliver(
        &self,
        destination: &DeliveryDestination,
        query: &QueryMetacardData,
        results: &QueryResults,
        username: &str,
    ) -> Fallible {
        // The lock guard must not live across the await below.
        let channel = self.select(&destination.channel_type)?;
        debug!(
            channel_type = %destination.channel_type,
            delivery_id = %destination.delivery_id,
            %username,
            "delivering query results"
        );
        channel
            .deliver(
                query,
                results,
                username,
                &destination.delivery_id,
                &destination.parameters,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use serde_json::Map;

    use super::*;
    use crate::types::{FieldType, RequiredField};

    struct Recording {
        channel_type: &'static str,
        calls: AtomicU32,
    }

    impl Recording {
        fn new(channel_type: &'static str) -> Arc<Self> {
            Arc::new(Self {
                channel_type,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl DeliveryChannel for Recording {
        fn channel_type(&self) -> &str {
            self.channel_type
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
            _delivery_id: &str,
            _parameters: &BTreeMap<String, String>,
        ) -> Fallible {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Impostor;

    #[async_trait]
    impl DeliveryChannel for Impostor {
        fn channel_type(&self) -> &str {
            "email"
        }

        fn display_name(&self) -> &str {
            "Impostor"
        }

        fn required_fields(&self) -> Vec<RequiredField> {
            Vec::new()
        }

        async fn deliver(
            &self,
            _query: &QueryMetacardData,
            _results: &QueryResults,
            _username: &str,
            _delivery_id: &str,
            _parameters: &BTreeMap<String, String>,
        ) -> Fallible {
            fail!("should never be selected")
        }
    }

    fn query() -> QueryMetacardData {
        QueryMetacardData {
            id: "q1".into(),
            cql: "title like 'x'".into(),
            title: Some("x".into()),
            schedules: Vec::new(),
            attributes: Map::new(),
        }
    }

    fn destination(channel_type: &str) -> DeliveryDestination {
        DeliveryDestination {
            channel_type: channel_type.into(),
            delivery_id: "d1".into(),
            parameters: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn exactly_one_match_is_invoked() {
        let registry = ChannelRegistry::new();
        let email = Recording::new("email");
        registry.register(email.clone());
        registry.register(Recording::new("ftp"));

        registry
            .deliver(&destination("email"), &query(), &QueryResults::default(), "alice")
            .await
            .unwrap();
        assert_eq!(email.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_type_lists_known_types() {
        let registry = ChannelRegistry::new();
        registry.register(Recording::new("email"));
        registry.register(Recording::new("ftp"));

        let err = registry
            .deliver(&destination("sms"), &query(), &QueryResults::default(), "alice")
            .await
            .unwrap_err();
        assert_eq!(
            err.message(),
            "The delivery method \"sms\" was not recognized; this query scheduling system found the following delivery methods: [email, ftp]."
        );
    }

    #[tokio::test]
    async fn colliding_types_name_both_implementations() {
        let registry = ChannelRegistry::new();
        let email = Recording::new("email");
        registry.register(email.clone());
        registry.register(Arc::new(Impostor));

        let err = registry
            .deliver(&destination("email"), &query(), &QueryResults::default(), "alice")
            .await
            .unwrap_err();
        let message = err.message();
        assert!(message.starts_with("2 delivery services were found to handle the delivery type email: "));
        assert!(message.contains("Recording"));
        assert!(message.contains("Impostor"));
        assert_eq!(email.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_registry_has_no_types() {
        let registry = ChannelRegistry::new();
        assert!(registry.channel_types().is_empty());
        assert!(registry.select("email").is_err());
    }
}
