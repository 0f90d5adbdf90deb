use std::collections::BTreeMap;

use async_trait::async_trait;

use beacon_core::{
    types::{QueryMetacardData, QueryResults},
    Fallible,
};

use crate::types::RequiredField;

/// A backend able to transmit query results to one kind of destination.
///
/// Implementations are registered with a
/// [`ChannelRegistry`](crate::registry::ChannelRegistry) and picked by
/// [`channel_type`](DeliveryChannel::channel_type); they must be
/// `Send + Sync` because scheduled jobs deliver from many Tokio tasks at once.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Stable lowercase identifier (e.g. `"email"`) that destinations refer to.
    fn channel_type(&self) -> &str;

    /// Name shown to users choosing a delivery method.
    fn display_name(&self) -> &str;

    /// Parameters every destination of this type must supply.
    fn required_fields(&self) -> Vec<RequiredField>;

    /// Send `results` of the query described by `query` to one destination.
    async fn deliver(
        &self,
        query: &QueryMetacardData,
        results: &QueryResults,
        username: &str,
        delivery_id: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Fallible;

    /// Name of the implementing type, used when reporting ambiguous matches.
    fn implementation_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
