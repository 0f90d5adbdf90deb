pub mod channel;
pub mod email;
pub mod error;
pub mod preferences;
pub mod registry;
pub mod types;

pub use channel::DeliveryChannel;
pub use email::{EmailChannel, Mailer, OutgoingEmail, SmtpMailer};
pub use error::ChannelError;
pub use preferences::{
    resolve_destination, DeliveryMethod, InMemoryPreferences, MethodField, PreferencesStore,
    UserPreferences,
};
pub use registry::ChannelRegistry;
pub use types::{DeliveryDestination, FieldType, RequiredField};
