//! Email delivery: a plain-text summary of every hit, sent over SMTP.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use regex::Regex;
use serde_json::Value;
use tracing::info;

use beacon_core::{
    config::EmailConfig,
    fail,
    types::{QueryMetacardData, QueryResults},
    Failure, Fallible,
};

use crate::{
    channel::DeliveryChannel,
    error::ChannelError,
    types::{FieldType, RequiredField},
};

pub const CHANNEL_TYPE: &str = "email";
pub const DISPLAY_NAME: &str = "Email";
/// Destination parameter holding the recipient address.
pub const EMAIL_PARAMETER: &str = "email";

const DATE_FORMAT: &str = "%m/%d/%Y %H:%M";

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,6}$").expect("valid address pattern")
    })
}

/// A fully addressed message ready for a [`Mailer`].
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub from: Mailbox,
    pub to: Mailbox,
    pub subject: String,
    pub body: String,
}

/// Transport that puts an [`OutgoingEmail`] on the wire.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), ChannelError>;
}

/// STARTTLS SMTP relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn from_config(config: &EmailConfig) -> Result<Self, ChannelError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| ChannelError::ConfigError(format!("SMTP relay: {e}")))?
            .port(config.smtp_port);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        Ok(Self {
            transport: builder.build(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), ChannelError> {
        let message = Message::builder()
            .from(email.from)
            .to(email.to)
            .subject(email.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(email.body)
            .map_err(|e| ChannelError::Build(e.to_string()))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        Ok(())
    }
}

/// Emails query results to the address in the destination's `email` field.
pub struct EmailChannel {
    sender: String,
    mailer: Arc<dyn Mailer>,
}

impl EmailChannel {
    pub fn new(sender: impl Into<String>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            sender: sender.into(),
            mailer,
        }
    }

    /// Channel sending through the SMTP relay described by `config`.
    pub fn from_config(config: &EmailConfig) -> Result<Self, ChannelError> {
        let mailer = SmtpMailer::from_config(config)?;
        Ok(Self::new(config.sender.clone(), Arc::new(mailer)))
    }
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    fn channel_type(&self) -> &str {
        CHANNEL_TYPE
    }

    fn display_name(&self) -> &str {
        DISPLAY_NAME
    }

    fn required_fields(&self) -> Vec<RequiredField> {
        vec![RequiredField::new(EMAIL_PARAMETER, FieldType::Email)]
    }

    async fn deliver(
        &self,
        query: &QueryMetacardData,
        results: &QueryResults,
        username: &str,
        delivery_id: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Fallible {
        let Some(address) = parameters.get(EMAIL_PARAMETER) else {
            return fail!("No value was found for \"{EMAIL_PARAMETER}\"!");
        };
        if !address_pattern().is_match(address) {
            return fail!("The email address \"{address}\" is not a valid email address!");
        }

        let from: Mailbox = self.sender.parse().map_err(|e| {
            Failure::new(format!(
                "There was a problem preparing the email sender address to send query results : {e}"
            ))
        })?;
        let to: Mailbox = address.parse().map_err(|e| {
            Failure::new(format!(
                "There was a problem preparing the email destination address to send query results : {e}"
            ))
        })?;
        let Some(title) = query.title.as_deref() else {
            return fail!("No value was found for \"title\"!");
        };

        let email = OutgoingEmail {
            from,
            to,
            subject: format!("Scheduled query results for \"{title}\""),
            body: compose_body(title, results, Local::now()),
        };
        self.mailer.send(email).await.map_err(|e| {
            Failure::new(format!(
                "There was a problem sending an email with scheduled query results: {e}"
            ))
        })?;

        info!(
            query_id = %query.id,
            %username,
            %delivery_id,
            hits = results.hits.len(),
            "query results emailed"
        );
        Ok(())
    }
}

/// Body text: a heading, then one block per hit listing its non-null attributes.
pub fn compose_body(title: &str, results: &QueryResults, as_of: DateTime<Local>) -> String {
    let mut body = format!(
        "Here are the results for query {title} as of {}:",
        as_of.format(DATE_FORMAT)
    );
    for hit in &results.hits {
        body.push_str("\n\n");
        for (key, value) in &hit.attributes {
            match value {
                Value::Null => continue,
                Value::String(s) => {
                    let _ = write!(body, "\n{key}: {s}");
                }
                other => {
                    let _ = write!(body, "\n{key}: {other}");
                }
            }
        }
    }
    body
}
