//! `Mailer` adapter. No SMTP provider is configured for the reference
//! server; outgoing mail is logged through `tracing`, matching the
//! ambient-stack requirement to run every effect through the usual
//! logging facade rather than a silent no-op.

use async_trait::async_trait;
use headway_core::{Email, Result};

pub struct LogMailer {
    default_from: String,
}

impl LogMailer {
    pub fn new(default_from: impl Into<String>) -> Self {
        Self {
            default_from: default_from.into(),
        }
    }
}

#[async_trait]
impl headway_core::Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<()> {
        let from = email.from.as_deref().unwrap_or(&self.default_from);
        tracing::info!(
            from = %from,
            to = ?email.to,
            subject = %email.subject,
            "sending email"
        );
        Ok(())
    }
}
