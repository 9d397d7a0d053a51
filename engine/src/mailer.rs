//! Abstract mailer interface. Hooks and job handlers send notification
//! email through this trait; no concrete SMTP/provider logic lives here.

use async_trait::async_trait;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Email {
    pub to: Vec<String>,
    pub from: Option<String>,
    pub subject: String,
    pub html: Option<String>,
    pub text: Option<String>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<()>;
}
