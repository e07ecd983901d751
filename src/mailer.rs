//! Outbound mail seam. Delivery itself lives outside this crate.

use async_trait::async_trait;
use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport unavailable: {0}")]
    Unavailable(String),
    #[error("recipient rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_verification(&self, email: &str, user_id: Ulid) -> Result<(), MailError>;
}

/// Writes the mail it would send to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, email: &str, user_id: Ulid) -> Result<(), MailError> {
        tracing::info!(%user_id, email, "verification mail queued");
        Ok(())
    }
}
