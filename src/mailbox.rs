//! Seam between the retriever and the mail provider SDK.

use async_trait::async_trait;

use crate::error::RetrieveError;
use crate::models::{Credential, MailMessage};

/// Read-only view of one authenticated mailbox.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Message ids matching a provider search query, newest first as the
    /// provider orders them.
    async fn list_messages(&self, query: &str, max_results: u32) -> Result<Vec<String>, RetrieveError>;

    async fn get_message(&self, id: &str) -> Result<MailMessage, RetrieveError>;

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>, RetrieveError>;
}

/// Opens a mailbox for a valid credential.
pub trait MailConnector: Send + Sync {
    fn connect(&self, credential: &Credential) -> Result<Box<dyn MailProvider>, RetrieveError>;
}
