use async_trait::async_trait;
use google_gmail1::Gmail;
use google_gmail1::api::{MessagePart, Scope};
use hyper::client::HttpConnector;
use hyper_rustls::HttpsConnector;
use tracing::debug;

use crate::error::RetrieveError;
use crate::mailbox::{MailConnector, MailProvider};
use crate::models::{self, AttachmentRef, Credential};

const USER_ID: &str = "me";

#[derive(Clone)]
pub struct GmailClient {
    hub: Gmail<HttpsConnector<HttpConnector>>,
}

impl GmailClient {
    pub fn new(hub: Gmail<HttpsConnector<HttpConnector>>) -> Self {
        Self { hub }
    }

    /// Builds a hub that sends `access_token` as the bearer token.
    pub fn with_access_token(access_token: String) -> Result<Self, RetrieveError> {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|e| RetrieveError::Unexpected(format!("failed to load native roots: {e}")))?
            .https_only()
            .enable_http1()
            .build();
        let hub = Gmail::new(hyper::Client::builder().build(connector), access_token);
        Ok(Self::new(hub))
    }

    /// Address of the authenticated account.
    pub async fn profile_address(&self) -> Result<String, RetrieveError> {
        let (_, profile) = self
            .hub
            .users()
            .get_profile(USER_ID)
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(provider_error)?;

        profile
            .email_address
            .ok_or_else(|| RetrieveError::Unexpected("profile has no email address".to_string()))
    }
}

#[async_trait]
impl MailProvider for GmailClient {
    async fn list_messages(&self, query: &str, max_results: u32) -> Result<Vec<String>, RetrieveError> {
        let (_, message_list) = self
            .hub
            .users()
            .messages_list(USER_ID)
            .q(query)
            .max_results(max_results)
            .include_spam_trash(false)
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(provider_error)?;

        let ids: Vec<String> = message_list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        debug!(count = ids.len(), query, "listed messages");
        Ok(ids)
    }

    async fn get_message(&self, id: &str) -> Result<models::MailMessage, RetrieveError> {
        let (_, msg) = self
            .hub
            .users()
            .messages_get(USER_ID, id)
            .format("full")
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(provider_error)?;

        let mut sender = None;
        let mut subject = None;
        let mut body_plain = None;
        let mut attachments = Vec::new();

        if let Some(payload) = &msg.payload {
            for header in payload.headers.iter().flatten() {
                match header.name.as_deref() {
                    Some(name) if name.eq_ignore_ascii_case("From") => sender = header.value.clone(),
                    Some(name) if name.eq_ignore_ascii_case("Subject") => {
                        subject = header.value.clone()
                    }
                    _ => {}
                }
            }
            body_plain = extract_text_body(payload, "text/plain");
            collect_attachments(payload, &mut attachments);
        }

        Ok(models::MailMessage {
            id: msg.id.unwrap_or_else(|| id.to_string()),
            sender,
            subject,
            internal_date: msg.internal_date.unwrap_or(0),
            body_plain,
            attachments,
        })
    }

    async fn get_attachment(&self, message_id: &str, attachment_id: &str) -> Result<Vec<u8>, RetrieveError> {
        let (_, body) = self
            .hub
            .users()
            .messages_attachments_get(USER_ID, message_id, attachment_id)
            .add_scope(Scope::Readonly)
            .doit()
            .await
            .map_err(provider_error)?;

        body.data
            .ok_or_else(|| RetrieveError::Unexpected(format!("attachment {attachment_id} has no data")))
    }
}

/// Opens Gmail hubs for stored credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct GmailConnector;

impl MailConnector for GmailConnector {
    fn connect(&self, credential: &Credential) -> Result<Box<dyn MailProvider>, RetrieveError> {
        Ok(Box::new(GmailClient::with_access_token(
            credential.access_token.clone(),
        )?))
    }
}

fn provider_error(e: google_gmail1::Error) -> RetrieveError {
    RetrieveError::Provider(e.to_string())
}

fn is_attachment(part: &MessagePart) -> bool {
    part.filename.as_deref().is_some_and(|f| !f.is_empty())
        || part
            .body
            .as_ref()
            .is_some_and(|b| b.attachment_id.is_some())
}

fn collect_attachments(part: &MessagePart, out: &mut Vec<AttachmentRef>) {
    let mime_type = part.mime_type.clone().unwrap_or_default();
    if !mime_type.starts_with("multipart/") && is_attachment(part) {
        let body = part.body.as_ref();
        out.push(AttachmentRef {
            part_id: part.part_id.clone(),
            attachment_id: body.and_then(|b| b.attachment_id.clone()),
            filename: part.filename.clone().filter(|f| !f.is_empty()),
            mime_type,
            inline_data: body.and_then(|b| b.data.clone()),
        });
    }

    for p in part.parts.iter().flatten() {
        collect_attachments(p, out);
    }
}

fn extract_text_body(part: &MessagePart, mime_type: &str) -> Option<String> {
    if part.mime_type.as_deref() == Some(mime_type) && !is_attachment(part) {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_ref()) {
            return Some(String::from_utf8_lossy(data).into_owned());
        }
    }

    let mut full_body = String::new();
    for p in part.parts.iter().flatten() {
        if let Some(body) = extract_text_body(p, mime_type) {
            full_body.push_str(&body);
        }
    }
    (!full_body.is_empty()).then_some(full_body)
}
