//! Shared harness: a router wired to a fake mailbox and a mock OAuth
//! provider.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, header};
use chrono::Utc;
use dispatchpi::auth::OAuthClient;
use dispatchpi::config::{Config, session_key_from_secret};
use dispatchpi::mailbox::{MailConnector, MailProvider};
use dispatchpi::models::{AttachmentRef, MailMessage};
use dispatchpi::retriever::sender_address;
use dispatchpi::{AppState, Credential, RetrieveError, router};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::MockServer;
use yup_oauth2::ApplicationSecret;

pub const EARTH: &str = "home@example.com";
pub const SESSION_SECRET: &str = "test-session-secret-0123456789abcdef";

#[derive(Clone, Default)]
pub struct FakeMailbox {
    pub messages: Vec<MailMessage>,
    pub attachments: HashMap<String, Vec<u8>>,
    pub provider_error: Option<String>,
}

impl FakeMailbox {
    /// Adds a message carrying one PNG attachment.
    pub fn with_image(mut self, id: &str, from: &str, date: i64, body: &str, png: Vec<u8>) -> Self {
        let attachment_id = format!("{id}-att");
        self.attachments.insert(attachment_id.clone(), png);
        self.messages.push(MailMessage {
            id: id.to_string(),
            sender: Some(from.to_string()),
            subject: Some("photo".to_string()),
            internal_date: date,
            body_plain: Some(body.to_string()),
            attachments: vec![AttachmentRef {
                attachment_id: Some(attachment_id),
                filename: Some("photo.png".to_string()),
                mime_type: "image/png".to_string(),
                ..Default::default()
            }],
        });
        self
    }
}

#[async_trait]
impl MailProvider for FakeMailbox {
    async fn list_messages(&self, query: &str, max_results: u32) -> Result<Vec<String>, RetrieveError> {
        if let Some(e) = &self.provider_error {
            return Err(RetrieveError::Provider(e.clone()));
        }
        Ok(self
            .messages
            .iter()
            .filter(|m| matches_from_terms(query, m.sender.as_deref().unwrap_or_default()))
            .take(max_results as usize)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<MailMessage, RetrieveError> {
        self.messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| RetrieveError::Provider(format!("no message {id}")))
    }

    async fn get_attachment(&self, _message_id: &str, attachment_id: &str) -> Result<Vec<u8>, RetrieveError> {
        self.attachments
            .get(attachment_id)
            .cloned()
            .ok_or_else(|| RetrieveError::Provider(format!("no attachment {attachment_id}")))
    }
}

/// `from:` / `-from:` search terms, applied the way Gmail does.
fn matches_from_terms(query: &str, from: &str) -> bool {
    let address = sender_address(from);
    query.split_whitespace().all(|term| {
        if let Some(wanted) = term.strip_prefix("-from:") {
            address != wanted
        } else if let Some(wanted) = term.strip_prefix("from:") {
            address == wanted
        } else {
            true
        }
    })
}

pub struct FakeConnector(pub FakeMailbox);

impl MailConnector for FakeConnector {
    fn connect(&self, _credential: &Credential) -> Result<Box<dyn MailProvider>, RetrieveError> {
        Ok(Box::new(self.0.clone()))
    }
}

pub struct TestApp {
    pub dir: TempDir,
    pub provider: MockServer,
    pub state: AppState,
}

impl TestApp {
    pub async fn new(mailbox: FakeMailbox) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let provider = MockServer::start().await;

        let mut config = Config::default();
        config.paths.token_file = dir.path().join("token.json");
        config.mail.earth_sender = EARTH.to_string();
        config.display.width = 160;
        config.display.height = 120;
        config.http.timeout_secs = 10;

        let secret = ApplicationSecret {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            token_uri: format!("{}/token", provider.uri()),
            auth_uri: format!("{}/auth", provider.uri()),
            ..Default::default()
        };
        let oauth = OAuthClient::new(
            secret,
            format!("{}/revoke", provider.uri()),
            Duration::from_secs(5),
        )
        .unwrap();
        let key = session_key_from_secret(SESSION_SECRET).unwrap();
        let state = AppState::new(&config, oauth, Arc::new(FakeConnector(mailbox)), key);

        Self { dir, provider, state }
    }

    pub fn token_path(&self) -> std::path::PathBuf {
        self.dir.path().join("token.json")
    }

    pub async fn store_credential(&self, expires_in_secs: i64) -> Credential {
        let credential = Credential {
            access_token: "access-1".to_string(),
            refresh_token: Some("refresh-1".to_string()),
            expiry: Utc::now() + chrono::Duration::seconds(expires_in_secs),
            scopes: vec![dispatchpi::auth::GMAIL_READONLY_SCOPE.to_string()],
            revoked_at: None,
        };
        self.state.credentials.save(&credential).await.unwrap();
        credential
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        let mut request = Request::get(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        router(self.state.clone())
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }
}

pub fn png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(color));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .expect("redirect without location")
        .to_str()
        .unwrap()
        .to_string()
}

/// `name=value` of the session cookie set by a response.
pub fn session_cookie(response: &Response<Body>) -> String {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(dispatchpi::session::SESSION_COOKIE_NAME))
        .and_then(|v| v.split(';').next())
        .expect("response did not set the session cookie")
        .to_string()
}
