//! Signed-cookie session carrying the pending OAuth state and the view the
//! user originally asked for.

use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::FrameType;

pub const SESSION_COOKIE_NAME: &str = "dispatchpi_session";

/// View name meaning "back to the index page".
pub const INDEX_VIEW: &str = "index";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_state: Option<String>,
}

impl SessionData {
    pub fn from_jar(jar: &SignedCookieJar) -> Self {
        let Some(cookie) = jar.get(SESSION_COOKIE_NAME) else {
            return Self::default();
        };
        serde_json::from_str(cookie.value()).unwrap_or_else(|e| {
            warn!(error = %e, "discarding unreadable session cookie");
            Self::default()
        })
    }

    pub fn store(&self, jar: SignedCookieJar) -> SignedCookieJar {
        // Serializing two optional strings cannot fail.
        let value = serde_json::to_string(self).unwrap_or_default();
        jar.add(session_cookie(value))
    }

    /// Path to send the user to once authorization completes. Anything
    /// but a frame view goes back to the index.
    pub fn return_path(&self) -> &'static str {
        self.view
            .as_deref()
            .and_then(|v| v.parse::<FrameType>().ok())
            .map_or("/", FrameType::path)
    }
}

fn session_cookie(value: String) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}
