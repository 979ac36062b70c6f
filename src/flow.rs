//! OAuth2 authorization-code flow.

use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::credentials::CredentialStore;
use crate::error::AuthError;
use crate::models::Credential;

/// Where the single-user authorization currently stands.
///
/// Consent happens at the provider, out of sight of the server, so the
/// awaiting-consent step is folded into `AwaitingCallback`: from the moment
/// the consent URL is handed out until the callback arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    NoToken,
    /// Consent URL handed out, user consenting or callback not yet received.
    AwaitingCallback,
    Authorized,
}

impl AuthPhase {
    /// A revoked credential counts as no token.
    pub fn of(credential: Option<&Credential>, pending_state: Option<&str>) -> Self {
        match (credential, pending_state) {
            (Some(c), _) if !c.is_revoked() => AuthPhase::Authorized,
            (_, Some(_)) => AuthPhase::AwaitingCallback,
            _ => AuthPhase::NoToken,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub authorize_url: Url,
    pub state: String,
}

/// Query parameters the provider sends to the callback route.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthorizationFlow {
    store: CredentialStore,
    redirect_uri: String,
}

impl AuthorizationFlow {
    pub fn new(store: CredentialStore, redirect_uri: impl Into<String>) -> Self {
        Self {
            store,
            redirect_uri: redirect_uri.into(),
        }
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Starts consent. The caller must remember `state` until the callback.
    pub fn begin(&self) -> Result<PendingAuthorization, AuthError> {
        let state = generate_state();
        let authorize_url = self
            .store
            .oauth()
            .authorization_url(&self.redirect_uri, &state)?;

        info!("starting authorization flow");
        Ok(PendingAuthorization {
            authorize_url,
            state,
        })
    }

    /// Verifies the callback against the remembered state, exchanges the
    /// code and persists the resulting credential over any previous one.
    pub async fn complete(
        &self,
        expected_state: Option<&str>,
        params: &CallbackParams,
    ) -> Result<Credential, AuthError> {
        match (expected_state, params.state.as_deref()) {
            (Some(expected), Some(returned)) if expected == returned => {}
            _ => {
                warn!("authorization callback state mismatch");
                return Err(AuthError::StateMismatch);
            }
        }

        if let Some(error) = &params.error {
            return Err(AuthError::Denied(error.clone()));
        }
        let code = params
            .code
            .as_deref()
            .ok_or_else(|| AuthError::Denied("callback carried no authorization code".to_string()))?;

        let credential = self
            .store
            .oauth()
            .exchange_code(code, &self.redirect_uri)
            .await?;
        self.store.save(&credential).await?;

        info!("authorization flow completed");
        Ok(credential)
    }
}

/// 32 random bytes, hex encoded.
fn generate_state() -> String {
    let bytes: [u8; 32] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
