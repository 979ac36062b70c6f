use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;
use yup_oauth2::{ApplicationSecret, read_application_secret};

use crate::error::CredentialError;
use crate::models::Credential;

pub const GMAIL_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.readonly";

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Talks to the provider's consent, token and revocation endpoints.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    secret: ApplicationSecret,
    revoke_url: String,
    http: reqwest::Client,
}

impl OAuthClient {
    pub async fn load_secret<P: AsRef<Path>>(path: P) -> Result<ApplicationSecret> {
        read_application_secret(path)
            .await
            .context("Failed to read application secret")
    }

    pub fn new(
        secret: ApplicationSecret,
        revoke_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CredentialError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            secret,
            revoke_url: revoke_url.into(),
            http,
        })
    }

    /// Consent URL requesting offline, read-only mail access.
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&self.secret.auth_uri)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.secret.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", GMAIL_READONLY_SCOPE)
            .append_pair("state", state)
            .append_pair("access_type", "offline")
            .append_pair("include_granted_scopes", "false")
            .append_pair("prompt", "consent");
        Ok(url)
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<Credential, CredentialError> {
        let token = self
            .token_request(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", &self.secret.client_id),
                ("client_secret", &self.secret.client_secret),
            ])
            .await?;

        info!(has_refresh_token = token.refresh_token.is_some(), "exchanged authorization code");
        Ok(credential_from_response(token, None, Vec::new()))
    }

    /// Refresh-token grant. The result keeps the old refresh token when the
    /// provider does not rotate it.
    pub async fn refresh(&self, credential: &Credential) -> Result<Credential, CredentialError> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .ok_or(CredentialError::MissingRefreshToken)?;

        let token = self
            .token_request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", &self.secret.client_id),
                ("client_secret", &self.secret.client_secret),
            ])
            .await?;

        debug!("refreshed access token");
        Ok(credential_from_response(
            token,
            credential.refresh_token.clone(),
            credential.scopes.clone(),
        ))
    }

    /// Revokes the whole grant: the refresh token when present, otherwise
    /// the access token.
    pub async fn revoke(&self, credential: &Credential) -> Result<(), CredentialError> {
        let token = credential
            .refresh_token
            .as_deref()
            .unwrap_or(&credential.access_token);
        let response = self
            .http
            .post(&self.revoke_url)
            .query(&[("token", token)])
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!("provider confirmed token revocation");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(CredentialError::Rejected {
            status: status.as_u16(),
            message: error_message(&body),
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, CredentialError> {
        let response = self.http.post(&self.secret.token_uri).form(form).send().await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CredentialError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

fn credential_from_response(
    token: TokenResponse,
    previous_refresh: Option<String>,
    previous_scopes: Vec<String>,
) -> Credential {
    let expires_in = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
    let scopes = match token.scope {
        Some(scope) => scope.split_whitespace().map(String::from).collect(),
        None if previous_scopes.is_empty() => vec![GMAIL_READONLY_SCOPE.to_string()],
        None => previous_scopes,
    };

    Credential {
        access_token: token.access_token,
        refresh_token: token.refresh_token.or(previous_refresh),
        expiry: Utc::now() + chrono::Duration::seconds(expires_in),
        scopes,
        revoked_at: None,
    }
}

/// Best human-readable message from an OAuth error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error_description")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.trim().to_string())
}
