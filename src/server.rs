//! HTTP routes: the two frame views plus the authorization controls.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::extract::{FromRef, Query, State};
use axum::http::StatusCode;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::cookie::{Key, SignedCookieJar};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::auth::OAuthClient;
use crate::config::{Config, load_session_key};
use crate::credentials::CredentialStore;
use crate::error::{AuthError, FrameError};
use crate::flow::{AuthPhase, AuthorizationFlow, CallbackParams};
use crate::gmail::GmailConnector;
use crate::mailbox::MailConnector;
use crate::models::{Credential, FrameType, RenderedFrame};
use crate::render::{FitPolicy, Renderer};
use crate::retriever::MailRetriever;
use crate::session::{INDEX_VIEW, SessionData};

pub const FRAME_FAILURE_MESSAGE: &str = "Failed to retrieve image. Please try again later.";
pub const REVOKE_SUCCESS_MESSAGE: &str = "Credentials successfully revoked.";
pub const REVOKE_FAILURE_MESSAGE: &str = "An error occurred.";
pub const AUTH_FAILURE_MESSAGE: &str = "Authorization failed. Please start again from /authorize.";

pub const INDEX_HTML: &str = concat!(
    "<table>",
    "<tr><td><a href='/satellite_frame'>See the satellite's frame</a></td></tr>",
    "<tr><td><a href='/earth_frame'>See the earth's frame</a></td></tr>",
    "<tr><td><a href='/authorize'>Test the auth flow directly. You will be sent back to the index</a></td></tr>",
    "<tr><td><a href='/revoke'>Revoke current credentials</a></td></tr>",
    "</table>",
);

#[derive(Clone)]
pub struct AppState {
    pub credentials: CredentialStore,
    pub flow: AuthorizationFlow,
    pub retriever: Arc<MailRetriever>,
    pub renderer: Renderer,
    pub fit: FitPolicy,
    pub connector: Arc<dyn MailConnector>,
    pub key: Key,
    /// Upper bound on one frame pipeline run.
    pub pipeline_timeout: Duration,
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.key.clone()
    }
}

impl AppState {
    pub fn new(
        config: &Config,
        oauth: OAuthClient,
        connector: Arc<dyn MailConnector>,
        key: Key,
    ) -> Self {
        let credentials = CredentialStore::new(&config.paths.token_file, Arc::new(oauth));
        let flow = AuthorizationFlow::new(credentials.clone(), config.redirect_uri());

        Self {
            credentials,
            flow,
            retriever: Arc::new(MailRetriever::new(
                &config.mail.earth_sender,
                config.mail.max_messages,
            )),
            renderer: Renderer::new(config.display.width, config.display.height),
            fit: config.display.fit,
            connector,
            key,
            pipeline_timeout: config.http_timeout(),
        }
    }

    /// Production wiring: secrets from disk, Gmail as the mailbox.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let secret = OAuthClient::load_secret(&config.paths.client_secret_file).await?;
        let oauth = OAuthClient::new(secret, config.http.revoke_url.clone(), config.http_timeout())?;
        let key = load_session_key(&config.paths.session_key_file)?;
        Ok(Self::new(config, oauth, Arc::new(GmailConnector), key))
    }

    /// Runs credential refresh, retrieval and rendering for one frame.
    pub async fn render_frame(
        &self,
        frame: FrameType,
        credential: Credential,
    ) -> Result<RenderedFrame, FrameError> {
        tokio::time::timeout(self.pipeline_timeout, self.run_pipeline(frame, credential))
            .await
            .map_err(|_| FrameError::Timeout(self.pipeline_timeout.as_secs()))?
    }

    async fn run_pipeline(
        &self,
        frame: FrameType,
        credential: Credential,
    ) -> Result<RenderedFrame, FrameError> {
        let credential = self.credentials.ensure_valid(credential).await?;
        let mailbox = self.connector.connect(&credential)?;
        let message = self
            .retriever
            .retrieve(frame, mailbox.as_ref())
            .await?
            .ok_or(FrameError::NoImage)?;

        Ok(self
            .renderer
            .render(&message.image, &message.caption_text, self.fit)?)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/satellite_frame", get(satellite_frame))
        .route("/earth_frame", get(earth_frame))
        .route("/authorize", get(authorize))
        .route("/oauth2callback", get(oauth2callback))
        .route("/revoke", get(revoke))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn satellite_frame(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    serve_frame(state, jar, FrameType::SatelliteFrame).await
}

async fn earth_frame(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    serve_frame(state, jar, FrameType::EarthFrame).await
}

async fn serve_frame(state: AppState, jar: SignedCookieJar, frame: FrameType) -> Response {
    let Some(credential) = state.credentials.load().await.filter(|c| !c.is_revoked()) else {
        info!(%frame, "no usable credential, redirecting to authorization");
        let mut session = SessionData::from_jar(&jar);
        session.view = Some(frame.as_str().to_string());
        return (session.store(jar), Redirect::to("/authorize")).into_response();
    };

    match state.render_frame(frame, credential).await {
        Ok(rendered) => (
            [(CONTENT_TYPE, "image/png"), (CACHE_CONTROL, "no-store")],
            rendered.png_bytes,
        )
            .into_response(),
        Err(e) => {
            error!(%frame, error = %e, "frame request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, FRAME_FAILURE_MESSAGE).into_response()
        }
    }
}

async fn authorize(State(state): State<AppState>, jar: SignedCookieJar) -> Response {
    let mut session = SessionData::from_jar(&jar);
    if session.view.is_none() {
        session.view = Some(INDEX_VIEW.to_string());
    }

    let stored = state.credentials.load().await;
    let phase = AuthPhase::of(stored.as_ref(), session.oauth_state.as_deref());
    info!(?phase, "authorization requested");

    if let (AuthPhase::Authorized, Some(credential)) = (phase, stored) {
        match state.credentials.ensure_valid(credential).await {
            Ok(_) => return (session.store(jar), Redirect::to("/")).into_response(),
            Err(e) => warn!(error = %e, "stored credential unusable, starting a new authorization"),
        }
    }

    match state.flow.begin() {
        Ok(pending) => {
            session.oauth_state = Some(pending.state);
            (session.store(jar), Redirect::to(pending.authorize_url.as_str())).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to build authorization URL");
            (StatusCode::INTERNAL_SERVER_ERROR, AUTH_FAILURE_MESSAGE).into_response()
        }
    }
}

async fn oauth2callback(
    State(state): State<AppState>,
    jar: SignedCookieJar,
    Query(params): Query<CallbackParams>,
) -> Response {
    let mut session = SessionData::from_jar(&jar);
    // The state is single-use whatever the outcome.
    let expected = session.oauth_state.take();
    let result = state.flow.complete(expected.as_deref(), &params).await;

    match result {
        Ok(_) => {
            let target = session.return_path();
            session.view = None;
            (session.store(jar), Redirect::to(target)).into_response()
        }
        Err(e) => {
            error!(error = %e, "authorization callback failed");
            let status = match e {
                AuthError::StateMismatch | AuthError::Denied(_) => StatusCode::BAD_REQUEST,
                AuthError::Exchange(_) | AuthError::InvalidUrl(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, session.store(jar), AUTH_FAILURE_MESSAGE).into_response()
        }
    }
}

async fn revoke(State(state): State<AppState>) -> Html<String> {
    let message = match state.credentials.load().await {
        Some(credential) => match state.credentials.revoke(&credential).await {
            Ok(()) => REVOKE_SUCCESS_MESSAGE,
            Err(e) => {
                error!(error = %e, "revocation failed");
                REVOKE_FAILURE_MESSAGE
            }
        },
        None => {
            warn!("revocation requested without a stored credential");
            REVOKE_FAILURE_MESSAGE
        }
    };
    Html(format!("{message}{INDEX_HTML}"))
}
