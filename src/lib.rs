//! DispatchPi frame server.
//!
//! Pulls the newest image attachment from a Gmail inbox, fits it to an
//! e-ink panel with a caption, and serves it over HTTP. The satellite
//! frame shows mail from everyone except the configured earth sender;
//! the earth frame shows only that sender's mail.

pub mod auth;
pub mod config;
pub mod credentials;
pub mod error;
pub mod flow;
pub mod gmail;
pub mod mailbox;
pub mod models;
pub mod render;
pub mod retriever;
pub mod server;
pub mod session;

pub use config::Config;
pub use error::{AuthError, CredentialError, FrameError, RenderError, RetrieveError};
pub use models::{Credential, FrameType, RenderedFrame, RetrievedMessage};
pub use server::{AppState, router};
