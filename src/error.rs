//! Error types for each pipeline stage.
//!
//! Every stage returns its own tagged error. Only the request dispatcher
//! collapses them into the generic failure response.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("token file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("token file is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("credential has no refresh token")]
    MissingRefreshToken,

    #[error("credential was revoked")]
    Revoked,

    #[error("token endpoint unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("token endpoint rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("authorization state does not match the session")]
    StateMismatch,

    #[error("provider denied authorization: {0}")]
    Denied(String),

    #[error("code exchange failed: {0}")]
    Exchange(#[from] CredentialError),

    #[error("invalid authorization endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Error, Debug)]
pub enum RetrieveError {
    #[error("mail provider error: {0}")]
    Provider(String),

    #[error("attachment is not a readable image: {0}")]
    AttachmentDecode(#[from] image::ImageError),

    #[error("unexpected mail retrieval failure: {0}")]
    Unexpected(String),
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("failed to encode frame: {0}")]
    Encode(#[from] image::ImageError),
}

/// Everything that can stop a frame request after a credential was found.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Retrieve(#[from] RetrieveError),

    #[error("no matching message with an image attachment")]
    NoImage,

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("frame pipeline exceeded {0} seconds")]
    Timeout(u64),
}
