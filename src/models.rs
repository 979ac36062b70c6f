use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// The two display contexts served by the appliance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameType {
    /// Images sent by anyone except the earth sender.
    SatelliteFrame,
    /// Images sent by the earth sender only.
    EarthFrame,
}

impl FrameType {
    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::SatelliteFrame => "satellite_frame",
            FrameType::EarthFrame => "earth_frame",
        }
    }

    /// Route path serving this frame.
    pub fn path(self) -> &'static str {
        match self {
            FrameType::SatelliteFrame => "/satellite_frame",
            FrameType::EarthFrame => "/earth_frame",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FrameType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "satellite_frame" => Ok(FrameType::SatelliteFrame),
            "earth_frame" => Ok(FrameType::EarthFrame),
            other => Err(format!("unknown frame type: {other}")),
        }
    }
}

/// OAuth2 token set persisted in the token file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expiry: DateTime<Utc>,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Set once the provider confirmed revocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Seconds before the recorded expiry at which a token counts as expired.
    pub const EXPIRY_SKEW_SECS: i64 = 60;

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expiry - chrono::Duration::seconds(Self::EXPIRY_SKEW_SECS)
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Attachment metadata as listed in a message payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentRef {
    pub part_id: Option<String>,
    pub attachment_id: Option<String>,
    pub filename: Option<String>,
    pub mime_type: String,
    /// Small attachments arrive inline instead of behind an attachment id.
    pub inline_data: Option<Vec<u8>>,
}

impl AttachmentRef {
    pub fn is_image(&self) -> bool {
        self.mime_type.to_ascii_lowercase().starts_with("image/")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailMessage {
    pub id: String,
    pub sender: Option<String>,
    pub subject: Option<String>,
    /// Milliseconds since the epoch, as assigned by the provider.
    pub internal_date: i64,
    pub body_plain: Option<String>,
    pub attachments: Vec<AttachmentRef>,
}

impl MailMessage {
    pub fn first_image(&self) -> Option<&AttachmentRef> {
        self.attachments.iter().find(|a| a.is_image())
    }
}

/// The selected message, ready for rendering.
#[derive(Debug, Clone)]
pub struct RetrievedMessage {
    pub message_id: String,
    pub sender: String,
    pub caption_text: String,
    pub image: DynamicImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFrame {
    pub png_bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}
