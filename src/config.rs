use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use axum_extra::extract::cookie::Key;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::render::FitPolicy;

/// Environment variable overriding the settings file location.
pub const SETTINGS_ENV: &str = "DISPATCHPI_SETTINGS";
const DEFAULT_SETTINGS_FILE: &str = "settings.toml";

/// Minimum length of the cookie signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub paths: Paths,
    pub mail: MailSettings,
    pub display: DisplaySettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
    /// Externally visible base URL, used to build the OAuth redirect URI.
    pub public_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub token_file: PathBuf,
    pub session_key_file: PathBuf,
    pub client_secret_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    /// The whitelisted address whose mail feeds the earth frame.
    pub earth_sender: String,
    pub max_messages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub width: u32,
    pub height: u32,
    pub fit: FitPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub revoke_url: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            public_url: "http://localhost:8080".to_string(),
        }
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            token_file: PathBuf::from("secrets/token.json"),
            session_key_file: PathBuf::from("secrets/session_key.json"),
            client_secret_file: PathBuf::from("secrets/client_secret.json"),
        }
    }
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            earth_sender: String::new(),
            max_messages: 25,
        }
    }
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            width: 600,
            height: 448,
            fit: FitPolicy::Crop,
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            revoke_url: "https://oauth2.googleapis.com/revoke".to_string(),
        }
    }
}

impl Config {
    /// Settings file location: `$DISPATCHPI_SETTINGS` or `./settings.toml`.
    pub fn settings_path() -> PathBuf {
        std::env::var_os(SETTINGS_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE))
    }

    /// Loads settings from `path`. A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;

        if config.display.width == 0 || config.display.height == 0 {
            bail!("display width and height must be non-zero");
        }
        Ok(config)
    }

    pub fn redirect_uri(&self) -> String {
        format!("{}/oauth2callback", self.server.public_url.trim_end_matches('/'))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }
}

#[derive(Deserialize)]
struct SessionKeyFile {
    #[serde(rename = "SECRET_KEY")]
    secret_key: String,
}

/// Reads the cookie signing secret from its JSON key file.
pub fn load_session_key<P: AsRef<Path>>(path: P) -> Result<Key> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read session key file {}", path.display()))?;
    let file: SessionKeyFile =
        serde_json::from_str(&content).context("Failed to parse session key file")?;
    session_key_from_secret(&file.secret_key)
}

pub fn session_key_from_secret(secret: &str) -> Result<Key> {
    if secret.len() < MIN_SECRET_LEN {
        bail!("session secret must be at least {MIN_SECRET_LEN} bytes");
    }
    Ok(Key::derive_from(secret.as_bytes()))
}
