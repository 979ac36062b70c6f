//! Prints which Gmail account the stored credential belongs to.

use anyhow::{Context, bail};
use dispatchpi::auth::OAuthClient;
use dispatchpi::config::Config;
use dispatchpi::credentials::CredentialStore;
use dispatchpi::gmail::GmailClient;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load(Config::settings_path())?;
    let secret = OAuthClient::load_secret(&config.paths.client_secret_file).await?;
    let oauth = OAuthClient::new(secret, config.http.revoke_url.clone(), config.http_timeout())?;
    let store = CredentialStore::new(&config.paths.token_file, Arc::new(oauth));

    let Some(credential) = store.load().await else {
        eprintln!("No token file found at {}.", store.path().display());
        eprintln!("Authenticate first: {}/authorize", config.server.public_url);
        std::process::exit(1);
    };
    if credential.is_revoked() {
        bail!("stored credential was revoked; authenticate again at {}/authorize", config.server.public_url);
    }
    if credential.is_expired() {
        println!("Refreshing expired credentials...");
    }
    let credential = store
        .ensure_valid(credential)
        .await
        .context("Failed to refresh stored credential")?;

    let client = GmailClient::with_access_token(credential.access_token)?;
    let address = client
        .profile_address()
        .await
        .context("Failed to fetch Gmail profile")?;

    let base = config.server.public_url.trim_end_matches('/');
    println!("Authenticated Gmail account: {address}");
    println!("To test the system, send emails TO: {address}");
    println!("Attach an image and put the caption in the email body.");
    println!("--------------------------------------------------------------------------------");
    println!("Satellite frame (images from others): {base}/satellite_frame");
    if config.mail.earth_sender.is_empty() {
        println!("Earth frame: mail.earth_sender is not configured");
    } else {
        println!(
            "Earth frame (images from {}): {base}/earth_frame",
            config.mail.earth_sender
        );
    }

    Ok(())
}
