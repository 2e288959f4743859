use crate::api::ApiServer;
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::media::check_ffmpeg_available;
use anyhow::Result;
use tracing::{error, info, warn};

/// Run the local API until Ctrl-C.
pub async fn run_server(port: u16) -> Result<()> {
    info!("Starting chat-digest service");

    let config = Config::load()?;
    let credentials = CredentialStore::open_default()?;

    if config.summary.include_media {
        if let Err(err) = check_ffmpeg_available(&config.media) {
            warn!("Video attachments will be skipped: {}", err);
        }
    }

    let api_server = ApiServer::new(&config, credentials, port);
    let server = tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            error!("API server failed: {}", e);
        }
    });

    info!("chat-digest is ready!");
    info!(
        "Try: curl -X POST http://127.0.0.1:{port}/summarize -H 'content-type: application/json' -d '{{\"archive_path\": \"/path/to/chat.zip\"}}'"
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
        _ = server => {}
    }

    Ok(())
}
