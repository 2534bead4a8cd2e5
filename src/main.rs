use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{error, info, warn};

use ota_agent::buffers::BufferPool;
use ota_agent::config::load_config;
use ota_agent::connection::ResilienceManager;
use ota_agent::ota::{
    Ed25519Verifier, FileImageWriter, OtaAgent, OtaEvent, spawn_connectivity_listener,
};
use ota_agent::persistence::ImageStateStore;
use ota_agent::registry::TopicRegistry;
use ota_agent::session::{CommandClient, command_channel};
use ota_agent::transport::{FileCredentialStore, WebSocketTransport};
use ota_agent::utils::logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let settings = load_config()?;
    logging::init(&settings.logging.level);
    info!(
        "Starting OTA agent {} for {}",
        settings.broker.client_id, settings.broker.host
    );

    let registry = TopicRegistry::new(settings.session.max_subscriptions);
    let (sender, receiver) = command_channel(
        settings.session.command_queue_len,
        settings.session.command_pool_size,
    );
    let client = CommandClient::new(sender, &settings.session);
    let credentials = Arc::new(FileCredentialStore::new(settings.credentials.clone()));
    let manager = ResilienceManager::new(
        WebSocketTransport::new(),
        credentials,
        &settings,
        registry,
        receiver,
    );

    let reset = Arc::new(Notify::new());
    let reset_signal = reset.clone();
    let writer = FileImageWriter::new(
        &settings.ota,
        Box::new(Ed25519Verifier),
        ImageStateStore::open(&settings.ota.state_db_path)?,
        Box::new(move || reset_signal.notify_one()),
    );
    let pool = BufferPool::new(settings.buffers.count, settings.buffers.capacity);
    let agent = OtaAgent::new(client, writer, pool, settings.ota.clone());
    let ota = agent.handle();

    spawn_connectivity_listener(manager.subscribe_events(), ota.clone());
    let connection = tokio::spawn(manager.run());
    let mut update = tokio::spawn(agent.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            if let Err(e) = ota.send(OtaEvent::Shutdown).await {
                warn!("OTA agent already gone: {e}");
            }
            if let Err(e) = (&mut update).await {
                error!("OTA agent task failed: {e}");
            }
        }
        _ = reset.notified() => {
            info!("New image activated, exiting for reset");
        }
        finished = &mut update => {
            if let Err(e) = finished {
                error!("OTA agent task failed: {e}");
            }
        }
    }

    // The session closes once the last command client is gone.
    if let Err(e) = connection.await {
        error!("Connection task failed: {e}");
    }
    Ok(())
}
