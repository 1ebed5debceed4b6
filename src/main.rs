use anyhow::Result;
use tokio::signal;

use ara_notification_client::config::Settings;
use ara_notification_client::envelope::Envelope;
use ara_notification_client::telemetry::init_tracing;
use ara_notification_client::ClientSession;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_tracing(&settings.logging)?;
    tracing::info!(url = %settings.server.url, "Configuration loaded");

    let session = ClientSession::new(&settings)?;

    session.manager().on_state_change(|change| {
        if change.is_guest() {
            tracing::warn!("Connected as guest, session is read-only");
        }
    });

    for channel in &settings.channels {
        session.registry().subscribe_fn(channel, |envelope: &Envelope| {
            match envelope.notification() {
                Some(record) => tracing::info!(
                    notification_id = %record.id,
                    kind = ?record.kind,
                    title = %record.title,
                    "Notification received"
                ),
                None => tracing::info!(
                    channel = ?envelope.channel,
                    kind = %envelope.kind(),
                    envelope_id = %envelope.id,
                    "Envelope received"
                ),
            }
            Ok(())
        });
    }

    let mut summary = session.notifications().watch_summary();
    let summary_handle = tokio::spawn(async move {
        while summary.changed().await.is_ok() {
            let current = *summary.borrow();
            tracing::debug!(total = current.total, unread = current.unread, "Notification totals");
        }
    });

    session.connect()?;

    shutdown_signal_handler().await;

    session.disconnect();
    summary_handle.abort();
    tracing::info!("Client shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, disconnecting");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, disconnecting");
        }
    }
}
