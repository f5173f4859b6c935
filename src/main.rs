use lantalk::{Config, Peer, PeerEvent};
use std::env;
use tokio::{io, sync::mpsc::UnboundedReceiver};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt::init();

    let mut config = Config::init().await?;
    if let Some(peer_id) = env::args().nth(1) {
        config.peer_id = Some(peer_id);
    }

    let (mut peer, events) = Peer::new(config);
    peer.start().await?;

    let port = peer.port().unwrap_or_default();
    match local_ip_address::local_ip() {
        Ok(ip) => info!("🖥️  Peer {} reachable at {ip}:{port}", peer.peer_id()),
        Err(e) => warn!("Could not determine local IP ({e}), listening on port {port}"),
    }

    run_until_signal(events).await;

    peer.stop().await;
    Ok(())
}

async fn run_until_signal(mut events: UnboundedReceiver<PeerEvent>) {
    #[cfg(unix)]
    {
        use tokio::signal::{
            self,
            unix::{SignalKind, signal},
        };

        let (mut sigterm, mut sighup) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(term), Ok(hup)) => (term, hup),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Could not install signal handlers: {e}");
                return;
            }
        };
        let ctrl_c = signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                Some(event) = events.recv() => log_event(&event),

                _ = &mut ctrl_c => {
                    info!("🛑 SIGINT");
                    return;
                }

                _ = sigterm.recv() => {
                    info!("🛑 SIGTERM");
                    return;
                }

                _ = sighup.recv() => {
                    info!("🛑 SIGHUP");
                    return;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        use tokio::signal;

        let ctrl_c = signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                Some(event) = events.recv() => log_event(&event),

                _ = &mut ctrl_c => {
                    info!("🛑 SIGINT");
                    return;
                }
            }
        }
    }
}

fn log_event(event: &PeerEvent) {
    match event {
        PeerEvent::PeerDiscovered {
            peer_id,
            address,
            port,
        } => info!("👋 {peer_id} joined at {address}:{port}"),
        PeerEvent::MessageReceived { from, text } => info!("💬 [{from}] {text}"),
        PeerEvent::FileRequest {
            from,
            file_id,
            filename,
            filesize,
        } => info!(file_id = %file_id, "📁 {from} offers {filename} ({filesize} bytes)"),
        PeerEvent::FileResponse {
            from,
            file_id,
            accepted,
            ..
        } => info!(file_id = %file_id, accepted, "📨 {from} answered the offer"),
        PeerEvent::FileProgress {
            file_id,
            bytes_received,
            total_bytes,
            ..
        } => info!(file_id = %file_id, "⏳ {bytes_received}/{total_bytes} bytes"),
        PeerEvent::FileComplete {
            from,
            file_id,
            filename,
        } => info!(file_id = %file_id, "✅ {filename} received from {from}"),
        PeerEvent::FileError {
            from,
            file_id,
            error,
        } => warn!(file_id = %file_id, "❌ Transfer with {from} failed: {error}"),
    }
}
