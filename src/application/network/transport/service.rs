use crate::{
    application::network::{FrameHandler, TransportResult, join_bounded},
    infra::network::tcp::{TcpReceiver, TcpSender},
};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use tokio::{io, net::TcpListener, sync::watch, task::JoinHandle};
use tracing::{error, info};

pub struct MessagingService<H: FrameHandler> {
    receiver: Arc<TcpReceiver<H>>,
    sender: TcpSender,
    running: Option<Running>,
}

struct Running {
    port: u16,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl<H: FrameHandler> MessagingService<H> {
    pub fn new(handler: Arc<H>, sender: TcpSender, read_timeout: Duration, max_frames: usize) -> Self {
        Self {
            receiver: Arc::new(TcpReceiver::new(handler, read_timeout, max_frames)),
            sender,
            running: None,
        }
    }

    /// Binds `0.0.0.0:port` (0 picks a free port) and returns the bound port.
    pub async fn start(&mut self, port: u16) -> io::Result<u16> {
        if let Some(running) = &self.running {
            return Ok(running.port);
        }

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let listener = TcpListener::bind(bind_addr).await?;
        let port = listener.local_addr()?.port();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, self.receiver.clone(), shutdown_rx));

        info!(port, "📨 Messaging listening");

        self.running = Some(Running {
            port,
            shutdown_tx,
            task,
        });
        Ok(port)
    }

    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown_tx.send(true);
        join_bounded(running.task, "messaging").await;
        info!("📨 Messaging stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.running.as_ref().map(|r| r.port)
    }

    pub async fn send_message(&self, target: SocketAddr, message: &str) -> TransportResult<()> {
        self.sender.send_message(target, message).await
    }

    pub async fn send_file_request(
        &self,
        target: SocketAddr,
        file_id: &str,
        filename: &str,
        filesize: u64,
    ) -> TransportResult<()> {
        self.sender
            .send_file_request(target, file_id, filename, filesize)
            .await
    }

    pub async fn send_file_response(
        &self,
        target: SocketAddr,
        file_id: &str,
        accepted: bool,
        save_path: Option<String>,
    ) -> TransportResult<()> {
        self.sender
            .send_file_response(target, file_id, accepted, save_path)
            .await
    }
}

async fn accept_loop<H: FrameHandler>(
    listener: TcpListener,
    receiver: Arc<TcpReceiver<H>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            res = listener.accept() => match res {
                Ok((stream, src_addr)) => {
                    let receiver = receiver.clone();
                    tokio::spawn(async move {
                        receiver.handle_connection(stream, src_addr).await;
                    });
                }
                Err(e) => error!("Error accepting connection: {e}"),
            },
            _ = shutdown.changed() => break,
        }
    }
}
