use async_trait::async_trait;
use std::net::IpAddr;
use tokio::io;

#[async_trait]
pub trait PresenceInterface: Send + Sync + 'static {
    async fn broadcast(&self, data: &[u8]) -> io::Result<()>;
    async fn recv(&self) -> io::Result<(Vec<u8>, IpAddr)>;

    fn local_port(&self) -> u16;
}
