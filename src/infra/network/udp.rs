use crate::application::network::PresenceInterface;
use async_trait::async_trait;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::{io, net::UdpSocket};

/// Large enough for any control frame plus its length prefix.
const RECV_BUF_SIZE: usize = 8192;

pub struct UdpBroadcaster {
    socket: UdpSocket,
    broadcast_addr: SocketAddr,
    local_port: u16,
}

impl UdpBroadcaster {
    /// Binds `0.0.0.0:port` with address reuse, so several peers on one host
    /// can share the discovery port. Port 0 binds an ephemeral port, and the
    /// announcements then go to that same port on `broadcast_addr`.
    pub fn bind(port: u16, broadcast_addr: Ipv4Addr) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_broadcast(true)?;
        socket.set_nonblocking(true)?;

        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        socket.bind(&SockAddr::from(bind_addr))?;

        let std_udp: std::net::UdpSocket = socket.into();
        let local_port = std_udp.local_addr()?.port();
        let socket = UdpSocket::from_std(std_udp)?;

        Ok(Self {
            socket,
            broadcast_addr: SocketAddr::V4(SocketAddrV4::new(broadcast_addr, local_port)),
            local_port,
        })
    }
}

#[async_trait]
impl PresenceInterface for UdpBroadcaster {
    async fn broadcast(&self, data: &[u8]) -> io::Result<()> {
        self.socket
            .send_to(data, self.broadcast_addr)
            .await
            .map(|_| ())
    }

    async fn recv(&self) -> io::Result<(Vec<u8>, IpAddr)> {
        let mut buf = vec![0u8; RECV_BUF_SIZE];
        let (size, src_addr) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(size);

        Ok((buf, src_addr.ip()))
    }

    fn local_port(&self) -> u16 {
        self.local_port
    }
}
