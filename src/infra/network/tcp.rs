pub mod receiver;
pub mod sender;

pub use receiver::TcpReceiver;
pub use sender::TcpSender;
