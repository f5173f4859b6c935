pub mod network;
pub mod peer;
pub mod transfer;

pub use peer::{Peer, PeerError, PeerResult};
pub use transfer::TransferManager;
