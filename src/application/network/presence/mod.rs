pub mod interface;
pub mod service;
pub mod table;

pub use interface::PresenceInterface;
pub use service::DiscoveryService;
pub use table::PeerTable;
