pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod proto;

pub use application::{Peer, PeerError, PeerResult};
pub use config::Config;
pub use domain::{PeerEvent, PeerRecord};
