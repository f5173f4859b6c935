pub mod interface;
pub mod service;

pub use interface::{FrameHandler, TransportError, TransportResult};
pub use service::MessagingService;
