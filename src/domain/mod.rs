pub mod event;
pub mod peer;
pub mod transfer;

pub use event::{EventSender, PeerEvent};
pub use peer::PeerRecord;
pub use transfer::{ActiveTransfer, Destination, TransferRequest, TransferStatus};
