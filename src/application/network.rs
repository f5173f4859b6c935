pub mod presence;
pub mod transport;

pub use presence::{DiscoveryService, PeerTable, PresenceInterface};
pub use transport::{FrameHandler, MessagingService, TransportError, TransportResult};

use std::time::Duration;
use tokio::{task::JoinHandle, time};
use tracing::warn;

const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Waits briefly for a signalled task to exit, aborting it otherwise.
pub(crate) async fn join_bounded(mut task: JoinHandle<()>, name: &str) {
    if time::timeout(JOIN_TIMEOUT, &mut task).await.is_err() {
        warn!("{name} task did not stop in time, aborting");
        task.abort();
    }
}
