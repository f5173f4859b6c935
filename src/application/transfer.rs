use crate::domain::{ActiveTransfer, Destination, TransferRequest, TransferStatus};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, sync::Mutex as StdMutex};
use tokio::{fs::File, sync::Mutex};
use tracing::info;

/// Book-keeping for file transfers: offers we sent and are waiting on, and
/// transfers in flight in either direction.
///
/// Both locks are held only for the map access itself. Destination files are
/// written and flushed through their own [`Destination`] lock.
pub struct TransferManager {
    pending: StdMutex<HashMap<String, TransferRequest>>,
    active: Mutex<HashMap<String, ActiveTransfer>>,
}

impl TransferManager {
    pub fn new() -> Self {
        Self {
            pending: StdMutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert_pending(&self, request: TransferRequest) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(request.file_id.clone(), request);
        }
    }

    /// Removes a pending request, but only when `from` is the peer it was
    /// sent to.
    pub fn take_pending(&self, file_id: &str, from: &str) -> Option<TransferRequest> {
        self.pending.lock().ok().and_then(|mut pending| {
            let matches = pending.get(file_id).is_some_and(|r| r.peer_id == from);

            if matches { pending.remove(file_id) } else { None }
        })
    }

    pub fn remove_pending(&self, file_id: &str) -> Option<TransferRequest> {
        self.pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(file_id))
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or_default()
    }

    /// Registers a transfer unless one with the same id already exists.
    pub async fn insert_active(&self, transfer: ActiveTransfer) -> bool {
        let mut active = self.active.lock().await;

        if active.contains_key(&transfer.file_id) {
            return false;
        }
        info!(file_id = %transfer.file_id, peer = %transfer.peer_id, "📁 Transfer registered: {}", transfer.filename);
        active.insert(transfer.file_id.clone(), transfer);
        true
    }

    /// Counterpart and status of a transfer.
    pub async fn status_of(&self, file_id: &str) -> Option<(String, TransferStatus)> {
        self.active
            .lock()
            .await
            .get(file_id)
            .map(|t| (t.peer_id.clone(), t.status))
    }

    /// Moves a requested transfer to accepted with its save file open.
    /// Returns false when the transfer is gone or was already answered.
    pub async fn attach_destination(&self, file_id: &str, file: File, target: SocketAddr) -> bool {
        let mut active = self.active.lock().await;

        match active.get_mut(file_id) {
            Some(transfer) if transfer.status == TransferStatus::Requested => {
                transfer.destination = Some(Arc::new(Mutex::new(file)));
                transfer.status = TransferStatus::Accepted;
                transfer.target = Some(target);
                true
            }
            _ => false,
        }
    }

    /// Save file of an accepted transfer from `from`.
    pub async fn destination(&self, file_id: &str, from: &str) -> Option<Destination> {
        self.active
            .lock()
            .await
            .get(file_id)
            .filter(|t| t.is_receiving_from(from))
            .and_then(|t| t.destination.clone())
    }

    /// Accounts for a chunk already written to disk and returns
    /// `(bytes_received, filesize)`.
    pub async fn record_chunk(&self, file_id: &str, chunk_num: u64, len: u64) -> Option<(u64, u64)> {
        let mut active = self.active.lock().await;
        let transfer = active.get_mut(file_id)?;

        transfer.received_chunks.push(chunk_num);
        transfer.bytes_received += len;
        Some((transfer.bytes_received, transfer.filesize))
    }

    /// Takes the save file out of a transfer from `from`, leaving the entry
    /// in place so it can be closed before the entry goes away. With
    /// `complete` set, the transfer is also marked complete.
    pub async fn detach_destination(
        &self,
        file_id: &str,
        from: &str,
        complete: bool,
    ) -> Option<Destination> {
        let mut active = self.active.lock().await;
        let transfer = active.get_mut(file_id).filter(|t| t.peer_id == from)?;

        if complete {
            transfer.status = TransferStatus::Complete;
        }
        transfer.destination.take()
    }

    pub async fn is_receiving(&self, file_id: &str, from: &str) -> bool {
        self.active
            .lock()
            .await
            .get(file_id)
            .is_some_and(|t| t.is_receiving_from(from))
    }

    /// Removes a transfer when `from` is its counterpart.
    pub async fn take_active(&self, file_id: &str, from: &str) -> Option<ActiveTransfer> {
        let mut active = self.active.lock().await;

        if active.get(file_id).is_some_and(|t| t.peer_id == from) {
            active.remove(file_id)
        } else {
            None
        }
    }

    pub async fn remove_active(&self, file_id: &str) -> Option<ActiveTransfer> {
        self.active.lock().await.remove(file_id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}
