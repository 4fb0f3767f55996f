//! The background disk sequence.
//!
//! All blocking I/O of a store runs here, one operation at a time, in the
//! order it was issued. Results travel back to the owning actor as
//! [`DiskEvent`]s over a channel; if the actor is gone the results are
//! dropped.

use std::sync::Arc;

use bytes::Bytes;
use sfs_crypto::ContentHasher;
use sfs_types::Checksum;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::disk::DiskStore;
use crate::error::{StoreError, StoreResult};
use crate::metadata::MetadataTable;

/// Work items for the disk sequence.
#[derive(Debug)]
pub enum DiskOp {
    /// Read the metadata file and list the blob directory.
    Load,
    Read(Checksum),
    Write(Checksum, Bytes),
    Delete(Checksum),
    SaveMetadata(Vec<u8>),
    /// Completes once every previously issued operation has completed.
    Barrier(oneshot::Sender<()>),
}

/// Everything the store needs to rebuild its table at startup.
#[derive(Debug, Default)]
pub struct LoadedState {
    pub metadata: MetadataTable,
    pub on_disk: Vec<Checksum>,
    /// The metadata file exists but could not be read.
    pub metadata_unreadable: bool,
    /// The blob directory could not be listed; `on_disk` is empty.
    pub listing_failed: bool,
}

/// Completion notices posted back to the owning actor.
#[derive(Debug)]
pub enum DiskEvent {
    Loaded(LoadedState),
    ReadDone(Checksum, StoreResult<Bytes>),
    WriteDone(Checksum, StoreResult<()>),
    DeleteDone(Checksum, StoreResult<()>),
    Saved(StoreResult<()>),
    Barrier(oneshot::Sender<()>),
}

/// Handle to a running disk sequence.
pub struct DiskWorker {
    ops: mpsc::UnboundedSender<DiskOp>,
    handle: JoinHandle<()>,
}

impl DiskWorker {
    /// Start the disk sequence on a dedicated blocking thread.
    pub fn spawn(disk: Arc<dyn DiskStore>, events: mpsc::UnboundedSender<DiskEvent>) -> Self {
        let (ops, mut rx) = mpsc::unbounded_channel::<DiskOp>();
        let handle = tokio::task::spawn_blocking(move || {
            while let Some(op) = rx.blocking_recv() {
                let event = execute(disk.as_ref(), op);
                if events.send(event).is_err() {
                    debug!("file store gone; discarding disk result");
                }
            }
            debug!("disk sequence stopped");
        });
        Self { ops, handle }
    }

    /// Queue an operation. Returns `false` if the sequence has stopped.
    pub fn submit(&self, op: DiskOp) -> bool {
        self.ops.send(op).is_ok()
    }

    /// Stop accepting work and wait for queued operations to finish.
    pub async fn join(self) {
        drop(self.ops);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "disk sequence panicked");
        }
    }
}

/// Run one operation against the backing store.
pub fn execute(disk: &dyn DiskStore, op: DiskOp) -> DiskEvent {
    match op {
        DiskOp::Load => DiskEvent::Loaded(load(disk)),
        DiskOp::Read(checksum) => {
            let result = read_verified(disk, &checksum);
            DiskEvent::ReadDone(checksum, result)
        }
        DiskOp::Write(checksum, data) => {
            let result = disk.write(&checksum, &data);
            DiskEvent::WriteDone(checksum, result)
        }
        DiskOp::Delete(checksum) => {
            let result = disk.delete(&checksum).map(|existed| {
                if !existed {
                    debug!(checksum = %checksum, "deleted blob was already absent");
                }
            });
            DiskEvent::DeleteDone(checksum, result)
        }
        DiskOp::SaveMetadata(data) => DiskEvent::Saved(disk.write_metadata(&data)),
        DiskOp::Barrier(reply) => DiskEvent::Barrier(reply),
    }
}

fn load(disk: &dyn DiskStore) -> LoadedState {
    let (raw, metadata_unreadable) = match disk.read_metadata() {
        Ok(raw) => (raw, false),
        Err(e) => {
            warn!(error = %e, "failed to read file store metadata");
            (None, true)
        }
    };
    let metadata = MetadataTable::decode_or_empty(raw.as_deref());
    let (on_disk, listing_failed) = match disk.list() {
        Ok(on_disk) => (on_disk, false),
        Err(e) => {
            warn!(error = %e, "failed to list blob directory");
            (Vec::new(), true)
        }
    };
    debug!(files = metadata.len(), blobs = on_disk.len(), "file store metadata read");
    LoadedState {
        metadata,
        on_disk,
        metadata_unreadable,
        listing_failed,
    }
}

/// Read a blob and check it against its checksum.
fn read_verified(disk: &dyn DiskStore, checksum: &Checksum) -> StoreResult<Bytes> {
    let data = disk.read(checksum)?;
    if !ContentHasher::BLOB.verify(&data, checksum) {
        return Err(StoreError::HashMismatch {
            checksum: checksum.clone(),
            actual_len: data.len() as u64,
        });
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDiskStore;
    use crate::metadata::PersistedFile;

    fn checksum(data: &[u8]) -> Checksum {
        ContentHasher::BLOB.checksum(data)
    }

    #[test]
    fn read_verifies_content() {
        let disk = InMemoryDiskStore::new();
        let c = checksum(b"real");
        disk.insert(c.clone(), &b"fake"[..]);
        match execute(&disk, DiskOp::Read(c)) {
            DiskEvent::ReadDone(_, Err(e)) => {
                assert!(matches!(e, StoreError::HashMismatch { actual_len: 4, .. }));
                assert!(e.is_content_gone());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn delete_of_absent_blob_succeeds() {
        let disk = InMemoryDiskStore::new();
        assert!(matches!(
            execute(&disk, DiskOp::Delete(checksum(b"gone"))),
            DiskEvent::DeleteDone(_, Ok(()))
        ));
    }

    #[test]
    fn load_tolerates_corrupt_metadata() {
        let disk = InMemoryDiskStore::new();
        disk.set_metadata(&b"\x00garbage"[..]);
        let c = checksum(b"blob");
        disk.insert(c.clone(), &b"blob"[..]);
        match execute(&disk, DiskOp::Load) {
            DiskEvent::Loaded(state) => {
                assert!(state.metadata.is_empty());
                assert!(!state.metadata_unreadable);
                assert_eq!(state.on_disk, vec![c]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn load_flags_unreadable_metadata() {
        let disk = InMemoryDiskStore::new();
        disk.set_metadata(MetadataTable::new(vec![PersistedFile::new(checksum(b"a"))]).encode().unwrap());
        disk.set_fail_metadata_reads(true);
        match execute(&disk, DiskOp::Load) {
            DiskEvent::Loaded(state) => {
                assert!(state.metadata.is_empty());
                assert!(state.metadata_unreadable);
                assert!(!state.listing_failed);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn load_reads_metadata() {
        let disk = InMemoryDiskStore::new();
        let table = MetadataTable::new(vec![PersistedFile::new(checksum(b"a"))]);
        disk.set_metadata(table.encode().unwrap());
        match execute(&disk, DiskOp::Load) {
            DiskEvent::Loaded(state) => assert_eq!(state.metadata, table),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn sequence_preserves_issue_order() {
        let disk = Arc::new(InMemoryDiskStore::new());
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let worker = DiskWorker::spawn(disk.clone(), events_tx);

        let c = checksum(b"ordered");
        assert!(worker.submit(DiskOp::Write(c.clone(), Bytes::from_static(b"ordered"))));
        assert!(worker.submit(DiskOp::Read(c.clone())));
        assert!(worker.submit(DiskOp::Delete(c.clone())));
        let (reply, done) = oneshot::channel();
        assert!(worker.submit(DiskOp::Barrier(reply)));

        assert!(matches!(events.recv().await, Some(DiskEvent::WriteDone(_, Ok(())))));
        match events.recv().await {
            Some(DiskEvent::ReadDone(_, Ok(data))) => assert_eq!(data.as_ref(), b"ordered"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(events.recv().await, Some(DiskEvent::DeleteDone(_, Ok(())))));
        match events.recv().await {
            Some(DiskEvent::Barrier(reply)) => reply.send(()).unwrap(),
            other => panic!("unexpected event {other:?}"),
        }
        done.await.unwrap();

        worker.join().await;
        assert!(disk.is_empty());
    }
}
