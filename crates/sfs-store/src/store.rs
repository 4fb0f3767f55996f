//! The `FileStore` handle and the actor task that owns its table.
//!
//! Every handle method enqueues a command on an unbounded channel before it
//! returns (query methods hand back a future only after sending), so calls
//! from one task are applied in call order. The actor alone touches the
//! [`FileTable`]; disk work runs on the [`DiskWorker`] sequence and comes
//! back as events.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use sfs_crypto::ContentHasher;
use sfs_types::{Checksum, DomainTag, OwnerKey};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::content::{FileContent, PLACEHOLDER_MIME_TYPE};
use crate::disk::{DiskStore, FsDiskStore};
use crate::error::StoreResult;
use crate::metadata::SaveScheduler;
use crate::table::{FileSummary, FileTable, StoreStats};
use crate::worker::{DiskEvent, DiskOp, DiskWorker};

enum Command {
    Load,
    SetLocalFile {
        owner: OwnerKey,
        checksum: Checksum,
        content: Bytes,
    },
    SetRef {
        owner: OwnerKey,
        checksum: Checksum,
    },
    RemoveRef {
        owner: OwnerKey,
    },
    RemoveAllSyncRefsForType {
        domain: DomainTag,
    },
    GetFile {
        checksum: Checksum,
        reply: oneshot::Sender<FileContent>,
    },
    GetMimeType {
        checksum: Checksum,
        reply: oneshot::Sender<String>,
    },
    TotalStorageSize {
        reply: oneshot::Sender<u64>,
    },
    Stats {
        reply: oneshot::Sender<StoreStats>,
    },
    List {
        reply: oneshot::Sender<Vec<FileSummary>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running file store.
///
/// Cloning is cheap; all clones talk to the same actor. The actor stops
/// once [`FileStore::shutdown`] is called or the last handle is dropped,
/// saving any pending metadata first.
///
/// Commands issued before loading completes are held and applied, in order,
/// right after the load. Content queries therefore wait for the load.
#[derive(Clone, Debug)]
pub struct FileStore {
    commands: mpsc::UnboundedSender<Command>,
    loaded: watch::Receiver<bool>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Load => "Load",
            Self::SetLocalFile { .. } => "SetLocalFile",
            Self::SetRef { .. } => "SetRef",
            Self::RemoveRef { .. } => "RemoveRef",
            Self::RemoveAllSyncRefsForType { .. } => "RemoveAllSyncRefsForType",
            Self::GetFile { .. } => "GetFile",
            Self::GetMimeType { .. } => "GetMimeType",
            Self::TotalStorageSize { .. } => "TotalStorageSize",
            Self::Stats { .. } => "Stats",
            Self::List { .. } => "List",
            Self::Flush { .. } => "Flush",
            Self::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl FileStore {
    /// Start a store over `disk`. Must be called from within a Tokio
    /// runtime. Nothing is read until [`FileStore::load`].
    pub fn spawn(config: &StoreConfig, disk: Arc<dyn DiskStore>) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (loaded_tx, loaded) = watch::channel(false);

        let actor = Actor {
            table: FileTable::new(config.max_resident_bytes),
            worker: Some(DiskWorker::spawn(disk, events_tx)),
            saves: SaveScheduler::new(config.save_delay()),
            loaded: loaded_tx,
            load_requested: false,
            deferred: VecDeque::new(),
            closing: false,
            shutdown_replies: Vec::new(),
        };
        tokio::spawn(actor.run(commands_rx, events_rx));

        Self { commands, loaded }
    }

    /// Open the filesystem store described by `config` and start loading it.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let disk = FsDiskStore::open(config)?;
        info!(root = %config.root.display(), "opening file store");
        let store = Self::spawn(config, Arc::new(disk));
        store.send(Command::Load);
        Ok(store)
    }

    /// Read persisted state and reconcile it with the blob directory.
    /// Resolves once loaded; calling it again only waits.
    pub fn load(&self) -> impl Future<Output = ()> + Send + 'static {
        self.send(Command::Load);
        self.on_loaded()
    }

    /// Resolves once the store has loaded, or immediately if the store
    /// stopped before it could.
    pub fn on_loaded(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut loaded = self.loaded.clone();
        async move {
            let _ = loaded.wait_for(|loaded| *loaded).await;
        }
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    /// Store `content` for the local owner `owner` in `domain` and return
    /// its checksum. Writing happens in the background; the content is
    /// readable through [`FileStore::get_file`] immediately.
    pub fn set_local_file(
        &self,
        owner: impl Into<String>,
        domain: &DomainTag,
        content: impl Into<Bytes>,
    ) -> Checksum {
        let content = content.into();
        let checksum = ContentHasher::BLOB.checksum(&content);
        self.send(Command::SetLocalFile {
            owner: OwnerKey::local(domain.clone(), owner),
            checksum: checksum.clone(),
            content,
        });
        checksum
    }

    /// Point a local owner at content expected to exist already.
    pub fn set_local_file_ref(&self, owner: impl Into<String>, domain: &DomainTag, checksum: Checksum) {
        self.send(Command::SetRef {
            owner: OwnerKey::local(domain.clone(), owner),
            checksum,
        });
    }

    /// Point a sync owner at `checksum`. The content may not have arrived
    /// yet.
    pub fn set_sync_file_ref(&self, owner: impl Into<String>, domain: &DomainTag, checksum: Checksum) {
        self.send(Command::SetRef {
            owner: OwnerKey::sync(domain.clone(), owner),
            checksum,
        });
    }

    /// Content for `checksum`, or a placeholder if it is unknown or its
    /// bytes are unavailable.
    pub fn get_file(&self, checksum: &Checksum) -> impl Future<Output = FileContent> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let command = Command::GetFile {
            checksum: checksum.clone(),
            reply,
        };
        self.request(command, rx, FileContent::Missing)
    }

    /// MIME type matching what [`FileStore::get_file`] would return.
    pub fn get_mime_type(&self, checksum: &Checksum) -> impl Future<Output = String> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        let command = Command::GetMimeType {
            checksum: checksum.clone(),
            reply,
        };
        self.request(command, rx, PLACEHOLDER_MIME_TYPE.to_string())
    }

    pub fn remove_local_ref(&self, owner: impl Into<String>, domain: &DomainTag) {
        self.send(Command::RemoveRef {
            owner: OwnerKey::local(domain.clone(), owner),
        });
    }

    pub fn remove_sync_ref(&self, owner: impl Into<String>, domain: &DomainTag) {
        self.send(Command::RemoveRef {
            owner: OwnerKey::sync(domain.clone(), owner),
        });
    }

    /// Release every sync reference in `domain`.
    pub fn remove_all_sync_refs_for_type(&self, domain: &DomainTag) {
        self.send(Command::RemoveAllSyncRefsForType {
            domain: domain.clone(),
        });
    }

    /// Sum of the sizes of all referenced content.
    pub fn total_storage_size(&self) -> impl Future<Output = u64> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        self.request(Command::TotalStorageSize { reply }, rx, 0)
    }

    pub fn stats(&self) -> impl Future<Output = StoreStats> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Stats { reply }, rx, StoreStats::default())
    }

    /// One summary per record, sorted by checksum.
    pub fn list(&self) -> impl Future<Output = Vec<FileSummary>> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        self.request(Command::List { reply }, rx, Vec::new())
    }

    /// Save pending metadata now and wait until every disk operation issued
    /// so far has completed and been applied.
    pub fn flush(&self) -> impl Future<Output = ()> + Send + 'static {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Flush { reply }, rx, ())
    }

    /// Stop the store for every handle, saving pending metadata and
    /// draining queued disk work first.
    pub async fn shutdown(self) {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Shutdown { reply }, rx, ()).await
    }

    fn send(&self, command: Command) {
        if let Err(mpsc::error::SendError(command)) = self.commands.send(command) {
            debug!(?command, "file store stopped; command dropped");
        }
    }

    /// Send the command built around a fresh reply channel and wait for the
    /// answer, or `fallback` if the actor is gone.
    fn request<T: Send + 'static>(
        &self,
        command: Command,
        rx: oneshot::Receiver<T>,
        fallback: T,
    ) -> impl Future<Output = T> + Send + 'static {
        self.send(command);
        async move { rx.await.unwrap_or(fallback) }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct Actor {
    table: FileTable,
    worker: Option<DiskWorker>,
    saves: SaveScheduler,
    loaded: watch::Sender<bool>,
    load_requested: bool,
    deferred: VecDeque<Command>,
    closing: bool,
    shutdown_replies: Vec<oneshot::Sender<()>>,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<DiskEvent>,
    ) {
        loop {
            // Completions still in flight may issue more work, such as the
            // rewrite of a blob re-referenced while it was being deleted.
            if self.closing && !self.awaiting_load() && !self.table.has_disk_work_in_flight() {
                break;
            }
            let deadline = self.saves.deadline();
            tokio::select! {
                biased;
                Some(event) = events.recv() => self.on_event(event),
                command = commands.recv(), if !self.closing => match command {
                    Some(command) => self.on_command(command),
                    None => self.closing = true,
                },
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.saves.take();
                    self.save();
                }
                else => break,
            }
        }

        if self.saves.take() {
            self.save();
        }
        if let Some(worker) = self.worker.take() {
            worker.join().await;
        }
        for reply in self.shutdown_replies.drain(..) {
            let _ = reply.send(());
        }
        debug!("file store stopped");
    }

    fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    fn awaiting_load(&self) -> bool {
        self.load_requested && !self.is_loaded()
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Load => self.request_load(),
            Command::Shutdown { reply } if !self.awaiting_load() => self.begin_shutdown(reply),
            command if !self.is_loaded() => self.deferred.push_back(command),
            command => self.apply(command),
        }
    }

    fn request_load(&mut self) {
        if self.load_requested {
            return;
        }
        self.load_requested = true;
        self.submit(DiskOp::Load);
    }

    fn begin_shutdown(&mut self, reply: oneshot::Sender<()>) {
        info!("file store shutting down");
        self.closing = true;
        self.shutdown_replies.push(reply);
    }

    fn apply(&mut self, command: Command) {
        match command {
            Command::Load => self.request_load(),
            Command::SetLocalFile {
                owner,
                checksum,
                content,
            } => self.table.set_local_file(owner, checksum, content),
            Command::SetRef { owner, checksum } => self.table.set_file_ref(owner, checksum),
            Command::RemoveRef { owner } => {
                if !self.table.remove_ref(&owner) {
                    debug!(owner = %owner, "no reference to remove");
                }
            }
            Command::RemoveAllSyncRefsForType { domain } => {
                self.table.remove_all_sync_refs_for_type(&domain);
            }
            Command::GetFile { checksum, reply } => self.table.get_file(&checksum, reply),
            Command::GetMimeType { checksum, reply } => {
                let _ = reply.send(self.table.mime_type(&checksum));
            }
            Command::TotalStorageSize { reply } => {
                let _ = reply.send(self.table.total_storage_size());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.table.stats());
            }
            Command::List { reply } => {
                let _ = reply.send(self.table.summaries());
            }
            Command::Flush { reply } => {
                if self.saves.take() {
                    self.save();
                }
                self.submit(DiskOp::Barrier(reply));
            }
            Command::Shutdown { reply } => self.begin_shutdown(reply),
        }
        self.pump();
    }

    fn on_event(&mut self, event: DiskEvent) {
        match event {
            DiskEvent::Loaded(state) => {
                self.table.load(state);
                self.loaded.send_replace(true);
                self.pump();
                let deferred = std::mem::take(&mut self.deferred);
                if !deferred.is_empty() {
                    debug!(commands = deferred.len(), "replaying commands issued before load");
                }
                for command in deferred {
                    self.apply(command);
                }
            }
            DiskEvent::ReadDone(checksum, result) => self.table.on_read_done(&checksum, result),
            DiskEvent::WriteDone(checksum, result) => self.table.on_write_done(&checksum, result),
            DiskEvent::DeleteDone(checksum, result) => self.table.on_delete_done(&checksum, result),
            DiskEvent::Saved(Ok(())) => debug!("file store metadata saved"),
            DiskEvent::Saved(Err(e)) => {
                warn!(error = %e, "failed to save file store metadata; will retry");
                self.saves.schedule(Instant::now());
            }
            DiskEvent::Barrier(reply) => {
                let _ = reply.send(());
            }
        }
        self.pump();
    }

    /// Hand queued disk work to the worker and arm a save if anything
    /// persisted changed.
    fn pump(&mut self) {
        for op in self.table.take_ops() {
            self.submit(op);
        }
        if self.table.take_dirty() && self.saves.schedule(Instant::now()) {
            debug!(deadline = ?self.saves.deadline(), "metadata save scheduled");
        }
    }

    fn save(&mut self) {
        match self.table.snapshot().encode() {
            Ok(data) => self.submit(DiskOp::SaveMetadata(data)),
            Err(e) => warn!(error = %e, "failed to encode file store metadata"),
        }
    }

    fn submit(&mut self, op: DiskOp) {
        let submitted = self.worker.as_ref().is_some_and(|worker| worker.submit(op));
        if !submitted {
            warn!("disk sequence stopped; operation dropped");
        }
    }
}
