use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, RwLock};

use bytes::Bytes;
use sfs_types::Checksum;

use crate::disk::DiskStore;
use crate::error::{StoreError, StoreResult};

/// A latch that blocks callers of [`Gate::pass`] while closed.
#[derive(Debug, Default)]
struct Gate {
    closed: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    fn set_closed(&self, closed: bool) {
        *self.closed.lock().expect("lock poisoned") = closed;
        self.cv.notify_all();
    }

    fn pass(&self) {
        let guard = self.closed.lock().expect("lock poisoned");
        let _open = self
            .cv
            .wait_while(guard, |closed| *closed)
            .expect("lock poisoned");
    }
}

/// Operation counters, useful for asserting dedup and read coalescing.
#[derive(Debug, Default)]
struct Counters {
    reads: AtomicUsize,
    writes: AtomicUsize,
    deletes: AtomicUsize,
    metadata_writes: AtomicUsize,
}

/// In-memory, `HashMap`-based backing store.
///
/// Intended for tests and embedding. Besides plain storage it counts
/// operations and can hold back or fail reads and deletes, which lets
/// callers observe the store while disk work is still in flight.
#[derive(Default)]
pub struct InMemoryDiskStore {
    blobs: RwLock<HashMap<Checksum, Bytes>>,
    metadata: RwLock<Option<Vec<u8>>>,
    counters: Counters,
    read_gate: Gate,
    delete_gate: Gate,
    fail_reads: AtomicBool,
    fail_deletes: AtomicBool,
    fail_metadata_reads: AtomicBool,
}

impl InMemoryDiskStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if no blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|data| data.len() as u64)
            .sum()
    }

    /// Blob content, bypassing gates and counters.
    pub fn get(&self, checksum: &Checksum) -> Option<Bytes> {
        self.blobs.read().expect("lock poisoned").get(checksum).cloned()
    }

    /// Insert a blob directly, bypassing gates and counters.
    pub fn insert(&self, checksum: Checksum, data: impl Into<Bytes>) {
        self.blobs
            .write()
            .expect("lock poisoned")
            .insert(checksum, data.into());
    }

    /// Current metadata file content.
    pub fn metadata(&self) -> Option<Vec<u8>> {
        self.metadata.read().expect("lock poisoned").clone()
    }

    /// Replace the metadata file directly, bypassing counters.
    pub fn set_metadata(&self, data: impl Into<Vec<u8>>) {
        *self.metadata.write().expect("lock poisoned") = Some(data.into());
    }

    pub fn read_count(&self) -> usize {
        self.counters.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.counters.writes.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.counters.deletes.load(Ordering::SeqCst)
    }

    pub fn metadata_write_count(&self) -> usize {
        self.counters.metadata_writes.load(Ordering::SeqCst)
    }

    /// Block reads until [`Self::resume_reads`] is called.
    pub fn pause_reads(&self) {
        self.read_gate.set_closed(true);
    }

    pub fn resume_reads(&self) {
        self.read_gate.set_closed(false);
    }

    /// Block deletes until [`Self::resume_deletes`] is called.
    pub fn pause_deletes(&self) {
        self.delete_gate.set_closed(true);
    }

    pub fn resume_deletes(&self) {
        self.delete_gate.set_closed(false);
    }

    /// Make every subsequent read fail with an I/O error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent delete fail with an I/O error.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent metadata read fail with an I/O error.
    pub fn set_fail_metadata_reads(&self, fail: bool) {
        self.fail_metadata_reads.store(fail, Ordering::SeqCst);
    }

    /// Return a sorted list of all stored checksums.
    pub fn all_checksums(&self) -> Vec<Checksum> {
        let map = self.blobs.read().expect("lock poisoned");
        let mut checksums: Vec<Checksum> = map.keys().cloned().collect();
        checksums.sort();
        checksums
    }
}

fn injected_failure(op: &str) -> StoreError {
    StoreError::Io(io::Error::new(
        io::ErrorKind::Other,
        format!("injected {op} failure"),
    ))
}

impl DiskStore for InMemoryDiskStore {
    fn read(&self, checksum: &Checksum) -> StoreResult<Bytes> {
        self.read_gate.pass();
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected_failure("read"));
        }
        self.get(checksum)
            .ok_or_else(|| StoreError::NotFound(checksum.clone()))
    }

    fn write(&self, checksum: &Checksum, data: &[u8]) -> StoreResult<()> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        self.insert(checksum.clone(), Bytes::copy_from_slice(data));
        Ok(())
    }

    fn delete(&self, checksum: &Checksum) -> StoreResult<bool> {
        self.delete_gate.pass();
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(injected_failure("delete"));
        }
        let mut map = self.blobs.write().expect("lock poisoned");
        Ok(map.remove(checksum).is_some())
    }

    fn list(&self) -> StoreResult<Vec<Checksum>> {
        Ok(self.all_checksums())
    }

    fn read_metadata(&self) -> StoreResult<Option<Vec<u8>>> {
        if self.fail_metadata_reads.load(Ordering::SeqCst) {
            return Err(injected_failure("metadata read"));
        }
        Ok(self.metadata())
    }

    fn write_metadata(&self, data: &[u8]) -> StoreResult<()> {
        self.counters.metadata_writes.fetch_add(1, Ordering::SeqCst);
        self.set_metadata(data);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryDiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDiskStore")
            .field("blob_count", &self.len())
            .field("total_bytes", &self.total_bytes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfs_crypto::ContentHasher;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn checksum(data: &[u8]) -> Checksum {
        ContentHasher::BLOB.checksum(data)
    }

    // -----------------------------------------------------------------------
    // Core CRUD
    // -----------------------------------------------------------------------

    #[test]
    fn write_and_read() {
        let store = InMemoryDiskStore::new();
        let c = checksum(b"hello world");
        store.write(&c, b"hello world").unwrap();
        assert_eq!(store.read(&c).unwrap().as_ref(), b"hello world");
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read_count(), 1);
    }

    #[test]
    fn read_missing_is_not_found() {
        let store = InMemoryDiskStore::new();
        assert!(matches!(
            store.read(&checksum(b"missing")),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn delete_present_and_absent() {
        let store = InMemoryDiskStore::new();
        let c = checksum(b"to-delete");
        store.write(&c, b"to-delete").unwrap();
        assert!(store.delete(&c).unwrap());
        assert!(store.get(&c).is_none());
        assert!(!store.delete(&c).unwrap());
        assert_eq!(store.delete_count(), 2);
    }

    #[test]
    fn list_is_sorted() {
        let store = InMemoryDiskStore::new();
        for data in [&b"ccc"[..], b"aaa", b"bbb"] {
            store.write(&checksum(data), data).unwrap();
        }
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 3);
        for w in listed.windows(2) {
            assert!(w[0] <= w[1]);
        }
    }

    #[test]
    fn total_bytes() {
        let store = InMemoryDiskStore::new();
        store.write(&checksum(b"12345"), b"12345").unwrap();
        store.write(&checksum(b"123456789"), b"123456789").unwrap();
        assert_eq!(store.total_bytes(), 14);
    }

    #[test]
    fn metadata_roundtrip_counts_writes() {
        let store = InMemoryDiskStore::new();
        assert!(store.read_metadata().unwrap().is_none());
        store.write_metadata(b"meta").unwrap();
        assert_eq!(store.read_metadata().unwrap().unwrap(), b"meta");
        assert_eq!(store.metadata_write_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    #[test]
    fn injected_failures() {
        let store = InMemoryDiskStore::new();
        let c = checksum(b"x");
        store.insert(c.clone(), &b"x"[..]);

        store.set_fail_reads(true);
        assert!(matches!(store.read(&c), Err(StoreError::Io(_))));
        store.set_fail_deletes(true);
        assert!(store.delete(&c).is_err());
        assert!(store.get(&c).is_some());

        store.set_metadata(&b"meta"[..]);
        store.set_fail_metadata_reads(true);
        assert!(store.read_metadata().is_err());

        store.set_fail_reads(false);
        store.set_fail_deletes(false);
        store.set_fail_metadata_reads(false);
        assert!(store.read_metadata().unwrap().is_some());
        assert!(store.read(&c).is_ok());
        assert!(store.delete(&c).unwrap());
    }

    #[test]
    fn paused_delete_waits_for_resume() {
        let store = Arc::new(InMemoryDiskStore::new());
        let c = checksum(b"gated");
        store.insert(c.clone(), &b"gated"[..]);
        store.pause_deletes();

        let worker = {
            let store = Arc::clone(&store);
            let c = c.clone();
            thread::spawn(move || store.delete(&c).unwrap())
        };

        thread::sleep(Duration::from_millis(20));
        assert!(store.get(&c).is_some(), "delete ran while paused");

        store.resume_deletes();
        assert!(worker.join().expect("thread should not panic"));
        assert!(store.get(&c).is_none());
    }

    #[test]
    fn debug_format() {
        let store = InMemoryDiskStore::new();
        store.insert(checksum(b"x"), &b"x"[..]);
        let debug = format!("{store:?}");
        assert!(debug.contains("InMemoryDiskStore"));
        assert!(debug.contains("blob_count"));
    }
}
