//! The reference table: records, the owner index, and the deferred
//! deletion state machine.
//!
//! `FileTable` performs no I/O. Every disk operation it needs is queued in
//! an outbox that the owner drains with [`FileTable::take_ops`]; completions
//! come back through the `on_*_done` methods. This keeps all reference
//! bookkeeping synchronous and single-owner.
//!
//! Per-record deletion states:
//!
//! ```text
//! Active ──last ref released──▶ (content on disk?) ──no──▶ removed
//!                                      │yes
//!                                      ▼
//!                                  Deleting ──ok──▶ removed (or rewritten if re-referenced)
//!                                      │err
//!                                      ▼
//!                      unreferenced leftover (deleted at next load)
//! ```

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use serde::Serialize;
use sfs_types::{Checksum, DomainTag, OwnerKey, OwnerKind};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::content::{FileContent, PLACEHOLDER_MIME_TYPE};
use crate::error::StoreResult;
use crate::metadata::{MetadataTable, PersistedFile};
use crate::mime;
use crate::record::FileRecord;
use crate::worker::{DiskOp, LoadedState};

/// Aggregate counters over the table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Records in the table, including those awaiting deletion.
    pub records: usize,
    /// Records with at least one reference.
    pub referenced: usize,
    pub local_references: usize,
    pub sync_references: usize,
    /// Bytes currently held in memory.
    pub resident_bytes: u64,
    pub pending_deletes: usize,
    pub pending_reads: usize,
    /// Sum of the sizes encoded in referenced checksums.
    pub total_storage_size: u64,
}

/// One row of [`FileTable::summaries`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FileSummary {
    pub checksum: Checksum,
    pub mime_type: Option<String>,
    pub on_disk: bool,
    pub resident: bool,
    pub deleting: bool,
    pub local_refs: usize,
    pub sync_refs: usize,
}

/// In-memory reference table for one store.
#[derive(Debug)]
pub struct FileTable {
    records: HashMap<Checksum, FileRecord>,
    owners: HashMap<OwnerKey, Checksum>,
    outbox: Vec<DiskOp>,
    dirty: bool,
    clock: u64,
    resident_bytes: u64,
    max_resident_bytes: u64,
}

impl FileTable {
    pub fn new(max_resident_bytes: u64) -> Self {
        Self {
            records: HashMap::new(),
            owners: HashMap::new(),
            outbox: Vec::new(),
            dirty: false,
            clock: 0,
            resident_bytes: 0,
            max_resident_bytes,
        }
    }

    // -----------------------------------------------------------------------
    // Load
    // -----------------------------------------------------------------------

    /// Rebuild the table from persisted metadata and the blob listing.
    ///
    /// Records left without references but with content on disk, and blobs
    /// on disk that no metadata mentions, start deferred deletion. Unlisted
    /// blobs are only reclaimed when the metadata was actually read; if the
    /// directory listing failed, every recorded file is assumed present.
    pub fn load(&mut self, state: LoadedState) {
        let reclaim_orphans = !state.metadata_unreadable;
        let assume_on_disk = state.listing_failed;
        let on_disk: HashSet<Checksum> = state.on_disk.into_iter().collect();
        let mut repaired = false;

        for file in state.metadata.files {
            let record = self.records.entry(file.checksum.clone()).or_default();
            if record.mime_type.is_none() {
                record.mime_type = file.mime_type.clone();
            }
            record.has_content_on_disk = assume_on_disk || on_disk.contains(&file.checksum);

            for owner in file.owners() {
                if let Some(existing) = self.owners.get(&owner) {
                    warn!(
                        owner = %owner,
                        kept = %existing,
                        dropped = %file.checksum,
                        "owner referenced more than one file; keeping the first"
                    );
                    repaired = true;
                    continue;
                }
                record.references.insert(owner.clone());
                self.owners.insert(owner, file.checksum.clone());
            }
        }

        let mut orphans = 0;
        if !reclaim_orphans && !on_disk.is_empty() {
            warn!(blobs = on_disk.len(), "metadata unreadable; leaving unlisted blobs in place");
        }
        for checksum in on_disk.into_iter().filter(|_| reclaim_orphans) {
            self.records.entry(checksum).or_insert_with(|| {
                orphans += 1;
                FileRecord {
                    has_content_on_disk: true,
                    ..FileRecord::default()
                }
            });
        }

        let unreferenced: Vec<Checksum> = self
            .records
            .iter()
            .filter(|(_, record)| !record.is_referenced())
            .map(|(checksum, _)| checksum.clone())
            .collect();
        repaired |= unreferenced.len() > orphans;
        for checksum in &unreferenced {
            self.teardown(checksum);
        }

        self.dirty = repaired;
        info!(
            files = self.records.len(),
            owners = self.owners.len(),
            reclaimed = unreferenced.len(),
            orphans,
            "file store loaded"
        );
    }

    // -----------------------------------------------------------------------
    // References
    // -----------------------------------------------------------------------

    /// Cache `content` under `checksum`, write it out if it is not on disk
    /// yet, and point `owner` at it.
    pub fn set_local_file(&mut self, owner: OwnerKey, checksum: Checksum, content: Bytes) {
        let now = self.tick();
        let record = self.records.entry(checksum.clone()).or_default();
        record.last_access = now;

        if record.mime_type.is_none() {
            record.mime_type = Some(mime::sniff(&content).to_string());
            self.dirty = true;
        }
        match &record.content {
            Some(existing) => {
                debug_assert_eq!(existing, &content, "content differs for {checksum}");
            }
            None => {
                self.resident_bytes += content.len() as u64;
                record.content = Some(content.clone());
            }
        }
        if !record.pending_reads.is_empty() {
            record.resolve_pending(FileContent::Stored(content.clone()));
        }

        // A record that is being deleted still has a file on disk; the
        // delete completion rewrites it from the resident bytes.
        if record.has_content_on_disk {
            debug!(checksum = %checksum, "content already stored");
        } else {
            record.has_content_on_disk = true;
            record.write_in_flight = true;
            self.outbox.push(DiskOp::Write(checksum.clone(), content));
            debug!(checksum = %checksum, "writing blob");
        }

        self.set_file_ref(owner, checksum);
        self.enforce_budget();
    }

    /// Point `owner` at `checksum`, releasing whatever it pointed at before.
    pub fn set_file_ref(&mut self, owner: OwnerKey, checksum: Checksum) {
        if self.owners.get(&owner) == Some(&checksum) {
            return;
        }
        if let Some(previous) = self.owners.remove(&owner) {
            self.release(&previous, &owner);
        }
        let record = self.records.entry(checksum.clone()).or_default();
        record.references.insert(owner.clone());
        debug!(owner = %owner, checksum = %checksum, "reference set");
        self.owners.insert(owner, checksum);
        self.dirty = true;
    }

    /// Drop `owner`'s reference. Returns `false` if it held none.
    pub fn remove_ref(&mut self, owner: &OwnerKey) -> bool {
        let Some(checksum) = self.owners.remove(owner) else {
            return false;
        };
        debug!(owner = %owner, checksum = %checksum, "reference removed");
        self.release(&checksum, owner);
        self.dirty = true;
        true
    }

    /// Drop every sync reference in `domain`. Returns how many were dropped.
    pub fn remove_all_sync_refs_for_type(&mut self, domain: &DomainTag) -> usize {
        let owners: Vec<OwnerKey> = self
            .owners
            .keys()
            .filter(|owner| owner.is_sync() && owner.domain == *domain)
            .cloned()
            .collect();
        for owner in &owners {
            self.remove_ref(owner);
        }
        if !owners.is_empty() {
            info!(domain = %domain, released = owners.len(), "sync references cleared");
        }
        owners.len()
    }

    fn release(&mut self, checksum: &Checksum, owner: &OwnerKey) {
        let Some(record) = self.records.get_mut(checksum) else {
            warn!(owner = %owner, checksum = %checksum, "owner index points at a missing record");
            return;
        };
        record.references.remove(owner);
        if !record.is_referenced() {
            self.teardown(checksum);
        }
    }

    /// Begin tearing down an unreferenced record.
    fn teardown(&mut self, checksum: &Checksum) {
        let Some(record) = self.records.get_mut(checksum) else {
            return;
        };
        if record.is_deleting {
            return;
        }
        if record.has_content_on_disk {
            record.is_deleting = true;
            self.outbox.push(DiskOp::Delete(checksum.clone()));
            debug!(checksum = %checksum, "deleting unreferenced blob");
        } else {
            self.drop_record(checksum);
        }
    }

    fn drop_record(&mut self, checksum: &Checksum) {
        if let Some(mut record) = self.records.remove(checksum) {
            self.resident_bytes = self.resident_bytes.saturating_sub(record.resident_len());
            record.resolve_pending(FileContent::Unknown);
            debug!(checksum = %checksum, "record dropped");
        }
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    /// Answer a content request, joining or issuing a disk read if needed.
    pub fn get_file(&mut self, checksum: &Checksum, reply: oneshot::Sender<FileContent>) {
        let now = self.tick();
        let Some(record) = self
            .records
            .get_mut(checksum)
            .filter(|record| record.is_referenced())
        else {
            let _ = reply.send(FileContent::Unknown);
            return;
        };
        record.last_access = now;

        if let Some(content) = &record.content {
            let _ = reply.send(FileContent::Stored(content.clone()));
            return;
        }
        if !record.has_content_on_disk {
            let _ = reply.send(FileContent::Missing);
            return;
        }

        record.pending_reads.push(reply);
        // A deleting record's readers wait for the delete outcome.
        if record.read_in_flight || record.is_deleting {
            return;
        }
        record.read_in_flight = true;
        self.outbox.push(DiskOp::Read(checksum.clone()));
        debug!(checksum = %checksum, "reading blob");
    }

    /// MIME type of the content [`Self::get_file`] would return.
    pub fn mime_type(&self, checksum: &Checksum) -> String {
        match self.records.get(checksum).filter(|r| r.is_referenced()) {
            None => PLACEHOLDER_MIME_TYPE.to_string(),
            Some(record) if record.content.is_none() && !record.has_content_on_disk => {
                PLACEHOLDER_MIME_TYPE.to_string()
            }
            Some(record) => record
                .mime_type
                .clone()
                .or_else(|| record.content.as_ref().map(|c| mime::sniff(c).to_string()))
                .unwrap_or_else(|| mime::OCTET_STREAM.to_string()),
        }
    }

    // -----------------------------------------------------------------------
    // Disk completions
    // -----------------------------------------------------------------------

    pub fn on_read_done(&mut self, checksum: &Checksum, result: StoreResult<Bytes>) {
        let Some(record) = self.records.get_mut(checksum) else {
            return;
        };
        record.read_in_flight = false;

        match result {
            Ok(data) => {
                if record.mime_type.is_none() {
                    record.mime_type = Some(mime::sniff(&data).to_string());
                    self.dirty |= record.is_referenced();
                }
                let content = match &record.content {
                    Some(content) => content.clone(),
                    None => {
                        self.resident_bytes += data.len() as u64;
                        record.content = Some(data.clone());
                        data
                    }
                };
                record.resolve_pending(FileContent::Stored(content));
            }
            Err(e) => {
                warn!(checksum = %checksum, error = %e, "failed to read blob");
                if e.is_content_gone() && !record.is_deleting {
                    match record.content.clone() {
                        Some(content) if !record.write_in_flight => {
                            record.write_in_flight = true;
                            self.outbox.push(DiskOp::Write(checksum.clone(), content));
                        }
                        Some(_) => {}
                        None => record.has_content_on_disk = false,
                    }
                }
                match record.content.clone() {
                    Some(content) => record.resolve_pending(FileContent::Stored(content)),
                    None => record.resolve_pending(FileContent::Missing),
                }
                if !record.is_referenced() && !record.has_content_on_disk {
                    self.drop_record(checksum);
                }
            }
        }
        self.enforce_budget();
    }

    pub fn on_write_done(&mut self, checksum: &Checksum, result: StoreResult<()>) {
        let Some(record) = self.records.get_mut(checksum) else {
            return;
        };
        record.write_in_flight = false;
        if let Err(e) = result {
            warn!(checksum = %checksum, error = %e, "failed to write blob");
            // A queued delete still runs and settles the flag itself.
            if !record.is_deleting {
                record.has_content_on_disk = false;
            }
        }
        self.enforce_budget();
    }

    pub fn on_delete_done(&mut self, checksum: &Checksum, result: StoreResult<()>) {
        let Some(record) = self.records.get_mut(checksum) else {
            return;
        };
        record.is_deleting = false;

        match result {
            Ok(()) => {
                record.has_content_on_disk = false;
                if !record.is_referenced() {
                    self.drop_record(checksum);
                    return;
                }
                // Re-referenced while the delete was in flight.
                match record.content.clone() {
                    Some(content) => {
                        record.has_content_on_disk = true;
                        record.write_in_flight = true;
                        record.resolve_pending(FileContent::Stored(content.clone()));
                        self.outbox.push(DiskOp::Write(checksum.clone(), content));
                        debug!(checksum = %checksum, "rewriting blob re-referenced during delete");
                    }
                    None => {
                        record.resolve_pending(FileContent::Missing);
                        debug!(checksum = %checksum, "blob re-referenced during delete awaits content");
                    }
                }
            }
            Err(e) => {
                warn!(checksum = %checksum, error = %e, "failed to delete blob; retrying at next load");
                if record.is_referenced() {
                    if !record.pending_reads.is_empty() && !record.read_in_flight {
                        record.read_in_flight = true;
                        self.outbox.push(DiskOp::Read(checksum.clone()));
                    }
                } else if !record.read_in_flight {
                    record.resolve_pending(FileContent::Unknown);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Eviction
    // -----------------------------------------------------------------------

    /// Drop resident bytes, least recently used first, until under budget.
    fn enforce_budget(&mut self) {
        while self.resident_bytes > self.max_resident_bytes {
            let victim = self
                .records
                .iter()
                .filter(|(_, record)| record.is_evictable())
                .min_by_key(|(_, record)| record.last_access)
                .map(|(checksum, _)| checksum.clone());
            let Some(victim) = victim else {
                break;
            };
            if let Some(content) = self.records.get_mut(&victim).and_then(|r| r.content.take()) {
                self.resident_bytes = self.resident_bytes.saturating_sub(content.len() as u64);
                debug!(checksum = %victim, "evicted resident content");
            }
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    // -----------------------------------------------------------------------
    // Outbox and persistence
    // -----------------------------------------------------------------------

    /// Disk operations queued since the last call, in issue order.
    pub fn take_ops(&mut self) -> Vec<DiskOp> {
        std::mem::take(&mut self.outbox)
    }

    /// Whether persisted state changed since the last call.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Persistable view of every referenced record.
    pub fn snapshot(&self) -> MetadataTable {
        let mut files: Vec<PersistedFile> = self
            .records
            .iter()
            .filter(|(_, record)| record.is_referenced())
            .map(|(checksum, record)| {
                let mut file = PersistedFile::new(checksum.clone());
                file.mime_type = record.mime_type.clone();
                for owner in &record.references {
                    file.push_owner(owner);
                }
                file
            })
            .collect();
        files.sort_by(|a, b| a.checksum.cmp(&b.checksum));
        MetadataTable::new(files)
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn record(&self, checksum: &Checksum) -> Option<&FileRecord> {
        self.records.get(checksum)
    }

    /// The checksum `owner` currently points at.
    pub fn target_of(&self, owner: &OwnerKey) -> Option<&Checksum> {
        self.owners.get(owner)
    }

    /// Whether any read, write or delete is still awaiting its completion.
    pub fn has_disk_work_in_flight(&self) -> bool {
        self.records
            .values()
            .any(|record| record.is_deleting || record.write_in_flight || record.read_in_flight)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of the sizes encoded in every referenced checksum.
    pub fn total_storage_size(&self) -> u64 {
        self.records
            .iter()
            .filter(|(_, record)| record.is_referenced())
            .map(|(checksum, _)| checksum.size())
            .sum()
    }

    pub fn stats(&self) -> StoreStats {
        let mut stats = StoreStats {
            records: self.records.len(),
            resident_bytes: self.resident_bytes,
            total_storage_size: self.total_storage_size(),
            ..StoreStats::default()
        };
        for record in self.records.values() {
            stats.referenced += usize::from(record.is_referenced());
            stats.local_references += record.count_of(OwnerKind::Local);
            stats.sync_references += record.count_of(OwnerKind::Sync);
            stats.pending_deletes += usize::from(record.is_deleting);
            stats.pending_reads += record.pending_reads.len();
        }
        stats
    }

    pub fn summaries(&self) -> Vec<FileSummary> {
        let mut rows: Vec<FileSummary> = self
            .records
            .iter()
            .map(|(checksum, record)| FileSummary {
                checksum: checksum.clone(),
                mime_type: record.mime_type.clone(),
                on_disk: record.has_content_on_disk,
                resident: record.content.is_some(),
                deleting: record.is_deleting,
                local_refs: record.count_of(OwnerKind::Local),
                sync_refs: record.count_of(OwnerKind::Sync),
            })
            .collect();
        rows.sort_by(|a, b| a.checksum.cmp(&b.checksum));
        rows
    }

    /// Check that the owner index and the per-record reference sets agree
    /// and that only deleting records are unreferenced.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        for (owner, checksum) in &self.owners {
            let record = self
                .records
                .get(checksum)
                .ok_or_else(|| format!("{owner} indexed to missing {checksum}"))?;
            if !record.references.contains(owner) {
                return Err(format!("{owner} indexed to {checksum} but not in its set"));
            }
        }
        for (checksum, record) in &self.records {
            for owner in &record.references {
                if self.owners.get(owner) != Some(checksum) {
                    return Err(format!("{owner} in set of {checksum} but indexed elsewhere"));
                }
            }
            if !record.is_referenced() && !record.is_deleting {
                return Err(format!("{checksum} unreferenced without a pending delete"));
            }
        }
        let resident: u64 = self.records.values().map(FileRecord::resident_len).sum();
        if resident != self.resident_bytes {
            return Err(format!("resident bytes {} != tracked {}", resident, self.resident_bytes));
        }
        Ok(())
    }
}
