use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use sfs_types::{DomainTag, OwnerKey, OwnerKind};
use tokio::sync::oneshot;

use crate::content::FileContent;

/// Per-checksum state held by the file table.
///
/// A record lives in the table while anyone references it, and also while
/// a physical delete of its content is still in flight.
#[derive(Debug, Default)]
pub struct FileRecord {
    /// Resident bytes, present after a write or a completed read until
    /// evicted.
    pub content: Option<Bytes>,
    pub mime_type: Option<String>,
    /// A file exists (or is queued to exist) at the blob path.
    pub has_content_on_disk: bool,
    /// A physical delete has been issued and not yet confirmed.
    pub is_deleting: bool,
    pub write_in_flight: bool,
    pub read_in_flight: bool,
    /// Authoritative reference set; the owner index mirrors it.
    pub references: BTreeSet<OwnerKey>,
    pub pending_reads: Vec<oneshot::Sender<FileContent>>,
    /// Logical time of the last access, for eviction order.
    pub last_access: u64,
}

impl FileRecord {
    pub fn is_referenced(&self) -> bool {
        !self.references.is_empty()
    }

    pub fn resident_len(&self) -> u64 {
        self.content.as_ref().map_or(0, |c| c.len() as u64)
    }

    /// Resident bytes can be dropped without losing data or stranding a
    /// waiter.
    pub fn is_evictable(&self) -> bool {
        self.content.is_some()
            && self.has_content_on_disk
            && !self.write_in_flight
            && !self.is_deleting
            && self.pending_reads.is_empty()
    }

    /// Owner ids grouped by domain, for one owner kind.
    pub fn references_of(&self, kind: OwnerKind) -> BTreeMap<DomainTag, BTreeSet<String>> {
        let mut grouped: BTreeMap<DomainTag, BTreeSet<String>> = BTreeMap::new();
        for owner in self.references.iter().filter(|o| o.kind == kind) {
            grouped
                .entry(owner.domain.clone())
                .or_default()
                .insert(owner.id.clone());
        }
        grouped
    }

    pub fn local_references(&self) -> BTreeMap<DomainTag, BTreeSet<String>> {
        self.references_of(OwnerKind::Local)
    }

    pub fn sync_references(&self) -> BTreeMap<DomainTag, BTreeSet<String>> {
        self.references_of(OwnerKind::Sync)
    }

    pub fn count_of(&self, kind: OwnerKind) -> usize {
        self.references.iter().filter(|o| o.kind == kind).count()
    }

    /// Hand `content` to every queued reader.
    pub fn resolve_pending(&mut self, content: FileContent) {
        for reply in self.pending_reads.drain(..) {
            // The reader may have given up waiting.
            let _ = reply.send(content.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn domain(tag: &str) -> DomainTag {
        DomainTag::new(tag).unwrap()
    }

    #[test]
    fn references_grouped_by_kind_and_domain() {
        let mut record = FileRecord::default();
        record.references.insert(OwnerKey::local(domain("thumbnail"), "a"));
        record.references.insert(OwnerKey::local(domain("thumbnail"), "b"));
        record.references.insert(OwnerKey::local(domain("favicon"), "a"));
        record.references.insert(OwnerKey::sync(domain("thumbnail"), "s1"));

        let local = record.local_references();
        assert_eq!(local.len(), 2);
        assert_eq!(local[&domain("thumbnail")].len(), 2);
        let sync = record.sync_references();
        assert_eq!(sync[&domain("thumbnail")].iter().next().unwrap(), "s1");
        assert_eq!(record.count_of(OwnerKind::Local), 3);
        assert_eq!(record.count_of(OwnerKind::Sync), 1);
    }

    #[test]
    fn evictable_only_when_safely_on_disk() {
        let mut record = FileRecord::default();
        record.content = Some(Bytes::from_static(b"data"));
        assert!(!record.is_evictable());

        record.has_content_on_disk = true;
        assert!(record.is_evictable());

        record.write_in_flight = true;
        assert!(!record.is_evictable());
        record.write_in_flight = false;

        record.is_deleting = true;
        assert!(!record.is_evictable());
    }

    #[test]
    fn resolve_pending_answers_all_readers() {
        let mut record = FileRecord::default();
        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        record.pending_reads.push(tx1);
        record.pending_reads.push(tx2);
        drop(rx2);

        record.resolve_pending(FileContent::Missing);
        assert!(record.pending_reads.is_empty());
        assert_eq!(rx1.try_recv().unwrap(), FileContent::Missing);
    }
}
