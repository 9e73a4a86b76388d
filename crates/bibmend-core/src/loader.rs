//! Stage 1: merge the freshly parsed bibliography into the persisted store.

use bibmend_bib::BibEntry;
use tracing::{debug, info};

use crate::store::{EntryRecord, Store};

/// Synchronize the store with the current input file.
///
/// Records whose key vanished from the input are dropped; entries whose
/// fields changed since the last run get a fresh record (all cached
/// sub-results discarded); unchanged entries keep their record. The store is
/// rebuilt in input order, which later stages rely on.
pub fn sync_store(entries: &[BibEntry], store: &mut Store, max_entries: usize) {
    let entries = &entries[..entries.len().min(max_entries)];

    let mut old: Vec<EntryRecord> = store.take_records();
    let mut next: Vec<EntryRecord> = Vec::with_capacity(entries.len());

    for entry in entries {
        let previous = old
            .iter()
            .position(|r| r.input.key == entry.key)
            .map(|i| old.swap_remove(i));
        match previous {
            Some(record) if record.input == *entry => {
                debug!(key = %entry.key, "entry unchanged, cached results kept");
                next.push(record);
            }
            Some(_) => {
                info!(key = %entry.key, "entry changed, cached results invalidated");
                next.push(EntryRecord::new(entry.clone()));
            }
            None => {
                debug!(key = %entry.key, "new entry");
                next.push(EntryRecord::new(entry.clone()));
            }
        }
    }

    for stale in &old {
        info!(key = %stale.input.key, "cached entry no longer in the input file, dropped");
    }

    store.replace_all(next);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{QueryStatus, Verdict};

    fn entry(key: &str, title: &str) -> BibEntry {
        let mut e = BibEntry::new(key, "article");
        e.set("title", title);
        e
    }

    fn resolved_record(key: &str, title: &str) -> EntryRecord {
        let mut r = EntryRecord::new(entry(key, title));
        r.doi_query_status = Some(QueryStatus::Ok);
        r.doi = Some(format!("10.1/{key}"));
        r.verdict = Some(Verdict::Valid);
        r
    }

    #[test]
    fn unchanged_entry_keeps_cache() {
        let mut store = Store::in_memory();
        store.push(resolved_record("a", "T"));
        sync_store(&[entry("a", "T")], &mut store, usize::MAX);
        assert_eq!(store.get("a").unwrap().doi.as_deref(), Some("10.1/a"));
    }

    #[test]
    fn changed_entry_is_reset() {
        let mut store = Store::in_memory();
        store.push(resolved_record("a", "T"));
        sync_store(&[entry("a", "T, corrected")], &mut store, usize::MAX);
        let r = store.get("a").unwrap();
        assert_eq!(r.doi, None);
        assert_eq!(r.doi_query_status, None);
        assert_eq!(r.verdict, None);
        assert_eq!(r.input.get("title"), Some("T, corrected"));
    }

    #[test]
    fn change_invalidates_exactly_one_entry() {
        let mut store = Store::in_memory();
        store.push(resolved_record("a", "TA"));
        store.push(resolved_record("b", "TB"));
        sync_store(&[entry("a", "TA"), entry("b", "TB, edited")], &mut store, usize::MAX);
        assert_eq!(store.get("a").unwrap().doi.as_deref(), Some("10.1/a"));
        assert_eq!(store.get("b").unwrap().doi, None);
    }

    #[test]
    fn vanished_entry_is_dropped_and_order_follows_input() {
        let mut store = Store::in_memory();
        store.push(resolved_record("a", "TA"));
        store.push(resolved_record("b", "TB"));
        sync_store(&[entry("b", "TB"), entry("c", "TC")], &mut store, usize::MAX);
        assert_eq!(store.keys(), vec!["b", "c"]);
        assert!(store.get("a").is_none());
    }

    #[test]
    fn max_entries_truncates() {
        let mut store = Store::in_memory();
        sync_store(
            &[entry("a", "TA"), entry("b", "TB"), entry("c", "TC")],
            &mut store,
            2,
        );
        assert_eq!(store.keys(), vec!["a", "b"]);
    }
}
