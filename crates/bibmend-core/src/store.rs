//! The persistent reconciliation store.
//!
//! One [`EntryRecord`] per citation key, in input order. The store is the
//! only shared mutable state in the pipeline: stages fold worker results
//! into it sequentially after each batch joins, and it is checkpointed to a
//! JSON file after the three network-bound stages. A record's cached
//! sub-results are only trusted while its `input` snapshot equals the
//! freshly parsed entry; the loader resets anything that drifted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bibmend_bib::BibEntry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{CoreError, FetchStatus, OaProvenance, OaStatus, QueryStatus, Verdict};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryRecord {
    /// The entry as last parsed; change-detection anchor.
    pub input: BibEntry,
    #[serde(default)]
    pub doi_query_status: Option<QueryStatus>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub fetch_status: Option<FetchStatus>,
    /// Candidate record built from the registry response, key remapped to
    /// the input key before validation.
    #[serde(default)]
    pub candidate: Option<BibEntry>,
    /// Registry-side citation key before the remap.
    #[serde(default)]
    pub candidate_raw_key: Option<String>,
    /// Raw registry message; the merge stage reparses its author list.
    #[serde(default)]
    pub candidate_json: Option<serde_json::Value>,
    #[serde(default)]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub check_detail: Option<String>,
    #[serde(default)]
    pub duplicate: bool,
    #[serde(default)]
    pub oa_status: Vec<OaStatus>,
    #[serde(default)]
    pub oa_message: Option<String>,
    #[serde(default)]
    pub oa_url: Option<String>,
    #[serde(default)]
    pub oa_provenance: OaProvenance,
    #[serde(default)]
    pub oa_landing_url: Option<String>,
    /// Pretty-printed Unpaywall response, kept only when embedding is on.
    #[serde(default)]
    pub oa_data: Option<String>,
    #[serde(default)]
    pub output: Option<BibEntry>,
    /// Human-readable merge actions: identifier tag, open-access tag.
    #[serde(default)]
    pub actions: [String; 2],
}

impl EntryRecord {
    pub fn new(input: BibEntry) -> Self {
        Self {
            input,
            ..Default::default()
        }
    }

    pub fn key(&self) -> &str {
        &self.input.key
    }
}

/// Insertion-ordered collection of records, optionally backed by a JSON
/// file. Iteration order matches the current input file; the deduplicator's
/// "first entry wins" and the output order both lean on it.
#[derive(Debug, Default)]
pub struct Store {
    records: Vec<EntryRecord>,
    index: HashMap<String, usize>,
    path: Option<PathBuf>,
}

impl Store {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open the store backing file, starting fresh (with a warning) when it
    /// is missing or unreadable.
    pub fn load_or_new(path: &Path) -> Self {
        let mut store = Self {
            path: Some(path.to_path_buf()),
            ..Default::default()
        };
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Vec<EntryRecord>>(&content) {
                Ok(records) => {
                    info!(path = %path.display(), entries = records.len(), "loaded reconciliation cache");
                    for record in records {
                        store.push(record);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable cache, starting fresh");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read cache, starting fresh");
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&EntryRecord> {
        self.index.get(key).map(|&i| &self.records[i])
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut EntryRecord> {
        let i = *self.index.get(key)?;
        Some(&mut self.records[i])
    }

    /// Append or replace the record with the same key (replacement keeps the
    /// original position).
    pub fn push(&mut self, record: EntryRecord) {
        let key = record.input.key.clone();
        match self.index.get(&key) {
            Some(&i) => self.records[i] = record,
            None => {
                self.index.insert(key, self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Replace the whole record sequence, preserving the given order.
    pub fn replace_all(&mut self, records: Vec<EntryRecord>) {
        self.records.clear();
        self.index.clear();
        for record in records {
            self.push(record);
        }
    }

    pub fn take_records(&mut self) -> Vec<EntryRecord> {
        self.index.clear();
        std::mem::take(&mut self.records)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntryRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EntryRecord> {
        self.records.iter_mut()
    }

    /// Keys in store order; stages snapshot this before mutating records.
    pub fn keys(&self) -> Vec<String> {
        self.records.iter().map(|r| r.input.key.clone()).collect()
    }

    /// Write the store to its backing file, if any.
    pub fn checkpoint(&self) -> Result<(), CoreError> {
        if let Some(path) = &self.path {
            let json = serde_json::to_string_pretty(&self.records)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }
}
