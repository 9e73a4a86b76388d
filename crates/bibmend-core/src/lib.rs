use std::fmt;

use bibmend_bib::BibEntry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod dedup;
pub mod fetch;
pub mod loader;
pub mod merge;
pub mod openaccess;
pub mod pipeline;
pub mod pool;
pub mod registry;
pub mod report;
pub mod resolve;
pub mod store;
pub mod validate;

// Re-export for convenience
pub use pipeline::Pipeline;
pub use registry::{MetadataRegistry, OpenAccessIndex};
pub use store::{EntryRecord, Store};

/// Outcome of the free-text identifier search for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryStatus {
    Ok,
    Bad,
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStatus::Ok => write!(f, "ok"),
            QueryStatus::Bad => write!(f, "bad"),
        }
    }
}

/// Outcome of the structured record fetch for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchStatus {
    Ok,
    Failed,
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchStatus::Ok => write!(f, "ok"),
            FetchStatus::Failed => write!(f, "!ok"),
        }
    }
}

/// Validation verdict for a fetched candidate record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Valid,
    Invalid,
    Skipped,
    Failed,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Valid => write!(f, "valid"),
            Verdict::Invalid => write!(f, "!valid"),
            Verdict::Skipped => write!(f, "skipped"),
            Verdict::Failed => write!(f, "failed"),
        }
    }
}

/// Ordered status tokens accumulated by the open-access lookup: the DOI
/// lookup outcome first, then the URL extraction outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OaStatus {
    DoiFound,
    DoiNotFound,
    DoiFailed,
    UrlFound,
    UrlNotFound,
}

impl fmt::Display for OaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OaStatus::DoiFound => write!(f, "doi found"),
            OaStatus::DoiNotFound => write!(f, "doi not found"),
            OaStatus::DoiFailed => write!(f, "doi failed"),
            OaStatus::UrlFound => write!(f, "oai url found"),
            OaStatus::UrlNotFound => write!(f, "oai url not found"),
        }
    }
}

/// Where the chosen open-access copy lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OaProvenance {
    #[default]
    None,
    Arxiv,
    Hal,
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization error: {0}")]
    Cache(#[from] serde_json::Error),
    #[error(
        "entry `{0}` already declares an addendum field; remove it from the input file or protect the registry fields with a keep-entry override"
    )]
    AddendumConflict(String),
    #[error("run aborted during review of entry `{0}`")]
    Aborted(String),
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on concurrent registry requests (identifier resolution
    /// and record fetch stages).
    pub parallel_requests: usize,
    /// Process only the first N input entries.
    pub max_entries: usize,
    /// Entry fields concatenated into the free-text registry query.
    pub query_fields: Vec<String>,
    /// Adopt a `crossref_doi` field declared in the input without querying.
    pub trust_input_doi: bool,
    /// Entry keys whose validation is skipped (never merged).
    pub skip_double_check: Vec<String>,
    /// Entry keys whose candidate record is accepted regardless of checks.
    pub forced_valid: Vec<String>,
    /// `(entry key, field name)` pairs protected from the registry merge.
    pub keep_fields: Vec<(String, String)>,
    /// Embed the full Unpaywall response in the output entry.
    pub output_oa_data: bool,
    /// Contact address for the Crossref polite pool and the Unpaywall
    /// `email` parameter.
    pub mailto: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallel_requests: 5,
            max_entries: 100_000,
            query_fields: vec!["author".into(), "year".into(), "title".into()],
            trust_input_doi: true,
            skip_double_check: vec![],
            forced_valid: vec![],
            keep_fields: vec![],
            output_oa_data: false,
            mailto: None,
        }
    }
}

/// A failed validation surfaced for operator review.
#[derive(Debug, Clone)]
pub struct ReviewEvent {
    pub key: String,
    pub detail: String,
    pub input: BibEntry,
    pub candidate: BibEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Proceed,
    Abort,
}

/// Receives failed-validation events. The default implementation proceeds
/// unconditionally so headless runs never stall; an interactive front end
/// can prompt instead, and may abort the run.
pub trait ReviewHandler: Send + Sync {
    fn on_failed_check(&self, event: &ReviewEvent) -> ReviewDecision;
}

/// [`ReviewHandler`] that waves every mismatch through.
pub struct AcceptAll;

impl ReviewHandler for AcceptAll {
    fn on_failed_check(&self, _event: &ReviewEvent) -> ReviewDecision {
        ReviewDecision::Proceed
    }
}

/// Summary statistics for a complete run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub input_entries: usize,
    pub output_entries: usize,
    pub duplicates: usize,
    pub valid: usize,
    pub invalid: usize,
    pub skipped: usize,
    pub failed: usize,
    /// `output + duplicates == input` held after merge.
    pub counts_consistent: bool,
    pub review_queue: Vec<ReviewEvent>,
}
