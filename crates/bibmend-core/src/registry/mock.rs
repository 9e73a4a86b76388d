//! Mock registry and index backends for testing.
//!
//! Responses are scripted per query/identifier and every call is counted,
//! so cache tests can assert that an unchanged rerun issues no new calls.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use bibmend_bib::BibEntry;
use serde_json::json;

use super::{
    ClientError, MetadataRegistry, OaLocation, OaResponse, OpenAccessIndex, RegistryWork,
};

#[derive(Default)]
pub struct MockRegistry {
    /// Free-text query -> resolved DOI (`None` = registry has no candidate).
    resolve_map: HashMap<String, Option<String>>,
    /// DOI -> structured work.
    works: HashMap<String, RegistryWork>,
    /// Queries that fail with a transport error.
    failing_queries: HashSet<String>,
    /// DOIs whose fetch fails with a transport error.
    failing_dois: HashSet<String>,
    resolve_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolution(mut self, query: impl Into<String>, doi: impl Into<String>) -> Self {
        self.resolve_map.insert(query.into(), Some(doi.into()));
        self
    }

    pub fn with_work(mut self, doi: impl Into<String>, work: RegistryWork) -> Self {
        self.works.insert(doi.into(), work);
        self
    }

    pub fn with_failing_query(mut self, query: impl Into<String>) -> Self {
        self.failing_queries.insert(query.into());
        self
    }

    pub fn with_failing_doi(mut self, doi: impl Into<String>) -> Self {
        self.failing_dois.insert(doi.into());
        self
    }

    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

impl MetadataRegistry for MockRegistry {
    fn name(&self) -> &str {
        "MockRegistry"
    }

    fn resolve<'a>(
        &'a self,
        query: &'a str,
        _client: &'a reqwest::Client,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, ClientError>> + Send + 'a>> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.failing_queries.contains(query) {
            Err(ClientError::Http("connection refused".into()))
        } else {
            Ok(self.resolve_map.get(query).cloned().flatten())
        };
        Box::pin(async move { result })
    }

    fn fetch<'a>(
        &'a self,
        doi: &'a str,
        _client: &'a reqwest::Client,
    ) -> Pin<Box<dyn Future<Output = Result<RegistryWork, ClientError>> + Send + 'a>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.failing_dois.contains(doi) {
            Err(ClientError::Http("connection refused".into()))
        } else {
            match self.works.get(doi) {
                Some(work) => Ok(work.clone()),
                None => Err(ClientError::BadResponse("HTTP 404".into())),
            }
        };
        Box::pin(async move { result })
    }
}

/// Build a [`RegistryWork`] for tests: a candidate entry plus a raw message
/// carrying the structured author list the merge stage reads.
pub fn scripted_work(entry: BibEntry, authors: &[(&str, Option<&str>)]) -> RegistryWork {
    let raw_authors: Vec<serde_json::Value> = authors
        .iter()
        .map(|(family, given)| match given {
            Some(given) => json!({"family": family, "given": given}),
            None => json!({"family": family}),
        })
        .collect();
    let raw = json!({
        "DOI": entry.get("doi").unwrap_or_default(),
        "author": raw_authors,
    });
    RegistryWork {
        raw_key: entry.key.clone(),
        entry,
        raw,
    }
}

#[derive(Default)]
pub struct MockIndex {
    /// DOI -> response (`None` = not in the index).
    responses: HashMap<String, Option<OaResponse>>,
    failing_dois: HashSet<String>,
    lookup_calls: AtomicUsize,
}

impl MockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_location(mut self, doi: impl Into<String>, location: OaLocation) -> Self {
        let raw = serde_json::to_value(&location).unwrap_or_default();
        self.responses.insert(
            doi.into(),
            Some(OaResponse {
                best_oa_location: Some(location),
                raw: json!({"best_oa_location": raw}),
            }),
        );
        self
    }

    pub fn with_missing(mut self, doi: impl Into<String>) -> Self {
        self.responses.insert(doi.into(), None);
        self
    }

    pub fn with_failing_doi(mut self, doi: impl Into<String>) -> Self {
        self.failing_dois.insert(doi.into());
        self
    }

    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }
}

impl OpenAccessIndex for MockIndex {
    fn name(&self) -> &str {
        "MockIndex"
    }

    fn lookup<'a>(
        &'a self,
        doi: &'a str,
        _client: &'a reqwest::Client,
    ) -> Pin<Box<dyn Future<Output = Result<Option<OaResponse>, ClientError>> + Send + 'a>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.failing_dois.contains(doi) {
            Err(ClientError::Http("connection refused".into()))
        } else {
            match self.responses.get(doi) {
                Some(Some(resp)) => Ok(Some(OaResponse {
                    best_oa_location: resp.best_oa_location.clone(),
                    raw: resp.raw.clone(),
                })),
                _ => Ok(None),
            }
        };
        Box::pin(async move { result })
    }
}
