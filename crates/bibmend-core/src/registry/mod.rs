//! Clients for the external lookup services: the scholarly-metadata
//! registry (Crossref) and the open-access location index (Unpaywall),
//! behind traits so the pipeline can run against mocks.

pub mod crossref;
pub mod mock;
pub mod unpaywall;

use std::future::Future;
use std::pin::Pin;

use bibmend_bib::BibEntry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("HTTP request error: {0}")]
    Http(String),
    #[error("unexpected response: {0}")]
    BadResponse(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Http(e.to_string())
    }
}

/// A structured work record fetched from the metadata registry.
#[derive(Debug, Clone)]
pub struct RegistryWork {
    /// Candidate bibliography entry built from the registry response.
    pub entry: BibEntry,
    /// Citation key the registry side would have used.
    pub raw_key: String,
    /// Raw response message; author names are re-derived from it at merge
    /// time.
    pub raw: serde_json::Value,
}

/// Scholarly-metadata registry: free-text search and identifier lookup.
pub trait MetadataRegistry: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve a free-text bibliographic query to the top-ranked work
    /// identifier, `None` when the registry has no candidate.
    fn resolve<'a>(
        &'a self,
        query: &'a str,
        client: &'a reqwest::Client,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, ClientError>> + Send + 'a>>;

    /// Fetch the structured record for an identifier.
    fn fetch<'a>(
        &'a self,
        doi: &'a str,
        client: &'a reqwest::Client,
    ) -> Pin<Box<dyn Future<Output = Result<RegistryWork, ClientError>> + Send + 'a>>;
}

/// Best known open-access location for a work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OaLocation {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub url_for_pdf: Option<String>,
    #[serde(default)]
    pub url_for_landing_page: Option<String>,
    #[serde(default)]
    pub host_type: Option<String>,
    #[serde(default)]
    pub repository_institution: Option<String>,
}

/// A hit in the open-access index.
#[derive(Debug, Clone)]
pub struct OaResponse {
    pub best_oa_location: Option<OaLocation>,
    pub raw: serde_json::Value,
}

/// Open-access location index, queried by work identifier.
pub trait OpenAccessIndex: Send + Sync {
    fn name(&self) -> &str;

    /// Look up an identifier; `None` when the index does not know it.
    fn lookup<'a>(
        &'a self,
        doi: &'a str,
        client: &'a reqwest::Client,
    ) -> Pin<Box<dyn Future<Output = Result<Option<OaResponse>, ClientError>> + Send + 'a>>;
}
