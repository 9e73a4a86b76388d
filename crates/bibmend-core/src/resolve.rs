//! Stage 2: resolve each entry to a registry identifier.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::registry::MetadataRegistry;
use crate::store::Store;
use crate::{PipelineConfig, QueryStatus, pool};

/// Build the free-text query for an entry: the configured fields, in order,
/// space-joined (missing fields contribute an empty string).
pub fn build_query(entry: &bibmend_bib::BibEntry, fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| entry.get(f).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve identifiers for every record that does not already have one.
///
/// Entries declaring a `crossref_doi` field are adopted directly when the
/// configuration trusts them (the manual escape hatch for records the
/// registry cannot match); everything else without a cached `ok` status goes
/// through a bounded-concurrency free-text search. The batch blocks until
/// every query resolves, then results are folded into the store.
pub async fn resolve_identifiers(
    store: &mut Store,
    registry: &Arc<dyn MetadataRegistry>,
    client: &reqwest::Client,
    config: &PipelineConfig,
) {
    let mut batch: Vec<(String, String)> = Vec::new();

    for record in store.iter_mut() {
        if config.trust_input_doi
            && let Some(doi) = record.input.get("crossref_doi")
        {
            debug!(key = %record.input.key, %doi, "using declared identifier");
            record.doi_query_status = Some(QueryStatus::Ok);
            record.doi = Some(doi.to_string());
            continue;
        }
        if record.doi_query_status == Some(QueryStatus::Ok) {
            debug!(key = %record.input.key, "identifier cached");
            continue;
        }
        let query = build_query(&record.input, &config.query_fields);
        batch.push((record.input.key.clone(), query));
    }

    if batch.is_empty() {
        return;
    }
    info!(queries = batch.len(), "searching the registry");

    let results = {
        let registry = Arc::clone(registry);
        let client = client.clone();
        pool::run_batch(batch, config.parallel_requests, move |query: String| {
            let registry = Arc::clone(&registry);
            let client = client.clone();
            async move { registry.resolve(&query, &client).await }
        })
        .await
    };

    for (key, result) in results {
        let Some(record) = store.get_mut(&key) else {
            continue;
        };
        match result {
            Ok(Some(doi)) => {
                debug!(key = %key, %doi, "identifier resolved");
                record.doi_query_status = Some(QueryStatus::Ok);
                record.doi = Some(doi);
            }
            Ok(None) => {
                warn!(key = %key, "registry returned no candidate");
                record.doi_query_status = Some(QueryStatus::Bad);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "registry query failed");
                record.doi_query_status = Some(QueryStatus::Bad);
            }
        }
    }
}
