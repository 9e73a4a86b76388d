//! Stage 3: fetch the structured registry record for each resolved DOI.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::registry::MetadataRegistry;
use crate::store::Store;
use crate::{FetchStatus, PipelineConfig, pool};

/// Fetch candidate records for every resolved entry without a cached `ok`
/// fetch. One failed fetch never aborts its siblings: each call lands as a
/// per-entry status.
pub async fn fetch_records(
    store: &mut Store,
    registry: &Arc<dyn MetadataRegistry>,
    client: &reqwest::Client,
    config: &PipelineConfig,
) {
    let mut batch: Vec<(String, String)> = Vec::new();

    for record in store.iter() {
        if record.fetch_status == Some(FetchStatus::Ok) {
            debug!(key = %record.input.key, "candidate record cached");
            continue;
        }
        if let Some(doi) = &record.doi {
            batch.push((record.input.key.clone(), doi.clone()));
        }
    }

    if batch.is_empty() {
        return;
    }
    info!(fetches = batch.len(), "fetching registry records");

    let results = {
        let registry = Arc::clone(registry);
        let client = client.clone();
        pool::run_batch(batch, config.parallel_requests, move |doi: String| {
            let registry = Arc::clone(&registry);
            let client = client.clone();
            async move { registry.fetch(&doi, &client).await }
        })
        .await
    };

    for (key, result) in results {
        let Some(record) = store.get_mut(&key) else {
            continue;
        };
        match result {
            Ok(work) => {
                debug!(key = %key, raw_key = %work.raw_key, "candidate record fetched");
                record.fetch_status = Some(FetchStatus::Ok);
                record.candidate = Some(work.entry);
                record.candidate_raw_key = Some(work.raw_key);
                record.candidate_json = Some(work.raw);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "record fetch failed");
                record.fetch_status = Some(FetchStatus::Failed);
            }
        }
    }
}
