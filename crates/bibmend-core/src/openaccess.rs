//! Stage 6: locate an open-access copy for each surviving entry.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::registry::{OaLocation, OpenAccessIndex};
use crate::store::Store;
use crate::{OaProvenance, OaStatus, PipelineConfig, Verdict, pool};

/// Pick the best URL from a location: full-text PDF first, then the generic
/// best link, then the landing page. Percent-escapes are decoded so the URL
/// can be embedded in LaTeX-facing fields.
fn extract_oa_url(location: &OaLocation) -> Option<String> {
    [
        location.url_for_pdf.as_deref(),
        location.url.as_deref(),
        location.url_for_landing_page.as_deref(),
    ]
    .into_iter()
    .flatten()
    .next()
    .map(|url| {
        urlencoding::decode(url)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| url.to_string())
    })
}

/// Classify where the copy lives. Only repository-hosted copies at the two
/// recognized archives get a dedicated provenance (and keep their landing
/// page for the citation tag).
fn classify(location: &OaLocation) -> (OaProvenance, Option<String>) {
    if location.host_type.as_deref() == Some("repository")
        && let Some(institution) = &location.repository_institution
    {
        if institution.contains("arXiv") {
            return (OaProvenance::Arxiv, location.url_for_landing_page.clone());
        }
        if institution.contains("HAL") {
            return (OaProvenance::Hal, location.url_for_landing_page.clone());
        }
    }
    (OaProvenance::None, None)
}

/// Query the open-access index for every valid, non-duplicate record.
///
/// The whole batch runs concurrently (width = batch size); results with a
/// definitive outcome are cached across runs, lookup failures are retried on
/// the next invocation.
pub async fn locate_open_access(
    store: &mut Store,
    index: &Arc<dyn OpenAccessIndex>,
    client: &reqwest::Client,
    config: &PipelineConfig,
) {
    let mut batch: Vec<(String, String)> = Vec::new();

    for record in store.iter() {
        if record.verdict != Some(Verdict::Valid) || record.duplicate {
            continue;
        }
        if matches!(
            record.oa_status.first(),
            Some(OaStatus::DoiFound) | Some(OaStatus::DoiNotFound)
        ) {
            debug!(key = %record.input.key, "open-access result cached");
            continue;
        }
        if let Some(doi) = &record.doi {
            batch.push((record.input.key.clone(), doi.clone()));
        }
    }

    if batch.is_empty() {
        return;
    }
    info!(lookups = batch.len(), "querying the open-access index");

    let width = batch.len();
    let results = {
        let index = Arc::clone(index);
        let client = client.clone();
        pool::run_batch(batch, width, move |doi: String| {
            let index = Arc::clone(&index);
            let client = client.clone();
            async move { index.lookup(&doi, &client).await }
        })
        .await
    };

    for (key, result) in results {
        let Some(record) = store.get_mut(&key) else {
            continue;
        };
        record.oa_status.clear();
        record.oa_message = None;
        record.oa_url = None;
        record.oa_provenance = OaProvenance::None;
        record.oa_landing_url = None;
        record.oa_data = None;

        match result {
            Err(e) => {
                warn!(key = %key, error = %e, "open-access lookup failed");
                record.oa_status.push(OaStatus::DoiFailed);
                record.oa_message = Some(format!("open-access lookup failed: {e}"));
            }
            Ok(None) => {
                record.oa_status.push(OaStatus::DoiNotFound);
                record.oa_message = Some("identifier not known to the open-access index".into());
            }
            Ok(Some(response)) => {
                record.oa_status.push(OaStatus::DoiFound);
                record.oa_message = Some("open-access index returned a record".into());
                if config.output_oa_data {
                    record.oa_data = serde_json::to_string_pretty(&response.raw).ok();
                }
                match response.best_oa_location.as_ref().and_then(|loc| {
                    extract_oa_url(loc).map(|url| (url, classify(loc)))
                }) {
                    Some((url, (provenance, landing))) => {
                        debug!(key = %key, %url, "open-access url found");
                        record.oa_status.push(OaStatus::UrlFound);
                        record.oa_url = Some(url);
                        record.oa_provenance = provenance;
                        record.oa_landing_url = landing;
                    }
                    None => {
                        record.oa_status.push(OaStatus::UrlNotFound);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::mock::MockIndex;
    use crate::store::EntryRecord;
    use bibmend_bib::BibEntry;

    fn valid_record(key: &str, doi: &str) -> EntryRecord {
        let mut r = EntryRecord::new(BibEntry::new(key, "article"));
        r.doi = Some(doi.into());
        r.verdict = Some(Verdict::Valid);
        r
    }

    fn location(pdf: Option<&str>, url: Option<&str>, landing: Option<&str>) -> OaLocation {
        OaLocation {
            url_for_pdf: pdf.map(String::from),
            url: url.map(String::from),
            url_for_landing_page: landing.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn pdf_link_wins() {
        let loc = location(Some("https://x/pdf"), Some("https://x/best"), Some("https://x/land"));
        assert_eq!(extract_oa_url(&loc).as_deref(), Some("https://x/pdf"));
    }

    #[test]
    fn falls_through_to_best_then_landing() {
        let loc = location(None, Some("https://x/best"), Some("https://x/land"));
        assert_eq!(extract_oa_url(&loc).as_deref(), Some("https://x/best"));
        let loc = location(None, None, Some("https://x/land"));
        assert_eq!(extract_oa_url(&loc).as_deref(), Some("https://x/land"));
        assert_eq!(extract_oa_url(&location(None, None, None)), None);
    }

    #[test]
    fn percent_escapes_are_decoded() {
        let loc = location(Some("https://hal.science/file%20name.pdf"), None, None);
        assert_eq!(
            extract_oa_url(&loc).as_deref(),
            Some("https://hal.science/file name.pdf")
        );
    }

    #[test]
    fn classifies_recognized_repositories() {
        let mut loc = location(None, None, Some("https://arxiv.org/abs/2001.1"));
        loc.host_type = Some("repository".into());
        loc.repository_institution = Some("Cornell University - arXiv".into());
        assert_eq!(
            classify(&loc),
            (OaProvenance::Arxiv, Some("https://arxiv.org/abs/2001.1".into()))
        );

        loc.repository_institution = Some("HAL open science".into());
        assert_eq!(
            classify(&loc),
            (OaProvenance::Hal, Some("https://arxiv.org/abs/2001.1".into()))
        );

        // Publisher-hosted copies stay generic, whatever the name says.
        loc.host_type = Some("publisher".into());
        assert_eq!(classify(&loc), (OaProvenance::None, None));
    }

    #[tokio::test]
    async fn lookup_outcomes_land_in_the_store() {
        let mut store = Store::in_memory();
        store.push(valid_record("found", "10.1/found"));
        store.push(valid_record("missing", "10.1/missing"));
        store.push(valid_record("failing", "10.1/failing"));
        let mut invalid = valid_record("invalid", "10.1/other");
        invalid.verdict = Some(Verdict::Invalid);
        store.push(invalid);

        let mut loc = location(Some("https://x/pdf"), None, Some("https://x/land"));
        loc.host_type = Some("repository".into());
        loc.repository_institution = Some("arXiv".into());
        let index: Arc<dyn OpenAccessIndex> = Arc::new(
            MockIndex::new()
                .with_location("10.1/found", loc)
                .with_missing("10.1/missing")
                .with_failing_doi("10.1/failing"),
        );
        let client = reqwest::Client::new();
        let config = PipelineConfig::default();

        locate_open_access(&mut store, &index, &client, &config).await;

        let found = store.get("found").unwrap();
        assert_eq!(found.oa_status, vec![OaStatus::DoiFound, OaStatus::UrlFound]);
        assert_eq!(found.oa_url.as_deref(), Some("https://x/pdf"));
        assert_eq!(found.oa_provenance, OaProvenance::Arxiv);
        assert_eq!(found.oa_landing_url.as_deref(), Some("https://x/land"));

        assert_eq!(
            store.get("missing").unwrap().oa_status,
            vec![OaStatus::DoiNotFound]
        );
        assert_eq!(
            store.get("failing").unwrap().oa_status,
            vec![OaStatus::DoiFailed]
        );
        assert!(store.get("invalid").unwrap().oa_status.is_empty());
    }

    #[tokio::test]
    async fn cached_results_are_not_requeried_but_failures_are() {
        let mut store = Store::in_memory();
        let mut cached = valid_record("cached", "10.1/cached");
        cached.oa_status = vec![OaStatus::DoiFound, OaStatus::UrlNotFound];
        store.push(cached);
        let mut failed = valid_record("failed", "10.1/failed");
        failed.oa_status = vec![OaStatus::DoiFailed];
        store.push(failed);

        let index_impl = Arc::new(MockIndex::new().with_missing("10.1/failed"));
        let index: Arc<dyn OpenAccessIndex> = index_impl.clone();
        let client = reqwest::Client::new();
        locate_open_access(&mut store, &index, &client, &PipelineConfig::default()).await;

        // Only the previously failed entry was retried.
        assert_eq!(index_impl.lookup_calls(), 1);
        assert_eq!(
            store.get("cached").unwrap().oa_status,
            vec![OaStatus::DoiFound, OaStatus::UrlNotFound]
        );
        assert_eq!(
            store.get("failed").unwrap().oa_status,
            vec![OaStatus::DoiNotFound]
        );
    }
}
