//! Stage sequencing for a full reconciliation run.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bibmend_bib::BibEntry;
use tracing::{info, warn};

use crate::registry::{MetadataRegistry, OpenAccessIndex};
use crate::store::Store;
use crate::{
    AcceptAll, CoreError, PipelineConfig, ReviewHandler, RunSummary, Verdict, dedup, fetch,
    loader, merge, openaccess, report, resolve, validate,
};

pub struct Pipeline {
    config: PipelineConfig,
    registry: Arc<dyn MetadataRegistry>,
    oa_index: Arc<dyn OpenAccessIndex>,
    review: Arc<dyn ReviewHandler>,
    client: reqwest::Client,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        registry: Arc<dyn MetadataRegistry>,
        oa_index: Arc<dyn OpenAccessIndex>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            config,
            registry,
            oa_index,
            review: Arc::new(AcceptAll),
            client,
        }
    }

    pub fn with_review_handler(mut self, review: Arc<dyn ReviewHandler>) -> Self {
        self.review = review;
        self
    }

    /// Run stages 1–8 over the parsed entries, mutating (and checkpointing)
    /// the store. Stage-local failures stay per-entry; only the addendum
    /// conflict, a review abort, and checkpoint I/O escalate.
    pub async fn run(
        &self,
        entries: &[BibEntry],
        store: &mut Store,
    ) -> Result<RunSummary, CoreError> {
        info!(entries = entries.len(), "1. merging input with the cached store");
        loader::sync_store(entries, store, self.config.max_entries);

        info!("2. identifier search on the registry");
        let started = Instant::now();
        resolve::resolve_identifiers(store, &self.registry, &self.client, &self.config).await;
        info!(elapsed = ?started.elapsed(), "identifier search done");
        store.checkpoint()?;

        info!("3. record fetch from the registry");
        let started = Instant::now();
        fetch::fetch_records(store, &self.registry, &self.client, &self.config).await;
        info!(elapsed = ?started.elapsed(), "record fetch done");
        store.checkpoint()?;

        info!("4. validation of candidate records");
        let review_queue = validate::validate_records(store, &self.config, self.review.as_ref())?;

        info!("5. duplicate removal");
        let duplicates = dedup::mark_duplicates(store);

        info!("6. open-access lookup");
        let started = Instant::now();
        openaccess::locate_open_access(store, &self.oa_index, &self.client, &self.config).await;
        info!(elapsed = ?started.elapsed(), "open-access lookup done");
        store.checkpoint()?;

        info!("7. building output entries");
        merge::build_outputs(store, &self.config)?;

        info!("8. report");
        for line in report::render_summary(store) {
            info!("{line}");
        }
        let counts = report::count_entries(store);
        info!(
            input = counts.input,
            duplicates = counts.duplicates,
            output = counts.output,
            "entry counts"
        );
        if !counts.consistent() {
            warn!(
                input = counts.input,
                duplicates = counts.duplicates,
                output = counts.output,
                "output entry count does not add up to the input count"
            );
        }

        let verdicts = |v: Verdict| store.iter().filter(|r| r.verdict == Some(v)).count();
        Ok(RunSummary {
            input_entries: counts.input,
            output_entries: counts.output,
            duplicates,
            valid: verdicts(Verdict::Valid),
            invalid: verdicts(Verdict::Invalid),
            skipped: verdicts(Verdict::Skipped),
            failed: verdicts(Verdict::Failed),
            counts_consistent: counts.consistent(),
            review_queue,
        })
    }

    /// Surviving output entries, in store (input) order.
    pub fn collect_output(store: &Store) -> Vec<BibEntry> {
        store
            .iter()
            .filter(|r| !r.duplicate)
            .filter_map(|r| r.output.clone())
            .collect()
    }
}
