//! Stage 5: collapse validated entries that resolved to the same identifier.

use std::collections::HashSet;

use tracing::info;

use crate::Verdict;
use crate::store::Store;

/// Flag duplicate records among the validated ones.
///
/// Store order is input order, so the first entry resolving to a given DOI
/// stays primary and every later one is flagged and excluded from all
/// further stages and from the output. Returns the duplicate count.
pub fn mark_duplicates(store: &mut Store) -> usize {
    let mut seen: HashSet<String> = HashSet::new();
    let mut duplicates = 0usize;

    for record in store.iter_mut() {
        record.duplicate = false;
        if record.verdict != Some(Verdict::Valid) {
            continue;
        }
        let Some(doi) = record.doi.clone() else {
            continue;
        };
        if !seen.insert(doi.clone()) {
            info!(key = %record.input.key, %doi, "duplicate of an earlier entry, not treated");
            record.duplicate = true;
            duplicates += 1;
        }
    }

    duplicates
}
