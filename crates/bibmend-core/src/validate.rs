//! Stage 4: cross-validate candidate records against the original entries.

use std::collections::HashSet;

use bibmend_bib::BibEntry;
use tracing::{info, warn};

use crate::store::Store;
use crate::{
    CoreError, FetchStatus, PipelineConfig, ReviewDecision, ReviewEvent, ReviewHandler, Verdict,
};

/// Normalize a title for comparison: lowercase, brace characters stripped,
/// the LaTeX marker escapes the registry emits mapped back to their literal
/// punctuation.
fn normalize_title(raw: &str) -> String {
    raw.to_lowercase()
        .replace(['{', '}'], "")
        .replace("\\textquotesingle", "'")
        .replace("\\textendash", "--")
        .replace("\\textemdash", "-")
}

/// Compare an input entry against its candidate on type, year, and title.
///
/// Returns the pass flag and the human-readable check summary. The title
/// policy works on the symmetric difference of the whitespace token sets:
/// empty difference is a strong pass, one or two stray tokens pass with a
/// warning, three or more fail. The thresholds are absolute, not scaled to
/// the title length.
pub fn double_check(input: &BibEntry, candidate: &BibEntry) -> (bool, String) {
    let mut flag = true;
    let mut check = String::new();

    // Same title and year can legitimately exist as both a conference and a
    // journal publication; the type tag is what tells them apart.
    if input.entry_type != candidate.entry_type {
        check.push_str("entry type: !ok ");
        flag = false;
        warn!(
            input_type = %input.entry_type,
            candidate_type = %candidate.entry_type,
            "entry types differ"
        );
    }

    let year_1 = input.get("year").unwrap_or("");
    let year_2 = candidate.get("year").unwrap_or("");
    if year_2.is_empty() {
        check.push_str("year: none(2) ");
    } else if year_1.is_empty() {
        check.push_str("year: none(1) ");
    } else if year_1 != year_2 {
        check.push_str("year: !ok ");
        flag = false;
        warn!(input_year = %year_1, candidate_year = %year_2, "years differ");
    } else {
        check.push_str("year: ok ");
    }

    let title_1 = normalize_title(input.get("title").unwrap_or(""));
    let title_2 = normalize_title(candidate.get("title").unwrap_or(""));
    let words_1: HashSet<&str> = title_1.split_whitespace().collect();
    let words_2: HashSet<&str> = title_2.split_whitespace().collect();
    let difference: Vec<&&str> = words_1.symmetric_difference(&words_2).collect();

    match difference.len() {
        0 => check.push_str("title: ok+ "),
        1 | 2 => {
            check.push_str("title: ok- ");
            warn!(difference = ?difference, "small difference in title");
        }
        _ => {
            check.push_str("title: !ok ");
            flag = false;
        }
    }

    (flag, check)
}

/// Assign a verdict to every record.
///
/// Records without a fetched candidate are `failed`. The candidate's
/// citation key is remapped to the input key first so merged output keeps
/// stable keys. Manual overrides: a key on the skip list is `skipped` (and
/// never merged downstream); a key on the force-valid list is `valid`
/// regardless of the checks; skip wins when a key is on both. A failed check
/// without an applicable override goes to the review handler, which may
/// abort the run; all such events are also returned for the run summary.
pub fn validate_records(
    store: &mut Store,
    config: &PipelineConfig,
    review: &dyn ReviewHandler,
) -> Result<Vec<ReviewEvent>, CoreError> {
    let mut events = Vec::new();

    for key in store.keys() {
        let Some(record) = store.get_mut(&key) else {
            continue;
        };

        let candidate = match (&record.fetch_status, record.candidate.as_mut()) {
            (Some(FetchStatus::Ok), Some(candidate)) => {
                if candidate.key != record.input.key {
                    record.candidate_raw_key = Some(candidate.key.clone());
                    candidate.key = record.input.key.clone();
                }
                candidate.clone()
            }
            _ => {
                record.verdict = Some(Verdict::Failed);
                record.check_detail = None;
                continue;
            }
        };
        let input = record.input.clone();

        let (passed, mut detail) = double_check(&input, &candidate);
        let skipped = config.skip_double_check.iter().any(|k| *k == key);
        let forced = config.forced_valid.iter().any(|k| *k == key);

        let verdict = if skipped {
            Verdict::Skipped
        } else if forced {
            detail.push_str("forced valid");
            Verdict::Valid
        } else if passed {
            Verdict::Valid
        } else {
            Verdict::Invalid
        };

        if !passed && !skipped && !forced {
            let event = ReviewEvent {
                key: key.clone(),
                detail: detail.clone(),
                input,
                candidate,
            };
            events.push(event.clone());
            if review.on_failed_check(&event) == ReviewDecision::Abort {
                return Err(CoreError::Aborted(key));
            }
        }

        info!(key = %key, %verdict, %detail, "validation result");
        let Some(record) = store.get_mut(&key) else {
            continue;
        };
        record.verdict = Some(verdict);
        record.check_detail = Some(detail);
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntryRecord;
    use crate::{AcceptAll, ReviewDecision, ReviewHandler};

    fn entry(key: &str, entry_type: &str, year: &str, title: &str) -> BibEntry {
        let mut e = BibEntry::new(key, entry_type);
        e.set("year", year);
        e.set("title", title);
        e
    }

    fn record_with_candidate(input: BibEntry, candidate: BibEntry) -> EntryRecord {
        let mut r = EntryRecord::new(input);
        r.fetch_status = Some(FetchStatus::Ok);
        r.candidate = Some(candidate);
        r.doi = Some("10.1/x".into());
        r
    }

    #[test]
    fn identical_titles_pass_strongly() {
        let (flag, check) = double_check(
            &entry("a1", "article", "2020", "Foo Bar"),
            &entry("x", "article", "2020", "Foo Bar"),
        );
        assert!(flag);
        assert_eq!(check, "year: ok title: ok+ ");
    }

    #[test]
    fn one_or_two_stray_tokens_pass_weakly() {
        let (flag, check) = double_check(
            &entry("a1", "article", "2020", "Foo Bar"),
            &entry("x", "article", "2020", "Foo Bar Extra"),
        );
        assert!(flag);
        assert!(check.contains("title: ok- "));
    }

    #[test]
    fn three_stray_tokens_fail() {
        let (flag, check) = double_check(
            &entry("a1", "article", "2020", "Foo Bar"),
            &entry("x", "article", "2020", "Foo Baz Qux Extra"),
        );
        assert!(!flag);
        assert!(check.contains("title: !ok "));
    }

    #[test]
    fn braces_and_marker_escapes_are_normalized() {
        let (flag, check) = double_check(
            &entry("a1", "article", "2020", "Painlev{\\'e} paradox -- an overview"),
            &entry("x", "article", "2020", "Painlev{\\'e} paradox \\textendash{} an overview"),
        );
        assert!(flag, "{check}");
        assert!(check.contains("title: ok+ "));
    }

    #[test]
    fn year_mismatch_fails_but_unknown_does_not() {
        let (flag, check) = double_check(
            &entry("a1", "article", "2019", "Foo Bar"),
            &entry("x", "article", "2020", "Foo Bar"),
        );
        assert!(!flag);
        assert!(check.contains("year: !ok "));

        let (flag, check) = double_check(
            &entry("a1", "article", "", "Foo Bar"),
            &entry("x", "article", "2020", "Foo Bar"),
        );
        assert!(flag);
        assert!(check.contains("year: none(1) "));

        let (flag, check) = double_check(
            &entry("a1", "article", "2019", "Foo Bar"),
            &entry("x", "article", "", "Foo Bar"),
        );
        assert!(flag);
        assert!(check.contains("year: none(2) "));
    }

    #[test]
    fn type_mismatch_fails() {
        let (flag, check) = double_check(
            &entry("a1", "inproceedings", "2020", "Foo Bar"),
            &entry("x", "article", "2020", "Foo Bar"),
        );
        assert!(!flag);
        assert!(check.contains("entry type: !ok "));
    }

    #[test]
    fn verdicts_and_key_remap() {
        let mut store = Store::in_memory();
        store.push(record_with_candidate(
            entry("good", "article", "2020", "Foo Bar"),
            entry("Doe_2020", "article", "2020", "Foo Bar"),
        ));
        store.push(record_with_candidate(
            entry("bad", "article", "2020", "Foo Bar"),
            entry("x", "article", "2020", "Entirely Different Words Here"),
        ));
        store.push(EntryRecord::new(entry("unfetched", "article", "2020", "T")));

        let config = PipelineConfig::default();
        let events = validate_records(&mut store, &config, &AcceptAll).unwrap();

        let good = store.get("good").unwrap();
        assert_eq!(good.verdict, Some(Verdict::Valid));
        assert_eq!(good.candidate.as_ref().unwrap().key, "good");
        assert_eq!(good.candidate_raw_key.as_deref(), Some("Doe_2020"));

        assert_eq!(store.get("bad").unwrap().verdict, Some(Verdict::Invalid));
        assert_eq!(
            store.get("unfetched").unwrap().verdict,
            Some(Verdict::Failed)
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].key, "bad");
    }

    #[test]
    fn skip_list_wins_over_force_valid() {
        let mut store = Store::in_memory();
        store.push(record_with_candidate(
            entry("both", "article", "2020", "Foo Bar"),
            entry("x", "article", "2020", "Entirely Different Words Here"),
        ));
        let config = PipelineConfig {
            skip_double_check: vec!["both".into()],
            forced_valid: vec!["both".into()],
            ..Default::default()
        };
        let events = validate_records(&mut store, &config, &AcceptAll).unwrap();
        assert_eq!(store.get("both").unwrap().verdict, Some(Verdict::Skipped));
        assert!(events.is_empty());
    }

    #[test]
    fn force_valid_overrides_failed_checks() {
        let mut store = Store::in_memory();
        store.push(record_with_candidate(
            entry("forced", "article", "2020", "Foo Bar"),
            entry("x", "book", "2018", "Entirely Different Words Here"),
        ));
        let config = PipelineConfig {
            forced_valid: vec!["forced".into()],
            ..Default::default()
        };
        let events = validate_records(&mut store, &config, &AcceptAll).unwrap();
        let r = store.get("forced").unwrap();
        assert_eq!(r.verdict, Some(Verdict::Valid));
        assert!(r.check_detail.as_deref().unwrap().ends_with("forced valid"));
        assert!(events.is_empty());
    }

    struct AbortAll;
    impl ReviewHandler for AbortAll {
        fn on_failed_check(&self, _event: &ReviewEvent) -> ReviewDecision {
            ReviewDecision::Abort
        }
    }

    #[test]
    fn review_handler_can_abort() {
        let mut store = Store::in_memory();
        store.push(record_with_candidate(
            entry("bad", "article", "2020", "Foo Bar"),
            entry("x", "article", "2020", "Entirely Different Words Here"),
        ));
        let err = validate_records(&mut store, &PipelineConfig::default(), &AbortAll).unwrap_err();
        assert!(matches!(err, CoreError::Aborted(key) if key == "bad"));
    }
}
