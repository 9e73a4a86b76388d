//! Stage 7: build the output entry for every surviving record.
//!
//! Pass-through for anything without a validated candidate; otherwise a
//! field-level merge under a fixed precedence list, provenance tags
//! collected into the `addendum` field, and a final cleanup of fields the
//! output file must not carry.

use serde_json::Value;
use tracing::debug;

use crate::store::Store;
use crate::{CoreError, OaProvenance, OaStatus, PipelineConfig, Verdict};

/// Fields taken from the candidate record when present.
const MERGE_FIELDS: &[&str] = &[
    "journal",
    "author",
    "publisher",
    "volume",
    "number",
    "booktitle",
    "pages",
];

/// Fields never emitted in the output file.
const STRIP_FIELDS: &[&str] = &["month", "pdf", "url", "doi"];

/// `true` when every alphabetic character is uppercase (and there is at
/// least one), the registry's tell for shouting-case family names.
fn is_all_uppercase(s: &str) -> bool {
    let mut saw_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            saw_alpha = true;
            if !c.is_uppercase() {
                return false;
            }
        }
    }
    saw_alpha
}

/// Title-case every alphabetic run: first letter upper, rest lower.
/// Hyphens and apostrophes count as boundaries, so `DUPONT-MARTIN` becomes
/// `Dupont-Martin`.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_start = false;
        } else {
            out.push(c);
            at_start = true;
        }
    }
    out
}

/// Rebuild the author field from the registry's structured author list:
/// `Family, Given` pairs joined by ` and `, family alone when no given name,
/// all-uppercase family names normalized to title case.
fn restyle_authors(raw: &Value) -> Option<String> {
    let authors = raw["author"].as_array()?;
    let mut styled: Vec<String> = Vec::with_capacity(authors.len());
    for author in authors {
        let Some(family) = author["family"].as_str() else {
            continue;
        };
        let family = if is_all_uppercase(family) {
            title_case(family)
        } else {
            family.to_string()
        };
        match author["given"].as_str() {
            Some(given) => styled.push(format!("{}, {}", family, given)),
            None => styled.push(family),
        }
    }
    if styled.is_empty() {
        None
    } else {
        Some(styled.join(" and "))
    }
}

/// Build `output` for every non-duplicate record.
///
/// An input entry that already declares a manual `addendum` conflicts with
/// the provenance tags and fails the whole run; the input file has to be
/// corrected (or the merge suppressed via overrides).
pub fn build_outputs(store: &mut Store, config: &PipelineConfig) -> Result<(), CoreError> {
    for key in store.keys() {
        let Some(record) = store.get(&key) else {
            continue;
        };
        if record.duplicate {
            if let Some(record) = store.get_mut(&key) {
                record.output = None;
            }
            continue;
        }

        let input = record.input.clone();

        // No validated candidate: the entry passes through untouched.
        if record.verdict != Some(Verdict::Valid) || record.candidate.is_none() {
            if let Some(record) = store.get_mut(&key) {
                record.output = Some(input);
            }
            continue;
        }

        let candidate = record.candidate.clone().unwrap_or_default();
        let candidate_json = record.candidate_json.clone();
        let doi = record.doi.clone();
        let url_found = record.oa_status.contains(&OaStatus::UrlFound);
        let oa_url = record.oa_url.clone();
        let oa_provenance = record.oa_provenance;
        let oa_landing_url = record.oa_landing_url.clone();
        let oa_data = record.oa_data.clone();

        let mut output = input.clone();
        let mut actions = [String::new(), String::new()];
        let mut addendum_items: Vec<String> = Vec::new();

        let kept: Vec<&str> = config
            .keep_fields
            .iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, field)| field.as_str())
            .collect();

        for field in MERGE_FIELDS {
            if kept.contains(field) {
                debug!(key = %key, %field, "field kept from the input entry");
                continue;
            }
            let Some(value) = candidate.get(field) else {
                continue;
            };
            if *field == "author" {
                let styled = candidate_json
                    .as_ref()
                    .and_then(restyle_authors)
                    .unwrap_or_else(|| value.to_string());
                output.set("author", styled);
            } else {
                output.set(field, value);
            }
        }

        if let Some(doi) = &doi {
            output.set("crossref_doi", doi.clone());
            addendum_items.push(format!("\\tagDOI{{{}}}", doi));
            actions[0] = "add doi".into();
        }

        if url_found && let Some(url) = oa_url {
            output.set("unpaywalloaiurl", url.clone());
            let tagged = match oa_provenance {
                OaProvenance::Arxiv => {
                    format!("\\tagARXIV{{{}}}", oa_landing_url.as_deref().unwrap_or(&url))
                }
                OaProvenance::Hal => {
                    format!("\\tagHAL{{{}}}", oa_landing_url.as_deref().unwrap_or(&url))
                }
                OaProvenance::None => format!("\\tagOAI{{{}}}", url),
            };
            addendum_items.push(tagged);
            actions[1] = "add oai".into();
        }

        if !addendum_items.is_empty() {
            if input.get("addendum").is_some() {
                return Err(CoreError::AddendumConflict(key));
            }
            output.set("addendum", addendum_items.join(", "));
        }

        if config.output_oa_data
            && let Some(data) = oa_data
        {
            output.set("unpaywall_data", data);
        }

        for field in STRIP_FIELDS {
            output.remove(field);
        }
        if output.get("issue").is_some() {
            output.remove("number");
        }

        if let Some(record) = store.get_mut(&key) {
            record.output = Some(output);
            record.actions = actions;
        }
    }

    Ok(())
}
