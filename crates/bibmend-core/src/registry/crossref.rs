//! Crossref client: free-text work search and DOI record retrieval.

use std::future::Future;
use std::pin::Pin;

use bibmend_bib::BibEntry;
use tracing::debug;

use super::{ClientError, MetadataRegistry, RegistryWork};

const API: &str = "https://api.crossref.org/works";

pub struct Crossref {
    /// Contact address for the polite pool; anonymous pool when absent.
    pub mailto: Option<String>,
}

impl Crossref {
    fn user_agent(&self) -> String {
        match &self.mailto {
            Some(email) => format!("bibmend/0.1 (mailto:{})", email),
            None => "bibmend/0.1".to_string(),
        }
    }
}

impl MetadataRegistry for Crossref {
    fn name(&self) -> &str {
        "Crossref"
    }

    fn resolve<'a>(
        &'a self,
        query: &'a str,
        client: &'a reqwest::Client,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, ClientError>> + Send + 'a>> {
        Box::pin(async move {
            let mut url = format!(
                "{}?query.bibliographic={}&rows=1",
                API,
                urlencoding::encode(query)
            );
            if let Some(email) = &self.mailto {
                url.push_str(&format!("&mailto={}", urlencoding::encode(email)));
            }

            debug!(query = %query, "crossref bibliographic search");
            let resp = client
                .get(&url)
                .header("User-Agent", self.user_agent())
                .send()
                .await
                .map_err(ClientError::from)?;

            let status = resp.status();
            if !status.is_success() {
                return Err(ClientError::BadResponse(format!("HTTP {}", status)));
            }

            let data: serde_json::Value = resp.json().await.map_err(ClientError::from)?;
            let doi = data["message"]["items"]
                .as_array()
                .and_then(|items| items.first())
                .and_then(|item| item["DOI"].as_str())
                .map(str::to_string);
            Ok(doi)
        })
    }

    fn fetch<'a>(
        &'a self,
        doi: &'a str,
        client: &'a reqwest::Client,
    ) -> Pin<Box<dyn Future<Output = Result<RegistryWork, ClientError>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{}/{}", API, doi);

            debug!(doi = %doi, "crossref record fetch");
            let resp = client
                .get(&url)
                .header("User-Agent", self.user_agent())
                .send()
                .await
                .map_err(ClientError::from)?;

            let status = resp.status();
            if !status.is_success() {
                return Err(ClientError::BadResponse(format!("HTTP {}", status)));
            }

            let data: serde_json::Value = resp.json().await.map_err(ClientError::from)?;
            let message = data["message"].clone();
            if message.is_null() {
                return Err(ClientError::BadResponse("response without message".into()));
            }
            let (entry, raw_key) = work_to_entry(&message);
            Ok(RegistryWork {
                entry,
                raw_key,
                raw: message,
            })
        })
    }
}

/// Map a Crossref work type to a BibTeX entry type tag.
fn map_type(work_type: &str) -> &'static str {
    match work_type {
        "journal-article" => "article",
        "proceedings-article" => "inproceedings",
        "book-chapter" | "book-section" | "book-part" => "incollection",
        "book" | "monograph" | "edited-book" | "reference-book" => "book",
        "report" => "techreport",
        "dissertation" => "phdthesis",
        _ => "misc",
    }
}

/// Build a candidate [`BibEntry`] from a Crossref message, together with the
/// citation key the registry side implies (`Family_Year` when derivable).
pub fn work_to_entry(message: &serde_json::Value) -> (BibEntry, String) {
    let doi = message["DOI"].as_str().unwrap_or_default();
    let entry_type = map_type(message["type"].as_str().unwrap_or(""));

    let year = message["issued"]["date-parts"][0][0]
        .as_i64()
        .map(|y| y.to_string());

    let raw_key = match (message["author"][0]["family"].as_str(), &year) {
        (Some(family), Some(year)) => {
            let family: String = family.chars().filter(|c| c.is_alphanumeric()).collect();
            format!("{}_{}", family, year)
        }
        _ if !doi.is_empty() => doi.to_string(),
        _ => "crossref_work".to_string(),
    };

    let mut entry = BibEntry::new(raw_key.clone(), entry_type);

    if let Some(title) = message["title"]
        .as_array()
        .and_then(|t| t.first())
        .and_then(|t| t.as_str())
    {
        entry.set("title", title);
    }
    if let Some(container) = message["container-title"]
        .as_array()
        .and_then(|c| c.first())
        .and_then(|c| c.as_str())
    {
        match entry_type {
            "inproceedings" | "incollection" => entry.set("booktitle", container),
            _ => entry.set("journal", container),
        }
    }
    if let Some(year) = year {
        entry.set("year", year);
    }
    for (field, key) in [
        ("volume", "volume"),
        ("issue", "number"),
        ("page", "pages"),
        ("publisher", "publisher"),
    ] {
        if let Some(v) = message[field].as_str() {
            entry.set(key, v);
        }
    }
    if let Some(authors) = message["author"].as_array() {
        let joined: Vec<String> = authors
            .iter()
            .filter_map(|a| {
                let family = a["family"].as_str()?;
                Some(match a["given"].as_str() {
                    Some(given) => format!("{}, {}", family, given),
                    None => family.to_string(),
                })
            })
            .collect();
        if !joined.is_empty() {
            entry.set("author", joined.join(" and "));
        }
    }
    if !doi.is_empty() {
        entry.set("doi", doi);
        entry.set("url", format!("https://doi.org/{}", doi));
    }

    (entry, raw_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message() -> serde_json::Value {
        json!({
            "DOI": "10.46298/jtcam.7458",
            "type": "journal-article",
            "title": ["On the Frictional Contact Problem"],
            "container-title": ["Journal of Theoretical Mechanics"],
            "issued": {"date-parts": [[2021, 6]]},
            "volume": "7",
            "issue": "2",
            "page": "101--142",
            "publisher": "Episciences",
            "author": [
                {"family": "Acary", "given": "Vincent"},
                {"family": "BREMOND", "given": "Maurice"}
            ]
        })
    }

    #[test]
    fn builds_article_entry() {
        let (entry, raw_key) = work_to_entry(&message());
        assert_eq!(raw_key, "Acary_2021");
        assert_eq!(entry.entry_type, "article");
        assert_eq!(entry.get("title"), Some("On the Frictional Contact Problem"));
        assert_eq!(entry.get("journal"), Some("Journal of Theoretical Mechanics"));
        assert_eq!(entry.get("year"), Some("2021"));
        assert_eq!(entry.get("number"), Some("2"));
        assert_eq!(entry.get("pages"), Some("101--142"));
        assert_eq!(
            entry.get("author"),
            Some("Acary, Vincent and BREMOND, Maurice")
        );
        assert_eq!(entry.get("doi"), Some("10.46298/jtcam.7458"));
    }

    #[test]
    fn proceedings_use_booktitle() {
        let mut m = message();
        m["type"] = json!("proceedings-article");
        let (entry, _) = work_to_entry(&m);
        assert_eq!(entry.entry_type, "inproceedings");
        assert_eq!(
            entry.get("booktitle"),
            Some("Journal of Theoretical Mechanics")
        );
        assert_eq!(entry.get("journal"), None);
    }

    #[test]
    fn unknown_type_falls_back_to_misc() {
        let mut m = message();
        m["type"] = json!("posted-content");
        let (entry, _) = work_to_entry(&m);
        assert_eq!(entry.entry_type, "misc");
    }

    #[test]
    fn authorless_work_keys_on_doi() {
        let m = json!({"DOI": "10.5555/x", "type": "journal-article", "title": ["T"]});
        let (entry, raw_key) = work_to_entry(&m);
        assert_eq!(raw_key, "10.5555/x");
        assert_eq!(entry.get("author"), None);
    }
}
