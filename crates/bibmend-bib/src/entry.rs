//! The bibliography entry model.
//!
//! A [`BibEntry`] is a fixed record of the fields this tool actually reasons
//! about, plus an insertion-ordered list of whatever else the input file
//! declared. Field access goes through lowercase names so pipeline code can
//! treat an entry as a string mapping, while the known fields stay plain
//! struct members. `PartialEq` compares every field verbatim, which is what
//! the cache uses to decide whether an entry changed between runs.

use serde::{Deserialize, Serialize};

/// Known fields in writer output order (after the lead fields).
const KNOWN_ORDER: &[&str] = &[
    "author",
    "title",
    "journal",
    "booktitle",
    "publisher",
    "year",
    "month",
    "volume",
    "number",
    "issue",
    "pages",
    "doi",
    "url",
    "pdf",
    "crossref_doi",
    "unpaywalloaiurl",
    "unpaywall_data",
    "addendum",
];

/// Fields the writer emits first, in this order.
pub const LEAD_ORDER: &[&str] = &["author", "title", "journal", "year"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BibEntry {
    /// Citation key.
    pub key: String,
    /// Lowercase entry type tag (`article`, `inproceedings`, ...).
    pub entry_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub journal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booktitle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<String>,
    /// Reconciled registry identifier, also honored as a trusted input field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crossref_doi: Option<String>,
    /// Best open-access URL found via Unpaywall.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpaywalloaiurl: Option<String>,
    /// Full Unpaywall response embedded on request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpaywall_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addendum: Option<String>,
    /// Fields outside the known set, in insertion order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<(String, String)>,
}

impl BibEntry {
    pub fn new(key: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entry_type: entry_type.into().to_lowercase(),
            ..Default::default()
        }
    }

    fn slot(&self, name: &str) -> Option<&Option<String>> {
        Some(match name {
            "author" => &self.author,
            "title" => &self.title,
            "journal" => &self.journal,
            "booktitle" => &self.booktitle,
            "publisher" => &self.publisher,
            "year" => &self.year,
            "month" => &self.month,
            "volume" => &self.volume,
            "number" => &self.number,
            "issue" => &self.issue,
            "pages" => &self.pages,
            "doi" => &self.doi,
            "url" => &self.url,
            "pdf" => &self.pdf,
            "crossref_doi" => &self.crossref_doi,
            "unpaywalloaiurl" => &self.unpaywalloaiurl,
            "unpaywall_data" => &self.unpaywall_data,
            "addendum" => &self.addendum,
            _ => return None,
        })
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut Option<String>> {
        Some(match name {
            "author" => &mut self.author,
            "title" => &mut self.title,
            "journal" => &mut self.journal,
            "booktitle" => &mut self.booktitle,
            "publisher" => &mut self.publisher,
            "year" => &mut self.year,
            "month" => &mut self.month,
            "volume" => &mut self.volume,
            "number" => &mut self.number,
            "issue" => &mut self.issue,
            "pages" => &mut self.pages,
            "doi" => &mut self.doi,
            "url" => &mut self.url,
            "pdf" => &mut self.pdf,
            "crossref_doi" => &mut self.crossref_doi,
            "unpaywalloaiurl" => &mut self.unpaywalloaiurl,
            "unpaywall_data" => &mut self.unpaywall_data,
            "addendum" => &mut self.addendum,
            _ => return None,
        })
    }

    /// Look up a field by (case-insensitive) name.
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        match self.slot(&name) {
            Some(slot) => slot.as_deref(),
            None => self
                .extra
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.as_str()),
        }
    }

    /// Set a field by name. Unknown names land in the extension list,
    /// keeping first-insertion order on update.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_lowercase();
        let value = value.into();
        match self.slot_mut(&name) {
            Some(slot) => *slot = Some(value),
            None => {
                if let Some(pair) = self.extra.iter_mut().find(|(n, _)| *n == name) {
                    pair.1 = value;
                } else {
                    self.extra.push((name, value));
                }
            }
        }
    }

    /// Remove a field by name, returning the old value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let name = name.to_lowercase();
        match self.slot_mut(&name) {
            Some(slot) => slot.take(),
            None => {
                let pos = self.extra.iter().position(|(n, _)| *n == name)?;
                Some(self.extra.remove(pos).1)
            }
        }
    }

    /// Present fields in the serialization contract order: the lead fields
    /// (`author, title, journal, year`), the remaining known fields in a
    /// fixed order, then extension fields in insertion order.
    pub fn ordered_fields(&self) -> Vec<(&str, &str)> {
        let mut out = Vec::new();
        for name in LEAD_ORDER {
            if let Some(Some(v)) = self.slot(name) {
                out.push((*name, v.as_str()));
            }
        }
        for name in KNOWN_ORDER {
            if LEAD_ORDER.contains(name) {
                continue;
            }
            if let Some(Some(v)) = self.slot(name) {
                out.push((*name, v.as_str()));
            }
        }
        for (n, v) in &self.extra {
            out.push((n.as_str(), v.as_str()));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get_known_field() {
        let mut e = BibEntry::new("k", "Article");
        e.set("Title", "Foo");
        assert_eq!(e.entry_type, "article");
        assert_eq!(e.title.as_deref(), Some("Foo"));
        assert_eq!(e.get("title"), Some("Foo"));
    }

    #[test]
    fn unknown_fields_keep_insertion_order() {
        let mut e = BibEntry::new("k", "misc");
        e.set("zzz", "1");
        e.set("aaa", "2");
        e.set("zzz", "3");
        assert_eq!(
            e.extra,
            vec![("zzz".into(), "3".to_string()), ("aaa".into(), "2".to_string())]
        );
    }

    #[test]
    fn ordered_fields_lead_then_known_then_extra() {
        let mut e = BibEntry::new("k", "article");
        e.set("pages", "1--10");
        e.set("year", "2020");
        e.set("custom", "x");
        e.set("author", "Doe, Jane");
        let names: Vec<&str> = e.ordered_fields().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["author", "year", "pages", "custom"]);
    }

    #[test]
    fn remove_field() {
        let mut e = BibEntry::new("k", "article");
        e.set("month", "jan");
        e.set("note", "n");
        assert_eq!(e.remove("month"), Some("jan".to_string()));
        assert_eq!(e.remove("note"), Some("n".to_string()));
        assert_eq!(e.remove("note"), None);
        assert!(e.ordered_fields().is_empty());
    }

    #[test]
    fn equality_is_field_exact() {
        let mut a = BibEntry::new("k", "article");
        a.set("title", "T");
        let mut b = a.clone();
        assert_eq!(a, b);
        b.set("title", "T ");
        assert_ne!(a, b);
    }
}
