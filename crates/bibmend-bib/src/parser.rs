//! Hand-rolled BibTeX parser.
//!
//! Scans `@type{key, field = value, ...}` blocks directly rather than going
//! through a LaTeX-aware library: field values must survive verbatim (braces
//! included) because the pipeline compares entries byte-for-byte against a
//! cache to detect edits. Real-world `.bib` files routinely carry minor
//! syntax damage, so a malformed entry is skipped with a warning and parsing
//! resumes at the next `@`.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::entry::BibEntry;

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Parse a whole bibliography source into entries.
///
/// `@comment`, `@string`, and `@preamble` blocks are skipped; free text
/// between entries is ignored. Duplicate citation keys keep the last
/// occurrence.
pub fn parse_bibliography(src: &str) -> Vec<BibEntry> {
    let mut entries: Vec<BibEntry> = Vec::new();
    let bytes = src.as_bytes();
    let mut pos = 0usize;

    while let Some(at) = find_byte(bytes, pos, b'@') {
        match parse_block(src, at) {
            Ok((maybe_entry, next)) => {
                if let Some(entry) = maybe_entry {
                    if let Some(existing) = entries.iter_mut().find(|e| e.key == entry.key) {
                        warn!(key = %entry.key, "duplicate citation key, keeping the last one");
                        *existing = entry;
                    } else {
                        entries.push(entry);
                    }
                }
                pos = next;
            }
            Err(e) => {
                warn!(offset = at, error = %e, "skipping malformed block");
                pos = at + 1;
            }
        }
    }

    entries
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes[from.min(bytes.len())..]
        .iter()
        .position(|&b| b == needle)
        .map(|i| from + i)
}

/// Parse one `@...` block starting at `at`. Returns the entry (or `None` for
/// non-entry blocks) and the offset just past the block.
fn parse_block(src: &str, at: usize) -> Result<(Option<BibEntry>, usize), String> {
    let bytes = src.as_bytes();
    let mut pos = at + 1;

    let ident_start = pos;
    while pos < bytes.len() && bytes[pos].is_ascii_alphabetic() {
        pos += 1;
    }
    if pos == ident_start {
        return Err("missing entry type after `@`".into());
    }
    let ident = src[ident_start..pos].to_lowercase();

    pos = skip_ws(bytes, pos);
    let open = *bytes.get(pos).ok_or("unexpected end of input")?;
    let close = match open {
        b'{' => b'}',
        b'(' => b')',
        _ => return Err(format!("expected `{{` or `(` after `@{}`", ident)),
    };
    pos += 1;

    if matches!(ident.as_str(), "comment" | "string" | "preamble") {
        let end = skip_balanced(bytes, pos, open, close)?;
        return Ok((None, end));
    }

    // Citation key runs up to the first comma (or an immediate close for a
    // fieldless entry).
    let key_start = pos;
    while pos < bytes.len() && bytes[pos] != b',' && bytes[pos] != close {
        pos += 1;
    }
    if pos >= bytes.len() {
        return Err("unterminated entry".into());
    }
    let key = src[key_start..pos].trim().to_string();
    if key.is_empty() {
        return Err("empty citation key".into());
    }
    let mut entry = BibEntry::new(key, ident);

    if bytes[pos] == close {
        return Ok((Some(entry), pos + 1));
    }
    pos += 1; // consume comma

    loop {
        pos = skip_ws(bytes, pos);
        match bytes.get(pos) {
            None => return Err("unterminated entry".into()),
            Some(&b) if b == close => return Ok((Some(entry), pos + 1)),
            Some(&b',') => {
                pos += 1;
                continue;
            }
            _ => {}
        }

        let name_start = pos;
        while pos < bytes.len() && bytes[pos] != b'=' && bytes[pos] != close {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] != b'=' {
            return Err("field without `=`".into());
        }
        let name = src[name_start..pos].trim().to_lowercase();
        if name.is_empty() {
            return Err("empty field name".into());
        }
        pos = skip_ws(bytes, pos + 1);

        let (value, next) = parse_value(src, pos, close)?;
        entry.set(&name, WS_RE.replace_all(value.trim(), " ").into_owned());
        pos = next;
    }
}

/// Parse a field value: a balanced-brace group (outer braces stripped, inner
/// kept verbatim), a quoted string, or a bare token running to the next
/// comma or entry terminator.
fn parse_value(src: &str, pos: usize, close: u8) -> Result<(String, usize), String> {
    let bytes = src.as_bytes();
    match bytes.get(pos) {
        None => Err("missing field value".into()),
        Some(b'{') => {
            let end = skip_balanced(bytes, pos + 1, b'{', b'}')?;
            Ok((src[pos + 1..end - 1].to_string(), end))
        }
        Some(b'"') => {
            let mut depth = 0usize;
            let mut i = pos + 1;
            while i < bytes.len() {
                match bytes[i] {
                    b'{' => depth += 1,
                    b'}' => depth = depth.saturating_sub(1),
                    b'"' if depth == 0 => return Ok((src[pos + 1..i].to_string(), i + 1)),
                    _ => {}
                }
                i += 1;
            }
            Err("unterminated quoted value".into())
        }
        Some(_) => {
            let mut depth = 0usize;
            let mut i = pos;
            while i < bytes.len() {
                match bytes[i] {
                    b'{' => depth += 1,
                    b'}' if depth > 0 => depth -= 1,
                    b',' if depth == 0 => break,
                    b if depth == 0 && b == close => break,
                    _ => {}
                }
                i += 1;
            }
            if i >= bytes.len() {
                return Err("unterminated bare value".into());
            }
            Ok((src[pos..i].to_string(), i))
        }
    }
}

/// Advance past a balanced group whose opener was already consumed.
/// Returns the offset just past the closing delimiter.
fn skip_balanced(bytes: &[u8], mut pos: usize, open: u8, close: u8) -> Result<usize, String> {
    let mut depth = 1usize;
    while pos < bytes.len() {
        let b = bytes[pos];
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Ok(pos + 1);
            }
        }
        pos += 1;
    }
    Err("unbalanced delimiters".into())
}

fn skip_ws(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_entry() {
        let src = "@Article{Corre2020,\n author = {Corre, G.},\n title = {A Study},\n year = {2020}\n}";
        let entries = parse_bibliography(src);
        assert_eq!(entries.len(), 1);
        let e = &entries[0];
        assert_eq!(e.key, "Corre2020");
        assert_eq!(e.entry_type, "article");
        assert_eq!(e.get("author"), Some("Corre, G."));
        assert_eq!(e.get("year"), Some("2020"));
    }

    #[test]
    fn inner_braces_survive_verbatim() {
        let src = "@article{k, title = {The {HAL} Archive {\\&}amp; Friends}}";
        let entries = parse_bibliography(src);
        assert_eq!(
            entries[0].get("title"),
            Some("The {HAL} Archive {\\&}amp; Friends")
        );
    }

    #[test]
    fn quoted_and_bare_values() {
        let src = "@book{k, title = \"Quoted {t}itle\", year = 1999, publisher = {P}}";
        let e = &parse_bibliography(src)[0];
        assert_eq!(e.get("title"), Some("Quoted {t}itle"));
        assert_eq!(e.get("year"), Some("1999"));
        assert_eq!(e.get("publisher"), Some("P"));
    }

    #[test]
    fn skips_comment_string_preamble() {
        let src = "@Comment{generated file}\n@string{jmps = {J. Mech.}}\n@preamble{\"x\"}\n@misc{k, note = {n}}";
        let entries = parse_bibliography(src);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "k");
    }

    #[test]
    fn malformed_entry_does_not_sink_siblings() {
        let src = "@article{broken, title = {unterminated\n@article{ok, title = {fine}}";
        let entries = parse_bibliography(src);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "ok");
    }

    #[test]
    fn duplicate_keys_keep_last() {
        let src = "@misc{k, note = {one}}\n@misc{k, note = {two}}";
        let entries = parse_bibliography(src);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].get("note"), Some("two"));
    }

    #[test]
    fn multiline_values_collapse_whitespace() {
        let src = "@article{k, title = {Line one\n    line two}}";
        assert_eq!(
            parse_bibliography(src)[0].get("title"),
            Some("Line one line two")
        );
    }

    #[test]
    fn unanticipated_fields_are_kept() {
        let src = "@article{k, keywords = {contact, friction}, crossref_doi = {10.1/x}}";
        let e = &parse_bibliography(src)[0];
        assert_eq!(e.get("keywords"), Some("contact, friction"));
        assert_eq!(e.crossref_doi.as_deref(), Some("10.1/x"));
    }
}
