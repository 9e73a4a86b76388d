//! BibTeX serialization.
//!
//! Output field order is a contract, not an accident: the lead fields
//! `author, title, journal, year` come first, the remaining known fields
//! follow in a fixed order, extension fields keep their insertion order.

use crate::entry::BibEntry;

/// Banner prepended to generated files.
pub const GENERATED_BANNER: &str = "@Comment{This file has been generated by bibmend}\n@Comment{Do not edit it directly by yourself. Modify the source file if needed}\n";

/// Literal text substitutions applied after serialization. Registry records
/// occasionally leak MathML macros and HTML entities into field values.
const SUBSTITUTIONS: &[(&str, &str)] = &[("$\\mathsemicolon$", ";"), ("{\\&}amp;", "\\&")];

/// Serialize one entry.
pub fn write_entry(entry: &BibEntry) -> String {
    let mut out = format!("@{}{{{}", entry.entry_type, entry.key);
    for (name, value) in entry.ordered_fields() {
        out.push_str(",\n ");
        out.push_str(name);
        out.push_str(" = {");
        out.push_str(value);
        out.push('}');
    }
    out.push_str("\n}\n");
    out
}

/// Serialize a sequence of entries, blank-line separated.
pub fn write_bibliography(entries: &[BibEntry]) -> String {
    entries
        .iter()
        .map(write_entry)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Apply the post-serialization literal substitutions.
pub fn apply_substitutions(text: &str) -> String {
    let mut out = text.to_string();
    for (from, to) in SUBSTITUTIONS {
        out = out.replace(from, to);
    }
    out
}

/// Render the final output file: banner, entries, substitutions.
pub fn render_bib_file(entries: &[BibEntry]) -> String {
    let body = write_bibliography(entries);
    apply_substitutions(&format!("{}{}", GENERATED_BANNER, body))
}
