use std::path::Path;

use thiserror::Error;

pub mod entry;
pub mod parser;
pub mod writer;

pub use entry::BibEntry;
pub use parser::parse_bibliography;
pub use writer::{GENERATED_BANNER, apply_substitutions, render_bib_file, write_bibliography};

#[derive(Error, Debug)]
pub enum BibError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no BibTeX entries found")]
    NoEntries,
}

/// Parse a `.bib` file into entries.
///
/// Errors with [`BibError::NoEntries`] when the file contains no parseable
/// `@type{...}` block at all; a file where only some entries are malformed
/// parses the rest and logs the casualties.
pub fn read_bibliography(path: &Path) -> Result<Vec<BibEntry>, BibError> {
    let content = std::fs::read_to_string(path)?;
    let entries = parse_bibliography(&content);
    if entries.is_empty() {
        return Err(BibError::NoEntries);
    }
    Ok(entries)
}
