use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{CommandFactory, Parser};

use bibmend_core::registry::crossref::Crossref;
use bibmend_core::registry::unpaywall::Unpaywall;
use bibmend_core::registry::{MetadataRegistry, OpenAccessIndex};
use bibmend_core::{
    Pipeline, PipelineConfig, ReviewDecision, ReviewEvent, ReviewHandler, Store,
};

const EXTRA_HELP: &str = "\
The output is written next to the input as <input>_edited.bib and carries
only reconciled, deduplicated entries. Intermediate results are cached in
<input>_cache.json; delete that file to force a full requery.

A `crossref_doi = {...}` field in an input entry pins the registry match and
skips the free-text search for that entry entirely. Use
--skip-double-check for entries whose registry match is known to disagree
with the input metadata, --forced-valid-crossref-entry to accept a record
despite failing checks, and --keep-entry ID:FIELD to protect individual
input fields from a bad registry record.";

/// Reconcile a BibTeX bibliography against Crossref and Unpaywall
#[derive(Parser, Debug)]
#[command(version, about, after_long_help = EXTRA_HELP)]
struct Cli {
    /// Input .bib file
    file: Option<PathBuf>,

    /// Verbosity: 0 = warnings only, 1 = progress, 2 = debug
    #[arg(long, default_value_t = 1, value_name = "N")]
    verbose: u8,

    /// Maximum concurrent registry requests
    #[arg(long, default_value_t = 5, value_name = "N")]
    parallel_requests: usize,

    /// Embed the full Unpaywall response in the output entries
    #[arg(long)]
    output_unpaywall_data: bool,

    /// Entry keys whose registry double check is skipped
    #[arg(long, value_delimiter = ',', value_name = "ID,ID,...")]
    skip_double_check: Vec<String>,

    /// Entry keys whose registry record is accepted regardless of checks
    #[arg(long, value_delimiter = ',', value_name = "ID,ID,...")]
    forced_valid_crossref_entry: Vec<String>,

    /// Pause for inspection when a validation check fails
    #[arg(long)]
    stop_on_bad_check: bool,

    /// Process only the first N entries
    #[arg(long, default_value_t = 100_000, value_name = "N")]
    max_entry: usize,

    /// Input fields protected from the registry merge
    #[arg(long, value_delimiter = ',', value_name = "ID:FIELD,...")]
    keep_entry: Vec<String>,

    /// Contact email for the Crossref polite pool and Unpaywall
    #[arg(long, value_name = "EMAIL")]
    mailto: Option<String>,

    /// Entry fields concatenated into the free-text registry query
    #[arg(
        long,
        value_delimiter = ',',
        value_name = "FIELD,FIELD,...",
        default_values_t = ["author".to_string(), "year".to_string(), "title".to_string()]
    )]
    query_fields: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    let Some(file) = cli.file.clone() else {
        let _ = Cli::command().print_help();
        return ExitCode::from(1);
    };

    if !file.exists() {
        eprintln!("bib file {} is not existing", file.display());
        return ExitCode::SUCCESS;
    }

    match run(cli, &file).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(cli: Cli, file: &Path) -> anyhow::Result<()> {
    // CLI flag > env var; one address feeds both services.
    let mailto = cli
        .mailto
        .clone()
        .or_else(|| std::env::var("CROSSREF_MAILTO").ok())
        .or_else(|| std::env::var("UNPAYWALL_EMAIL").ok());

    let entries = bibmend_bib::read_bibliography(file)
        .with_context(|| format!("cannot parse {}", file.display()))?;
    tracing::info!(entries = entries.len(), path = %file.display(), "input parsed");

    let stem = file.with_extension("");
    let output_path = PathBuf::from(format!("{}_edited.bib", stem.display()));
    let cache_path = PathBuf::from(format!("{}_cache.json", stem.display()));

    let config = PipelineConfig {
        parallel_requests: cli.parallel_requests.max(1),
        max_entries: cli.max_entry,
        query_fields: cli.query_fields.clone(),
        trust_input_doi: true,
        skip_double_check: cli.skip_double_check.clone(),
        forced_valid: cli.forced_valid_crossref_entry.clone(),
        keep_fields: parse_keep_entry(&cli.keep_entry)?,
        output_oa_data: cli.output_unpaywall_data,
        mailto: mailto.clone(),
    };

    let registry: Arc<dyn MetadataRegistry> = Arc::new(Crossref {
        mailto: mailto.clone(),
    });
    let index: Arc<dyn OpenAccessIndex> = Arc::new(Unpaywall { email: mailto });

    let mut pipeline = Pipeline::new(config, registry, index);
    if cli.stop_on_bad_check {
        pipeline = pipeline.with_review_handler(Arc::new(PromptReview));
    }

    let mut store = Store::load_or_new(&cache_path);
    pipeline.run(&entries, &mut store).await?;

    let output = Pipeline::collect_output(&store);
    std::fs::write(&output_path, bibmend_bib::render_bib_file(&output))
        .with_context(|| format!("cannot write {}", output_path.display()))?;
    tracing::info!(path = %output_path.display(), entries = output.len(), "output written");

    Ok(())
}

/// Parse `--keep-entry ID:FIELD` pairs.
fn parse_keep_entry(values: &[String]) -> anyhow::Result<Vec<(String, String)>> {
    let mut pairs = Vec::with_capacity(values.len());
    for value in values {
        let parsed = value
            .split_once(':')
            .map(|(id, field)| (id.trim(), field.trim()))
            .filter(|(id, field)| !id.is_empty() && !field.is_empty());
        let Some((id, field)) = parsed else {
            anyhow::bail!("invalid --keep-entry value `{value}`, expected ID:FIELD");
        };
        pairs.push((id.to_string(), field.to_lowercase()));
    }
    Ok(pairs)
}

/// Interactive review under `--stop-on-bad-check`: show both entries and
/// wait for the operator before going on.
struct PromptReview;

impl ReviewHandler for PromptReview {
    fn on_failed_check(&self, event: &ReviewEvent) -> ReviewDecision {
        eprintln!("check failed for `{}`: {}", event.key, event.detail);
        eprintln!(
            "input entry:\n{}",
            bibmend_bib::write_bibliography(std::slice::from_ref(&event.input))
        );
        eprintln!(
            "registry entry:\n{}",
            bibmend_bib::write_bibliography(std::slice::from_ref(&event.candidate))
        );
        eprintln!(
            "hint: set crossref_doi = {{...}} in the input entry to pin the match, or rerun with --skip-double-check={} or --forced-valid-crossref-entry={}",
            event.key, event.key
        );
        eprint!("press Enter to continue, `q` to abort: ");
        let _ = std::io::stderr().flush();

        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(_) if line.trim().eq_ignore_ascii_case("q") => ReviewDecision::Abort,
            _ => ReviewDecision::Proceed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn keep_entry_pairs_parse() {
        let pairs = parse_keep_entry(&["toto1:author".into(), "toto2:Journal".into()]).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("toto1".to_string(), "author".to_string()),
                ("toto2".to_string(), "journal".to_string())
            ]
        );
    }

    #[test]
    fn malformed_keep_entry_is_rejected() {
        assert!(parse_keep_entry(&["toto1".into()]).is_err());
        assert!(parse_keep_entry(&[":author".into()]).is_err());
    }

    #[test]
    fn default_query_fields() {
        let cli = Cli::parse_from(["bibmend", "refs.bib"]);
        assert_eq!(cli.query_fields, vec!["author", "year", "title"]);
        assert_eq!(cli.parallel_requests, 5);
    }
}
