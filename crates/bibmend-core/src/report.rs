//! Stage 8a: run report and count self-check.

use crate::store::Store;

/// Entry counts after merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountCheck {
    pub input: usize,
    pub output: usize,
    pub duplicates: usize,
}

impl CountCheck {
    /// Every input entry must end up either in the output or flagged as a
    /// duplicate.
    pub fn consistent(&self) -> bool {
        self.output + self.duplicates == self.input
    }
}

pub fn count_entries(store: &Store) -> CountCheck {
    CountCheck {
        input: store.len(),
        output: store
            .iter()
            .filter(|r| !r.duplicate && r.output.is_some())
            .count(),
        duplicates: store.iter().filter(|r| r.duplicate).count(),
    }
}

fn row(
    number: &str,
    id: &str,
    query: &str,
    verdict: &str,
    check: &str,
    action: &str,
    oa: &str,
) -> String {
    format!(
        "# {:<6} {:<30} {:<10} {:<10} {:<40} {:<10} {}",
        number, id, query, verdict, check, action, oa
    )
}

/// Render the per-entry tabular summary, two rows per treated entry, one for
/// a duplicate.
pub fn render_summary(store: &Store) -> Vec<String> {
    let mut lines = Vec::with_capacity(2 + store.len() * 2);
    lines.push(row(
        "number",
        "id",
        "doi query",
        "verdict",
        "check",
        "action",
        "unpaywall status",
    ));
    lines.push(row("", "", "", "", "", "", "unpaywall msg"));

    for (idx, record) in store.iter().enumerate() {
        let number = idx.to_string();
        if record.duplicate {
            lines.push(row(&number, record.key(), "duplicate", "", "", "", ""));
            continue;
        }
        let query = record
            .doi_query_status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".into());
        let verdict = record
            .verdict
            .map(|v| v.to_string())
            .unwrap_or_else(|| "-".into());
        let oa = record
            .oa_status
            .iter()
            .map(|s| s.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(row(
            &number,
            record.key(),
            &query,
            &verdict,
            record.check_detail.as_deref().unwrap_or("--"),
            &record.actions[0],
            &oa,
        ));
        lines.push(row(
            "",
            "",
            "",
            "",
            "",
            &record.actions[1],
            record.oa_message.as_deref().unwrap_or(""),
        ));
    }

    lines
}
