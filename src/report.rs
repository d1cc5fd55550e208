use serde::Serialize;
use serde_json::Value;

use crate::markdown::{escape_inline, sanitize_line};
use crate::records::value_text;
use crate::search::scorer::Candidate;
use crate::search::{AggregateReport, LookupReport};

const MAX_VALUE_CHARS: usize = 300;

#[derive(Serialize)]
struct WithSummary<'a, T> {
    #[serde(flatten)]
    report: &'a T,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
}

/// Pretty JSON of a report, with the summary (if any) as a top-level field.
pub fn render_json<T: Serialize>(report: &T, summary: Option<&str>) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&WithSummary { report, summary })
}

pub fn format_lookup(report: &LookupReport, summary: Option<&str>) -> String {
    let mut output = format!("# Lookup: {}\n\n", sanitize_line(&report.query));
    output.push_str(&format!(
        "Source: `{}/{}` ({}, {} records)\n\n",
        report.source.bucket, report.source.key, report.format, report.records_scanned
    ));
    push_matches(&mut output, &report.matches, report.reranked, false);
    push_summary(&mut output, summary);
    output
}

pub fn format_aggregate(report: &AggregateReport, summary: Option<&str>) -> String {
    let mut output = format!("# Search: {}\n\n", sanitize_line(&report.query));
    output.push_str(&format!("Sources searched: {}", report.sources_searched));
    if !report.sources_by_country.is_empty() {
        let counts: Vec<String> = report
            .sources_by_country
            .iter()
            .map(|(code, n)| format!("{code} {n}"))
            .collect();
        output.push_str(&format!(" ({})", counts.join(", ")));
    }
    output.push_str("\n\n");

    push_matches(&mut output, &report.matches, report.reranked, true);

    if !report.failed_sources.is_empty() {
        output.push_str("## Failed Sources\n\n");
        for failed in &report.failed_sources {
            output.push_str(&format!("- `{}` ({})\n", failed.key, sanitize_line(&failed.reason)));
        }
        output.push('\n');
    }

    push_summary(&mut output, summary);
    output
}

fn push_matches(output: &mut String, matches: &[Candidate], reranked: bool, show_source: bool) {
    if matches.is_empty() {
        output.push_str("No matching records.\n\n");
        return;
    }
    let ranking = if reranked { "semantic" } else { "lexical" };
    output.push_str(&format!("## Matches ({ranking} ranking)\n\n"));

    for (i, candidate) in matches.iter().enumerate() {
        output.push_str(&format!("### {}. score {:.3}\n\n", i + 1, candidate.score));
        if show_source {
            output.push_str(&format!("Source: `{}`\n\n", candidate.source_key));
        }
        match &candidate.record {
            Value::Object(fields) => {
                for (name, value) in fields {
                    output.push_str(&format!(
                        "- **{}**: {}\n",
                        escape_inline(name),
                        escape_inline(&truncate(&value_text(value)))
                    ));
                }
            }
            other => output.push_str(&format!("- {}\n", escape_inline(&truncate(&value_text(other))))),
        }
        if let Some(explanation) = &candidate.explanation {
            output.push_str(&format!("\n> {}\n", sanitize_line(explanation)));
        }
        output.push('\n');
    }
}

fn push_summary(output: &mut String, summary: Option<&str>) {
    if let Some(summary) = summary {
        output.push_str("---\n\n## Summary\n\n");
        output.push_str(summary.trim());
        output.push('\n');
    }
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_VALUE_CHARS {
        return text.to_string();
    }
    let end = text.floor_char_boundary(MAX_VALUE_CHARS);
    format!("{}...", &text[..end])
}
