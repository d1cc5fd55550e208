use serde_json::Value;

use super::client::{OracleError, TextOracle};
use crate::records::value_text;
use crate::search::scorer::Candidate;

const MAX_SUMMARY_RECORDS: usize = 10;
const SUMMARY_MAX_TOKENS: u32 = 500;
const SUMMARY_TEMPERATURE: f32 = 0.1;

pub const NO_RECORDS_MESSAGE: &str =
    "No matching tariff records were found, so there is nothing to summarize.";

/// Plain-language export briefing over the best matches.
///
/// With no matches the oracle is not called and a fixed message is returned.
pub async fn summarize(
    oracle: &impl TextOracle,
    matches: &[Candidate],
    product: &str,
    destination: Option<&str>,
) -> Result<String, OracleError> {
    if matches.is_empty() {
        return Ok(NO_RECORDS_MESSAGE.to_string());
    }
    let prompt = build_prompt(matches, product, destination);
    let text = oracle
        .generate(&prompt, SUMMARY_MAX_TOKENS, SUMMARY_TEMPERATURE)
        .await?;
    Ok(text.trim().to_string())
}

fn build_prompt(matches: &[Candidate], product: &str, destination: Option<&str>) -> String {
    let target = destination
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| format!(" when exporting to {d}"))
        .unwrap_or_default();

    let mut prompt = format!(
        "You are an expert international trade consultant. Analyze the following \
         tariff/product records and provide a clear, actionable summary for someone \
         planning to export \"{product}\"{target}.\n\n\
         Structure your response as follows:\n\
         1. TARIFF RATES: What are the key duty rates and taxes?\n\
         2. PRODUCT CLASSIFICATION: What HS codes or product categories apply?\n\
         3. KEY REQUIREMENTS: Any special restrictions, documentation, or compliance needs?\n\
         4. BUSINESS IMPACT: What does this mean for the exporter in practical terms?\n\n\
         Keep it concise but comprehensive (6-10 sentences total). Focus on actionable insights.\n\n\
         Tariff Records:\n"
    );
    for (i, candidate) in matches.iter().take(MAX_SUMMARY_RECORDS).enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, render(&candidate.record)));
    }
    prompt.push_str("\nExpert Analysis:");
    prompt
}

fn render(record: &Value) -> String {
    match record {
        Value::Object(fields) => fields
            .iter()
            .map(|(name, value)| format!("{name}: {}", value_text(value)))
            .collect::<Vec<_>>()
            .join("; "),
        other => value_text(other),
    }
}
