use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::client::{OracleError, TextOracle};
use crate::records::value_text;
use crate::search::scorer::{Candidate, sort_by_score};

/// Candidates enumerated in one prompt; the rest are never shown to the model.
pub const MAX_RERANK_CANDIDATES: usize = 100;
const MAX_FIELDS_PER_CANDIDATE: usize = 8;
const MAX_VALUE_CHARS: usize = 80;
const RERANK_MAX_TOKENS: u32 = 2048;
const RERANK_TEMPERATURE: f32 = 0.0;

#[derive(Debug, thiserror::Error)]
pub enum RerankError {
    #[error("{0}")]
    Oracle(#[from] OracleError),

    #[error("could not parse ranking from model output: {0}")]
    Malformed(String),
}

#[derive(Debug, Deserialize, PartialEq)]
struct RankedEntry {
    index: i64,
    score: f64,
    #[serde(default)]
    explanation: Option<String>,
}

/// Ask the oracle to score `candidates` for `query`, best first, at most `top_k`.
///
/// Returned indices are 1-based positions in `candidates`; out-of-range
/// indices are dropped. Duplicate indices are kept as the model sent them.
pub async fn rerank(
    oracle: &impl TextOracle,
    candidates: &[Candidate],
    query: &str,
    top_k: usize,
) -> Result<Vec<Candidate>, RerankError> {
    let shown = &candidates[..candidates.len().min(MAX_RERANK_CANDIDATES)];
    let prompt = build_prompt(shown, query);
    let output = oracle
        .generate(&prompt, RERANK_MAX_TOKENS, RERANK_TEMPERATURE)
        .await?;

    let entries = parse_ranking(&output).ok_or_else(|| {
        let end = output.floor_char_boundary(120);
        RerankError::Malformed(output[..end].to_string())
    })?;
    debug!(entries = entries.len(), shown = shown.len(), "oracle ranking parsed");

    let mut ranked: Vec<Candidate> = entries
        .into_iter()
        .filter_map(|entry| {
            let idx = usize::try_from(entry.index.checked_sub(1)?).ok()?;
            let original = shown.get(idx)?;
            Some(Candidate {
                score: entry.score.clamp(0.0, 1.0),
                explanation: entry.explanation,
                ..original.clone()
            })
        })
        .collect();

    sort_by_score(&mut ranked);
    ranked.truncate(top_k);
    Ok(ranked)
}

fn build_prompt(candidates: &[Candidate], query: &str) -> String {
    let mut prompt = format!(
        "You are ranking trade and tariff records by relevance to a product search.\n\n\
         Query: \"{query}\"\n\nRecords:\n"
    );
    for (i, candidate) in candidates.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", i + 1, describe(&candidate.record)));
    }
    prompt.push_str(
        "\nReturn ONLY a JSON array, most relevant first, one object per relevant record:\n\
         [{\"index\": <record number>, \"score\": <relevance from 0 to 1>, \"explanation\": \"<one short sentence>\"}]\n\
         Omit records that are not relevant.",
    );
    prompt
}

/// Compact one-line rendering: up to eight `field: value` pairs, values truncated.
pub(crate) fn describe(record: &Value) -> String {
    match record {
        Value::Object(fields) => fields
            .iter()
            .take(MAX_FIELDS_PER_CANDIDATE)
            .map(|(name, value)| format!("{name}: {}", truncate(&value_text(value))))
            .collect::<Vec<_>>()
            .join(" | "),
        other => truncate(&value_text(other)),
    }
}

fn truncate(text: &str) -> String {
    let single_line = text.replace(['\n', '\r'], " ");
    if single_line.chars().count() <= MAX_VALUE_CHARS {
        return single_line;
    }
    let mut cut: String = single_line.chars().take(MAX_VALUE_CHARS).collect();
    cut.push('…');
    cut
}

/// Strict parse of the whole output, then of the outermost `[...]` span.
/// Array elements that are not well-formed entries are skipped one by one.
fn parse_ranking(output: &str) -> Option<Vec<RankedEntry>> {
    let trimmed = output.trim();
    let items: Vec<Value> = match serde_json::from_str(trimmed) {
        Ok(items) => items,
        Err(_) => {
            let start = trimmed.find('[')?;
            let end = trimmed.rfind(']')?;
            if end <= start {
                return None;
            }
            serde_json::from_str(&trimmed[start..=end]).ok()?
        }
    };

    let total = items.len();
    let entries: Vec<RankedEntry> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();
    if entries.len() < total {
        debug!(skipped = total - entries.len(), "ignored malformed ranking entries");
    }
    Some(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockOracle;
    use serde_json::json;

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate::new(json!({"description": "Laptop sleeve", "rate": "4%"}), 6.0),
            Candidate::new(json!({"description": "Portable laptop computer", "rate": "0%"}), 5.0),
            Candidate::new(json!({"description": "Desktop computer", "rate": "0%"}), 3.0),
        ]
    }

    #[tokio::test]
    async fn maps_one_based_indices_to_original_positions() {
        let oracle = MockOracle::replying(&[
            r#"[{"index": 2, "score": 0.95, "explanation": "is a laptop"},
                {"index": 3, "score": 0.4, "explanation": "related"},
                {"index": 1, "score": 0.1}]"#,
        ]);
        let out = rerank(&oracle, &candidates(), "laptop", 10).await.unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].record["description"], "Portable laptop computer");
        assert_eq!(out[0].score, 0.95);
        assert_eq!(out[0].explanation.as_deref(), Some("is a laptop"));
        assert_eq!(out[2].record["description"], "Laptop sleeve");
        assert!(out[2].explanation.is_none());
    }

    #[tokio::test]
    async fn drops_out_of_range_indices_and_truncates() {
        let oracle = MockOracle::replying(&[
            r#"[{"index": 0, "score": 0.9}, {"index": 4, "score": 0.9},
                {"index": -1, "score": 0.9}, {"index": 3, "score": 0.7},
                {"index": 1, "score": 0.6}]"#,
        ]);
        let out = rerank(&oracle, &candidates(), "laptop", 1).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].record["description"], "Desktop computer");
    }

    #[tokio::test]
    async fn duplicate_indices_are_kept() {
        let oracle = MockOracle::replying(&[
            r#"[{"index": 2, "score": 0.9}, {"index": 2, "score": 0.8}]"#,
        ]);
        let out = rerank(&oracle, &candidates(), "laptop", 10).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].record, out[1].record);
    }

    #[tokio::test]
    async fn extracts_array_from_chatty_output() {
        let oracle = MockOracle::replying(&[
            "Here is the ranking:\n```json\n[{\"index\": 3, \"score\": 1.5}]\n```\nHope this helps.",
        ]);
        let out = rerank(&oracle, &candidates(), "desktop", 10).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 1.0, "score is clamped to [0, 1]");
    }

    #[tokio::test]
    async fn non_json_output_is_malformed() {
        let oracle = MockOracle::replying(&["I cannot rank these records."]);
        let err = rerank(&oracle, &candidates(), "laptop", 10).await.unwrap_err();
        assert!(matches!(err, RerankError::Malformed(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn oracle_failure_is_reported() {
        let oracle = MockOracle::failing(OracleError::RateLimited);
        let err = rerank(&oracle, &candidates(), "laptop", 10).await.unwrap_err();
        assert!(matches!(err, RerankError::Oracle(OracleError::RateLimited)));
    }

    #[tokio::test]
    async fn prompt_enumerates_at_most_the_cap() {
        let many: Vec<Candidate> = (0..150)
            .map(|i| Candidate::new(json!({"description": format!("item {i}")}), 1.0))
            .collect();
        let oracle = MockOracle::replying(&[r#"[{"index": 101, "score": 0.9}]"#]);
        let out = rerank(&oracle, &many, "item", 10).await.unwrap();
        assert!(out.is_empty(), "index past the shown slice must be dropped");

        let prompts = oracle.captured_prompts();
        let prompt = &prompts[0];
        assert!(prompt.contains("100. description: item 99"));
        assert!(!prompt.contains("101. "));
        assert!(prompt.contains("Query: \"item\""));
    }

    #[test]
    fn describe_limits_fields_and_value_length() {
        let mut fields = serde_json::Map::new();
        for i in 0..10 {
            fields.insert(format!("f{i}"), json!(i));
        }
        fields.insert("f0".into(), json!("x".repeat(200)));
        let text = describe(&Value::Object(fields));
        assert_eq!(text.matches(" | ").count(), 7);
        assert!(text.contains('…'));
        assert!(!text.contains("f8"));
    }

    #[tokio::test]
    async fn malformed_entries_are_skipped_individually() {
        let oracle = MockOracle::replying(&[
            r#"[{"index": 1}, {"index": 1.0, "score": 0.9}, "3",
                {"index": 3, "score": 0.8, "explanation": "desktop"},
                {"index": 2, "score": 0.6}]"#,
        ]);
        let out = rerank(&oracle, &candidates(), "computer", 10).await.unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].record["description"], "Desktop computer");
        assert_eq!(out[1].record["description"], "Portable laptop computer");
    }

    #[test]
    fn parse_prefers_strict_json() {
        let entries = parse_ranking(" [{\"index\": 1, \"score\": 0.5}] ").unwrap();
        assert_eq!(
            entries,
            vec![RankedEntry {
                index: 1,
                score: 0.5,
                explanation: None
            }]
        );
        assert!(parse_ranking("] nope [").is_none());
    }
}
