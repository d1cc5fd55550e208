use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use super::query::{Query, words};
use crate::records::{Record, record_text, value_text};

/// Field-name fragments that mark a field as describing the product itself.
const IMPORTANT_FIELD_HINTS: &[&str] = &[
    "description",
    "product",
    "item",
    "name",
    "text",
    "commodity",
    "goods",
];

struct Weights {
    exact: f64,
    partial: f64,
    fuzzy: f64,
}

const IMPORTANT: Weights = Weights {
    exact: 3.0,
    partial: 1.0,
    fuzzy: 0.5,
};

const OTHER: Weights = Weights {
    exact: 1.0,
    partial: 0.5,
    fuzzy: 0.25,
};

const GENERAL_TOKEN_WEIGHT: f64 = 1.5;
const GENERAL_PHRASE_BONUS: f64 = 3.0;
const GENERAL_BLEND: f64 = 0.7;

const PARTIAL_MIN_LEN: usize = 3;
const FUZZY_MIN_LEN: usize = 4;
const FUZZY_MAX_LEN_DIFF: usize = 2;
const FUZZY_MIN_SHARED: f64 = 0.6;

/// A record paired with its relevance score and source provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub record: Record,
    pub score: f64,
    pub source_bucket: String,
    pub source_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub matched_fields: Vec<String>,
}

impl Candidate {
    pub fn new(record: Record, score: f64) -> Self {
        Self {
            record,
            score,
            source_bucket: String::new(),
            source_key: String::new(),
            source_country: None,
            explanation: None,
            matched_fields: Vec::new(),
        }
    }

    pub fn with_source(mut self, bucket: &str, key: &str, country: Option<&str>) -> Self {
        self.source_bucket = bucket.to_string();
        self.source_key = key.to_string();
        self.source_country = country.map(str::to_string);
        self
    }
}

/// Score records against a query, best first, keeping at most `top_k`.
///
/// Records scoring zero or less are dropped. Ties keep extraction order.
pub fn score(records: Vec<Record>, query: &Query, top_k: usize) -> Vec<Candidate> {
    if query.is_empty() {
        return Vec::new();
    }

    let mut candidates: Vec<Candidate> = records
        .into_iter()
        .filter_map(|record| {
            let (score, matched_fields) = score_record(&record, query);
            (score > 0.0).then(|| Candidate {
                matched_fields,
                ..Candidate::new(record, score)
            })
        })
        .collect();

    sort_by_score(&mut candidates);
    candidates.truncate(top_k);
    candidates
}

/// Stable sort, highest score first.
pub fn sort_by_score(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
}

fn score_record(record: &Record, query: &Query) -> (f64, Vec<String>) {
    let mut total = 0.0;
    let mut matched = Vec::new();

    if let Value::Object(fields) = record {
        for (name, value) in fields {
            let important = is_important(name);
            let weights = if important { &IMPORTANT } else { &OTHER };
            let subtotal = field_score(&value_text(value).to_lowercase(), &query.expanded, weights);
            if subtotal > 0.0 {
                matched.push(name.clone());
                if important {
                    total += subtotal;
                }
            }
        }
    }

    let general = general_score(&record_text(record).to_lowercase(), query);
    (total + GENERAL_BLEND * general, matched)
}

fn is_important(field: &str) -> bool {
    let lower = field.to_lowercase();
    IMPORTANT_FIELD_HINTS.iter().any(|hint| lower.contains(hint))
}

fn field_score(text: &str, tokens: &BTreeSet<String>, weights: &Weights) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let field_words: Vec<String> = words(text).collect();
    tokens
        .iter()
        .map(|token| token_score(token, text, &field_words, weights))
        .sum()
}

/// Best single match of one token in one field: exact, then partial, then fuzzy.
fn token_score(token: &str, text: &str, field_words: &[String], weights: &Weights) -> f64 {
    if text.contains(token) {
        return weights.exact;
    }

    let len = token.chars().count();
    if len >= PARTIAL_MIN_LEN && field_words.iter().any(|w| token.contains(w.as_str())) {
        return weights.partial;
    }

    if len >= FUZZY_MIN_LEN && field_words.iter().any(|w| roughly_similar(token, w)) {
        return weights.fuzzy;
    }

    0.0
}

/// Cheap stand-in for edit distance: similar length and mostly shared characters.
fn roughly_similar(token: &str, word: &str) -> bool {
    let token_len = token.chars().count();
    let word_len = word.chars().count();
    if token_len.abs_diff(word_len) > FUZZY_MAX_LEN_DIFF {
        return false;
    }
    let distinct: BTreeSet<char> = token.chars().collect();
    let shared = distinct.iter().filter(|c| word.contains(**c)).count();
    shared as f64 >= FUZZY_MIN_SHARED * token_len.min(word_len) as f64
}

/// Whole-record match on the unexpanded tokens, plus a bonus for the verbatim query.
fn general_score(text: &str, query: &Query) -> f64 {
    let hits = query.original.iter().filter(|t| text.contains(t.as_str())).count();
    let mut score = hits as f64 * GENERAL_TOKEN_WEIGHT;
    if !query.phrase.is_empty() && text.contains(&query.phrase) {
        score += GENERAL_PHRASE_BONUS;
    }
    score
}
