use serde_json::Value;

use super::scorer::Candidate;
use crate::records::{record_text, value_text};

/// Fields checked first, in order, before falling back to every field.
const COUNTRY_FIELDS: &[&str] = &[
    "country",
    "destination_country",
    "importing_country",
    "exporting_country",
    "dest_country",
    "origin_country",
    "country_name",
    "iso2",
    "iso3",
];

const COUNTRY_CODES: &[(&str, &str)] = &[
    ("united states", "US"),
    ("usa", "US"),
    ("china", "CN"),
    ("germany", "DE"),
    ("france", "FR"),
    ("united kingdom", "GB"),
    ("uk", "GB"),
    ("japan", "JP"),
    ("canada", "CA"),
    ("mexico", "MX"),
    ("india", "IN"),
    ("brazil", "BR"),
    ("italy", "IT"),
    ("spain", "ES"),
    ("south korea", "KR"),
    ("korea", "KR"),
    ("australia", "AU"),
    ("netherlands", "NL"),
    ("vietnam", "VN"),
    ("singapore", "SG"),
    ("switzerland", "CH"),
    ("european union", "EU"),
];

/// Keep candidates whose record mentions `country` (case-insensitive).
/// An empty country keeps everything.
pub fn filter_by_country(candidates: Vec<Candidate>, country: &str) -> Vec<Candidate> {
    let needle = country.trim().to_lowercase();
    if needle.is_empty() {
        return candidates;
    }
    candidates
        .into_iter()
        .filter(|c| record_mentions(&c.record, &needle))
        .collect()
}

fn record_mentions(record: &Value, needle: &str) -> bool {
    let Value::Object(fields) = record else {
        return record_text(record).to_lowercase().contains(needle);
    };
    let contains = |v: &Value| value_text(v).to_lowercase().contains(needle);

    let canonical = COUNTRY_FIELDS
        .iter()
        .filter_map(|name| fields.get(*name))
        .any(contains);
    canonical || fields.values().any(contains)
}

/// Map a country name to its ISO code. Unknown names degrade to their first
/// two characters, upper-cased, so codes like `fr` pass through.
pub fn country_code(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    COUNTRY_CODES
        .iter()
        .find(|(n, _)| *n == lower.as_str())
        .map(|(_, code)| code.to_string())
        .unwrap_or_else(|| lower.chars().take(2).collect::<String>().to_uppercase())
}
