use std::collections::BTreeSet;

/// Product synonyms applied per original token. Lookup is one-directional:
/// an entry's synonyms are added, their own entries are not followed.
const SYNONYMS: &[(&str, &[&str])] = &[
    ("laptop", &["computer", "notebook"]),
    ("computer", &["laptop", "notebook"]),
    ("notebook", &["laptop", "computer"]),
    ("phone", &["smartphone", "mobile", "telephone"]),
    ("smartphone", &["phone", "mobile"]),
    ("car", &["automobile", "vehicle"]),
    ("automobile", &["car", "vehicle"]),
    ("vehicle", &["car", "automobile"]),
    ("truck", &["lorry", "vehicle"]),
    ("steel", &["iron"]),
    ("iron", &["steel"]),
    ("clothing", &["apparel", "garment", "textile"]),
    ("apparel", &["clothing", "garment"]),
    ("shoes", &["footwear"]),
    ("footwear", &["shoes"]),
    ("tv", &["television"]),
    ("television", &["tv"]),
    ("medicine", &["pharmaceutical", "drug"]),
    ("furniture", &["chair", "table"]),
    ("wine", &["alcohol", "beverage"]),
    ("coffee", &["beverage"]),
    ("solar", &["photovoltaic"]),
];

/// A tokenized query: the original token set and its synonym expansion.
#[derive(Debug, Clone)]
pub struct Query {
    /// The query as typed, trimmed.
    pub raw: String,
    /// Lower-cased `raw`, matched verbatim against record text.
    pub phrase: String,
    pub original: BTreeSet<String>,
    pub expanded: BTreeSet<String>,
}

impl Query {
    pub fn parse(raw: &str) -> Self {
        let original = tokenize(raw);
        let expanded = expand(&original);
        Self {
            raw: raw.trim().to_string(),
            phrase: raw.trim().to_lowercase(),
            original,
            expanded,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.original.is_empty()
    }
}

/// Lower-cased alphanumeric runs of at least two characters.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    words(text)
        .filter(|w| w.chars().count() >= 2)
        .collect()
}

/// Lower-cased alphanumeric runs of any length, in order.
pub(crate) fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

fn expand(tokens: &BTreeSet<String>) -> BTreeSet<String> {
    let mut expanded = tokens.clone();
    for token in tokens {
        if let Some((_, synonyms)) = SYNONYMS.iter().find(|(word, _)| *word == token.as_str()) {
            expanded.extend(synonyms.iter().map(|s| s.to_string()));
        }
    }
    expanded
}
