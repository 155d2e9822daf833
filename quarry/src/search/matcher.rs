use serde::{Deserialize, Serialize};

/// Record fields that take part in matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchField {
    Text,
    OriginalName,
    Title,
    Author,
}

impl SearchField {
    /// Relative importance; a hit in a lighter field scores slightly worse.
    pub fn weight(self) -> f64 {
        match self {
            SearchField::Text => 1.0,
            SearchField::OriginalName => 0.8,
            SearchField::Title => 0.7,
            SearchField::Author => 0.5,
        }
    }

    fn penalty(self) -> f64 {
        (1.0 - self.weight()) * 0.1
    }
}

/// Byte range of a matched token inside one field value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Highlight {
    pub field: SearchField,
    pub start: usize,
    pub end: usize,
}

/// Lowercased word with its position in the source text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Token {
    pub(crate) start: usize,
    pub(crate) end: usize,
    pub(crate) normalized: String,
}

/// Split on anything that is not alphanumeric.
pub(crate) fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_alphanumeric(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                tokens.push(Token::new(text, s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push(Token::new(text, s, text.len()));
    }
    tokens
}

/// Normalized query terms, in query order, without duplicates.
pub(crate) fn query_terms(term: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in tokenize(term) {
        if !terms.contains(&token.normalized) {
            terms.push(token.normalized);
        }
    }
    terms
}

impl Token {
    fn new(text: &str, start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            normalized: text[start..end].to_lowercase(),
        }
    }
}

/// Tokens of one field of one document.
#[derive(Clone, Debug)]
pub(crate) struct FieldTokens {
    pub(crate) field: SearchField,
    pub(crate) tokens: Vec<Token>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct DocumentMatch {
    pub(crate) score: f64,
    pub(crate) highlights: Vec<Highlight>,
}

/// Scores query terms against document tokens. Lower is better; 0 is exact.
#[derive(Clone, Copy, Debug)]
pub struct FuzzyMatcher {
    threshold: f64,
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Distance between one query term and one token, both already lowercased.
    ///
    /// Exact matches score 0, prefixes stay below 0.1, substrings below 0.2;
    /// anything else falls back to normalized Levenshtein distance.
    pub fn term_score(term: &str, token: &str) -> f64 {
        if term == token {
            return 0.0;
        }
        let coverage = term.chars().count() as f64 / token.chars().count().max(1) as f64;
        if token.starts_with(term) {
            return 0.1 * (1.0 - coverage);
        }
        if token.contains(term) {
            return 0.1 + 0.1 * (1.0 - coverage);
        }
        1.0 - strsim::normalized_levenshtein(term, token)
    }

    /// Every term must match some token within the threshold. The document
    /// score is the mean of each term's best weighted score.
    pub(crate) fn score_document(
        &self,
        terms: &[String],
        fields: &[FieldTokens],
    ) -> Option<DocumentMatch> {
        if terms.is_empty() {
            return None;
        }

        let mut total = 0.0;
        let mut highlights = Vec::new();
        for term in terms {
            let mut best: Option<f64> = None;
            for field in fields {
                for token in &field.tokens {
                    let raw = Self::term_score(term, &token.normalized);
                    if raw > self.threshold {
                        continue;
                    }
                    highlights.push(Highlight {
                        field: field.field,
                        start: token.start,
                        end: token.end,
                    });
                    let weighted = raw + field.field.penalty();
                    best = Some(best.map_or(weighted, |b: f64| b.min(weighted)));
                }
            }
            total += best?;
        }

        highlights.sort_by_key(|h| (h.field, h.start));
        highlights.dedup();
        Some(DocumentMatch {
            score: total / terms.len() as f64,
            highlights,
        })
    }
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(0.4)
    }
}
