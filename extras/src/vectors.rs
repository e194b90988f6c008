//! A small TF-IDF index over text chunks, for retrieving context to hand to
//! a language model.

use std::collections::HashMap;

use serde::Serialize;

/// Where a chunk came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Metadata {
    pub title: String,
    pub url: String,
    pub description: String,
}

/// The outcome of [`crate::Parser::query`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorResult {
    pub chunks: Vec<String>,
    pub metadata: Vec<Metadata>,
    pub similarities: Vec<f64>,
    pub success: bool,
    pub message: String,
}

impl VectorResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            chunks: Vec::new(),
            metadata: Vec::new(),
            similarities: Vec::new(),
            success: false,
            message: message.into(),
        }
    }
}

type SparseVector = HashMap<usize, f64>;

/// Lowercased tokens of two or more word characters.
fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().nth(1).is_some())
        .map(str::to_lowercase)
}

/// Term weighting with smoothed inverse document frequency and
/// l2-normalised rows.
#[derive(Debug, Clone, Default)]
pub struct TfidfVectorizer {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f64>,
}

impl TfidfVectorizer {
    /// Learns the vocabulary of `documents` and returns their vectors.
    pub fn fit_transform<S: AsRef<str>>(documents: &[S]) -> (Self, Vec<SparseVector>) {
        let mut vocabulary = HashMap::new();
        let mut document_frequency: Vec<usize> = Vec::new();
        let counts: Vec<HashMap<usize, usize>> = documents
            .iter()
            .map(|doc| {
                let mut counts = HashMap::new();
                for token in tokenize(doc.as_ref()) {
                    let next = vocabulary.len();
                    let id = *vocabulary.entry(token).or_insert(next);
                    if id == document_frequency.len() {
                        document_frequency.push(0);
                    }
                    *counts.entry(id).or_insert(0) += 1;
                }
                for id in counts.keys() {
                    document_frequency[*id] += 1;
                }
                counts
            })
            .collect();

        let n = documents.len() as f64;
        let idf = document_frequency
            .iter()
            .map(|df| ((1.0 + n) / (1.0 + *df as f64)).ln() + 1.0)
            .collect();
        let vectorizer = Self { vocabulary, idf };
        let vectors = counts.iter().map(|c| vectorizer.weigh(c)).collect();
        (vectorizer, vectors)
    }

    /// Vectorises `text` against the learned vocabulary; unknown terms are
    /// ignored.
    pub fn transform(&self, text: &str) -> SparseVector {
        let mut counts = HashMap::new();
        for token in tokenize(text) {
            if let Some(id) = self.vocabulary.get(&token) {
                *counts.entry(*id).or_insert(0) += 1;
            }
        }
        self.weigh(&counts)
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    fn weigh(&self, counts: &HashMap<usize, usize>) -> SparseVector {
        let mut vector: SparseVector = counts
            .iter()
            .map(|(id, count)| (*id, *count as f64 * self.idf[*id]))
            .collect();
        let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            vector.values_mut().for_each(|w| *w /= norm);
        }
        vector
    }
}

/// Cosine similarity of two l2-normalised vectors.
pub fn cosine(a: &SparseVector, b: &SparseVector) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(id, w)| large.get(id).map(|v| w * v))
        .sum()
}

/// Splits `text` into chunks of at most `chunk_size` whitespace separated
/// words.
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(chunk_size.max(1))
        .map(|chunk| chunk.join(" "))
        .collect()
}

/// Indexed chunks with their sources.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    vectorizer: TfidfVectorizer,
    vectors: Vec<SparseVector>,
    chunks: Vec<String>,
    metadata: Vec<Metadata>,
}

impl VectorIndex {
    pub fn new(chunks: Vec<String>, metadata: Vec<Metadata>) -> Self {
        let (vectorizer, vectors) = TfidfVectorizer::fit_transform(&chunks);
        Self {
            vectorizer,
            vectors,
            chunks,
            metadata,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The `k` chunks most similar to `text`, best first.
    pub fn query(&self, text: &str, k: usize) -> VectorResult {
        let query = self.vectorizer.transform(text);
        let mut ranked: Vec<(usize, f64)> = self
            .vectors
            .iter()
            .map(|v| cosine(&query, v))
            .enumerate()
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);

        VectorResult {
            chunks: ranked.iter().map(|(i, _)| self.chunks[*i].clone()).collect(),
            metadata: ranked.iter().map(|(i, _)| self.metadata[*i].clone()).collect(),
            similarities: ranked.iter().map(|(_, s)| *s).collect(),
            success: true,
            message: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: &str) -> Metadata {
        Metadata {
            title: title.to_string(),
            url: format!("https://nyx.example.com/{title}"),
            description: String::new(),
        }
    }

    #[test]
    fn test_tokenize() {
        let tokens: Vec<String> = tokenize("The cat, a dog_2 and I! Ünïcode").collect();
        assert_eq!(tokens, vec!["the", "cat", "dog_2", "and", "ünïcode"]);
    }

    #[test]
    fn test_smoothed_idf() {
        let (vectorizer, vectors) = TfidfVectorizer::fit_transform(&["apple banana", "apple"]);
        assert_eq!(vectorizer.vocabulary_len(), 2);

        // apple appears in both documents: idf = ln(3/3) + 1 = 1
        // banana in one: idf = ln(3/2) + 1
        let banana_idf = (3.0f64 / 2.0).ln() + 1.0;
        let norm = (1.0 + banana_idf * banana_idf).sqrt();
        let apple = vectorizer.vocabulary["apple"];
        let banana = vectorizer.vocabulary["banana"];
        assert!((vectors[0][&apple] - 1.0 / norm).abs() < 1e-12);
        assert!((vectors[0][&banana] - banana_idf / norm).abs() < 1e-12);
        assert!((vectors[1][&apple] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_chunk_text() {
        assert_eq!(
            chunk_text("one two  three\nfour five", 2),
            vec!["one two", "three four", "five"]
        );
        assert!(chunk_text("   ", 10).is_empty());
    }

    #[test]
    fn test_query_ranks_by_similarity() {
        let index = VectorIndex::new(
            vec![
                "rainfall in the north was heavy".to_string(),
                "quarterly sales grew in the south".to_string(),
                "heavy rainfall and flooding".to_string(),
            ],
            vec![meta("north"), meta("sales"), meta("floods")],
        );

        let result = index.query("heavy rainfall", 2);
        assert!(result.success);
        assert_eq!(result.chunks.len(), 2);
        assert_eq!(result.metadata[0].title, "floods");
        assert_eq!(result.metadata[1].title, "north");
        assert!(result.similarities[0] >= result.similarities[1]);
        assert!(result.similarities[1] > 0.0);
    }

    #[test]
    fn test_unknown_terms_have_zero_similarity() {
        let index = VectorIndex::new(vec!["alpha beta".to_string()], vec![meta("a")]);
        let result = index.query("gamma", 3);
        assert_eq!(result.similarities, vec![0.0]);
    }
}
