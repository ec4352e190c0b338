//! Offline fallback embedder.
//!
//! Projects hashed tf-idf features (words plus adjacent-word bigrams) onto
//! a fixed-width vector. The hash decides axis, sign, and a small per-term
//! jitter, so no vocabulary is stored and the output is deterministic for
//! a given input batch. Vectors are L2-normalized; whitespace-only input
//! produces the zero vector.
//!
//! Quality is far below a hosted model. It exists so ingestion and search
//! keep working when no embedding API is configured or reachable.

use std::collections::HashMap;
use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hash-projected tf-idf embedder with no external state.
#[derive(Debug, Clone)]
pub struct StatisticalEmbedder {
    dimension: usize,
}

impl StatisticalEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    /// Embeds a batch of texts without any network traffic.
    ///
    /// Inverse document frequency is computed over the batch itself, so
    /// terms shared by every text in the batch are down-weighted relative
    /// to distinctive ones.
    pub fn embed_batch_local(&self, texts: &[String]) -> Vec<Vec<f32>> {
        if self.dimension == 0 {
            return texts.iter().map(|_| Vec::new()).collect();
        }

        let docs: Vec<Vec<String>> = texts.iter().map(|text| features(text)).collect();

        // Document frequency per feature across the batch.
        let mut df: HashMap<&str, usize> = HashMap::new();
        for doc in &docs {
            let unique: HashSet<&str> = doc.iter().map(String::as_str).collect();
            for feature in unique {
                *df.entry(feature).or_insert(0) += 1;
            }
        }
        let batch_size = docs.len();

        docs.iter()
            .map(|doc| {
                let mut vector = vec![0.0f32; self.dimension];
                let mut tf: HashMap<&str, usize> = HashMap::new();
                for feature in doc {
                    *tf.entry(feature.as_str()).or_insert(0) += 1;
                }
                for (feature, count) in tf {
                    let seen_in = df.get(feature).copied().unwrap_or(1);
                    let idf =
                        ((1 + batch_size) as f32 / (1 + seen_in) as f32).ln() + 1.0;
                    let hash = feature_hash(feature);
                    let axis = (hash % self.dimension as u64) as usize;
                    let sign = if hash & (1 << 63) != 0 { -1.0 } else { 1.0 };
                    let jitter = 1.0 + ((hash >> 48) & 0xFF) as f32 / 255.0;
                    vector[axis] += sign * count as f32 * idf * jitter;
                }
                normalize(&mut vector);
                vector
            })
            .collect()
    }
}

/// Lowercased word unigrams plus adjacent-word bigrams.
fn features(text: &str) -> Vec<String> {
    let words: Vec<String> = text
        .to_lowercase()
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|word| !word.is_empty())
        .collect();

    let mut features = Vec::with_capacity(words.len() * 2);
    for word in &words {
        features.push(format!("w:{word}"));
    }
    for pair in words.windows(2) {
        features.push(format!("b:{}_{}", pair[0], pair[1]));
    }
    features
}

// DefaultHasher::new() uses fixed keys, so the projection is stable
// within a build.
fn feature_hash(feature: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    feature.hash(&mut hasher);
    hasher.finish()
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn vectors_match_the_requested_width() {
        let embedder = StatisticalEmbedder::new(96);
        let vectors = embedder.embed_batch_local(&batch(&["ownership", "a much longer sentence about lifetimes"]));
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == 96));
    }

    #[test]
    fn output_is_deterministic() {
        let embedder = StatisticalEmbedder::new(128);
        let texts = batch(&["async runtime scheduling", "borrow checker diagnostics"]);
        assert_eq!(
            embedder.embed_batch_local(&texts),
            embedder.embed_batch_local(&texts)
        );
    }

    #[test]
    fn nonempty_text_is_unit_length() {
        let embedder = StatisticalEmbedder::new(256);
        let vectors = embedder.embed_batch_local(&batch(&["traits define shared behavior"]));
        let norm = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn whitespace_only_text_maps_to_the_zero_vector() {
        let embedder = StatisticalEmbedder::new(64);
        let vectors = embedder.embed_batch_local(&batch(&["   \t  ", "real words"]));
        assert!(vectors[0].iter().all(|v| *v == 0.0));
        assert!(vectors[1].iter().any(|v| *v != 0.0));
    }

    #[test]
    fn related_texts_score_above_unrelated_ones() {
        let embedder = StatisticalEmbedder::new(512);
        let vectors = embedder.embed_batch_local(&batch(&[
            "rust ownership and borrowing rules",
            "rust ownership and borrowing explained",
            "baking sourdough bread overnight",
        ]));
        let related = dot(&vectors[0], &vectors[1]);
        let unrelated = dot(&vectors[0], &vectors[2]);
        assert!(
            related > unrelated,
            "related {related} should beat unrelated {unrelated}"
        );
    }

    #[test]
    fn punctuation_is_stripped_from_tokens() {
        assert_eq!(
            features("Hello, world!"),
            vec!["w:hello", "w:world", "b:hello_world"]
        );
    }
}
