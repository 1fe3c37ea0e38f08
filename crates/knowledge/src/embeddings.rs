//! Text embeddings
//!
//! The store takes text to a fixed-length vector. Deployments without a
//! model provider run on the deterministic feature-hashing scheme below;
//! the mode is recorded in per-result metadata so consumers can tell the
//! two apart.

use unicode_segmentation::UnicodeSegmentation;

use crate::KnowledgeError;

/// How an embedding was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingMode {
    /// Deterministic feature hashing; referentially transparent.
    FeatureHash,
    /// An external model provider.
    External,
}

impl EmbeddingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FeatureHash => "feature_hash",
            Self::External => "external",
        }
    }
}

/// Text-to-vector seam.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError>;
    fn dim(&self) -> usize;
    fn mode(&self) -> EmbeddingMode;
}

/// Deterministic feature-hashing embedder.
///
/// Features per document: token unigrams, token bigrams, character
/// trigrams of each token, and a document-length bucket. Term weights
/// are logarithmic (`1 + ln(count)`), features hash into signed buckets,
/// and the final vector is L2-normalized. Same input, same output.
pub struct FeatureHashEmbedder {
    dim: usize,
}

impl FeatureHashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    fn features(text: &str) -> Vec<String> {
        let tokens: Vec<String> = text
            .unicode_words()
            .map(|w| w.to_lowercase())
            .collect();

        let mut features = Vec::with_capacity(tokens.len() * 4 + 1);
        for token in &tokens {
            features.push(format!("u:{token}"));
            let chars: Vec<char> = token.chars().collect();
            for window in chars.windows(3) {
                features.push(format!("t:{}", window.iter().collect::<String>()));
            }
        }
        for pair in tokens.windows(2) {
            features.push(format!("b:{} {}", pair[0], pair[1]));
        }

        // Document-length bucket: log2 of token count.
        let bucket = (tokens.len().max(1) as f64).log2().floor() as u32;
        features.push(format!("len:{bucket}"));
        features
    }
}

impl Embedder for FeatureHashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
        let features = Self::features(text);

        // Logarithmic term weighting over feature counts.
        let mut counts: std::collections::HashMap<&str, u32> = std::collections::HashMap::new();
        for feature in &features {
            *counts.entry(feature.as_str()).or_insert(0) += 1;
        }

        let mut embedding = vec![0.0f32; self.dim];
        for (feature, count) in counts {
            let hash = fnv1a64(feature.as_bytes());
            let index = (hash % self.dim as u64) as usize;
            let sign = if (hash >> 63) & 1 == 1 { -1.0 } else { 1.0 };
            let weight = 1.0 + (count as f32).ln();
            embedding[index] += sign * weight;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        Ok(embedding)
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn mode(&self) -> EmbeddingMode {
        EmbeddingMode::FeatureHash
    }
}

/// FNV-1a, 64-bit. Stable across processes and releases, unlike the
/// standard library's randomized hasher.
fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referential_transparency() {
        let embedder = FeatureHashEmbedder::new(384);
        let a = embedder.embed("OFAC sanctions update").unwrap();
        let b = embedder.embed("OFAC sanctions update").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unit_norm() {
        let embedder = FeatureHashEmbedder::new(384);
        let embedding = embedder.embed("transaction monitoring thresholds").unwrap();
        assert_eq!(embedding.len(), 384);
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_related_texts_closer_than_unrelated() {
        let embedder = FeatureHashEmbedder::new(384);
        let query = embedder.embed("OFAC sanctions screening list").unwrap();
        let related = embedder.embed("sanctions screening against the OFAC list").unwrap();
        let unrelated = embedder.embed("quarterly catering budget forecast").unwrap();

        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[test]
    fn test_empty_text_is_safe() {
        let embedder = FeatureHashEmbedder::new(64);
        let embedding = embedder.embed("").unwrap();
        assert_eq!(embedding.len(), 64);
    }

    #[test]
    fn test_mode_is_recorded() {
        let embedder = FeatureHashEmbedder::new(64);
        assert_eq!(embedder.mode().as_str(), "feature_hash");
    }
}
