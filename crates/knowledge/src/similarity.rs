//! Vector similarity metrics
//!
//! All metrics map into [0, 1] so thresholds stay comparable across
//! configurations: cosine and dot shift from [-1, 1] (embeddings are
//! unit-norm), distance metrics invert through 1/(1+d).

use sentinel_config::SimilarityMetric;

pub fn similarity(metric: SimilarityMetric, a: &[f32], b: &[f32]) -> f64 {
    match metric {
        SimilarityMetric::Cosine => normalize_signed(cosine(a, b)),
        SimilarityMetric::Dot => normalize_signed(dot(a, b)),
        SimilarityMetric::Euclidean => 1.0 / (1.0 + euclidean(a, b)),
        SimilarityMetric::Manhattan => 1.0 / (1.0 + manhattan(a, b)),
    }
}

fn normalize_signed(value: f64) -> f64 {
    ((value + 1.0) / 2.0).clamp(0.0, 1.0)
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum()
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot = dot(a, b);
    let norm_a = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| ((*x - *y) as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn manhattan(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(x, y)| ((*x - *y) as f64).abs()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_vectors_score_one() {
        let v = vec![0.6f32, 0.8];
        for metric in [
            SimilarityMetric::Cosine,
            SimilarityMetric::Dot,
            SimilarityMetric::Euclidean,
            SimilarityMetric::Manhattan,
        ] {
            let score = similarity(metric, &v, &v);
            assert!(score > 0.99, "{metric:?} scored {score}");
            assert!(score <= 1.0);
        }
    }

    #[test]
    fn test_opposite_vectors_score_low() {
        let a = vec![1.0f32, 0.0];
        let b = vec![-1.0f32, 0.0];
        assert!(similarity(SimilarityMetric::Cosine, &a, &b) < 1e-9);
    }

    #[test]
    fn test_scores_within_unit_interval() {
        let a = vec![0.3f32, -0.9, 0.1];
        let b = vec![-0.5f32, 0.2, 0.8];
        for metric in [
            SimilarityMetric::Cosine,
            SimilarityMetric::Dot,
            SimilarityMetric::Euclidean,
            SimilarityMetric::Manhattan,
        ] {
            let score = similarity(metric, &a, &b);
            assert!((0.0..=1.0).contains(&score), "{metric:?} scored {score}");
        }
    }

    #[test]
    fn test_zero_vector_is_neutral_for_cosine() {
        let zero = vec![0.0f32; 3];
        let v = vec![1.0f32, 0.0, 0.0];
        assert_eq!(similarity(SimilarityMetric::Cosine, &zero, &v), 0.5);
    }
}
