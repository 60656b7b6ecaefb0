use crate::gallery::EmbeddingGallery;

/// Euclidean norm of `a - b`.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Cosine of the angle between two vectors, 0 when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Match confidence as a percentage.
///
/// Not clamped: distances far from the threshold give values above 100 or
/// below 0, and stored reports depend on exactly this scale.
pub fn face_confidence(distance: f32, threshold: f32) -> f32 {
    ((1.0 - distance) / ((1.0 - threshold) * 2.0)) * 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct Nearest {
    pub identity: String,
    pub distance: f32,
}

/// Closest gallery vector by Euclidean distance; ties keep the first in identity order.
pub fn nearest(gallery: &EmbeddingGallery, probe: &[f32]) -> Option<Nearest> {
    gallery
        .entries()
        .map(|(identity, v)| (identity, euclidean_distance(v, probe)))
        .fold(None, |best: Option<(&str, f32)>, (identity, d)| match best {
            Some((_, bd)) if bd <= d => best,
            _ => Some((identity, d)),
        })
        .map(|(identity, distance)| Nearest {
            identity: identity.to_string(),
            distance,
        })
}

/// Highest cosine similarity between `probe` and any of `stored`.
pub fn best_similarity(stored: &[Vec<f32>], probe: &[f32]) -> Option<f32> {
    stored
        .iter()
        .map(|v| cosine_similarity(v, probe))
        .fold(None, |acc, s| match acc {
            Some(best) if best >= s => Some(best),
            _ => Some(s),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::Modality;

    #[test]
    fn test_zero_vector_similarity_is_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_cosine_range() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_formula() {
        assert!(face_confidence(0.5, 0.5).abs() < 1e-4);
        assert!((face_confidence(0.0, 0.5) - 100.0).abs() < 1e-4);
        // out-of-range distances are reported as-is
        assert!(face_confidence(1.5, 0.5) < 0.0);
        assert!((face_confidence(0.0, 0.6) - 125.0).abs() < 1e-3);
    }

    #[test]
    fn test_nearest_identity() {
        let mut g = EmbeddingGallery::new(Modality::Face, "m");
        g.push("alice", "m", vec![1.0, 0.0]).ok();
        g.push("bob", "m", vec![0.0, 1.0]).ok();
        g.push("bob", "m", vec![0.6, 0.8]).ok();
        let hit = nearest(&g, &[0.7, 0.7]);
        assert_eq!(hit.as_ref().map(|n| n.identity.as_str()), Some("bob"));
        assert!(nearest(&EmbeddingGallery::new(Modality::Face, "m"), &[1.0]).is_none());
    }

    #[test]
    fn test_best_similarity() {
        let stored = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!((best_similarity(&stored, &[0.0, 2.0]).unwrap_or(0.0) - 1.0).abs() < 1e-6);
        assert!(best_similarity(&[], &[1.0]).is_none());
    }
}
