use ndarray::Array1;

/// Turns a transaction description into a fixed-dimension dense vector.
///
/// Terms are hashed into buckets (no vocabulary to ship with the artifact),
/// weighted by in-text frequency and a length-based IDF approximation, then
/// L2-normalized. Deterministic: the same text always produces the same
/// vector, so prototypes built on one host predict identically on another.
///
/// Input with no usable terms (empty or punctuation-only text) maps to the
/// zero vector, which downstream prediction reports as "unknown".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureExtractor {
    dimensions: usize,
}

impl FeatureExtractor {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Hash a term into a bucket index using FNV-1a.
    fn hash_term(term: &str, dims: usize) -> usize {
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h as usize) % dims
    }

    /// Tokenize text into lowercase alphanumeric terms.
    ///
    /// Unicode-aware: merchant descriptions are frequently Cyrillic
    /// ("Кава в Starbucks"), and `char::is_alphanumeric` keeps those terms.
    fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect()
    }

    /// Build the normalized feature vector for the given text.
    pub fn vector(&self, text: &str) -> Array1<f32> {
        let tokens = Self::tokenize(text);
        if tokens.is_empty() {
            return Array1::zeros(self.dimensions);
        }

        let total = tokens.len() as f32;
        let mut vec = Array1::<f32>::zeros(self.dimensions);

        for term in &tokens {
            let freq = 1.0 / total;
            // IDF approximation: longer terms carry more signal than short
            // connective words.
            let idf = 1.0 + (term.chars().count() as f32).ln();
            let bucket = Self::hash_term(term, self.dimensions);
            vec[bucket] += freq * idf;
        }

        normalize_vector(&vec)
    }
}

pub(crate) fn normalize_vector(vec: &Array1<f32>) -> Array1<f32> {
    let norm: f32 = vec.iter().map(|&x| x * x).sum::<f32>().sqrt();
    if norm > 1e-10 {
        vec / norm
    } else {
        Array1::zeros(vec.len())
    }
}

pub(crate) fn average_vectors(vectors: &[Array1<f32>], dimensions: usize) -> Array1<f32> {
    if vectors.is_empty() {
        return Array1::zeros(dimensions);
    }
    let sum = vectors
        .iter()
        .fold(Array1::zeros(dimensions), |acc, v| acc + v);
    sum / vectors.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_yields_zero_vector() {
        let extractor = FeatureExtractor::new(128);
        let v = extractor.vector("");
        assert_eq!(v.len(), 128);
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn punctuation_only_yields_zero_vector() {
        let extractor = FeatureExtractor::new(128);
        let v = extractor.vector("*** --- !!!");
        assert!(v.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn output_is_normalized() {
        let extractor = FeatureExtractor::new(256);
        let v = extractor.vector("Starbucks coffee downtown");
        let norm: f32 = v.iter().map(|&x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {}", norm);
    }

    #[test]
    fn deterministic() {
        let extractor = FeatureExtractor::new(256);
        let a = extractor.vector("АТБ маркет Київ");
        let b = extractor.vector("АТБ маркет Київ");
        assert_eq!(a, b);
    }

    #[test]
    fn similar_texts_have_higher_cosine() {
        let extractor = FeatureExtractor::new(256);
        let a = extractor.vector("Starbucks coffee latte");
        let b = extractor.vector("Starbucks coffee espresso");
        let c = extractor.vector("Uklon taxi ride");

        let cos_ab = a.dot(&b);
        let cos_ac = a.dot(&c);
        assert!(
            cos_ab > cos_ac,
            "similar descriptions should score higher ({} vs {})",
            cos_ab,
            cos_ac
        );
    }

    #[test]
    fn case_insensitive() {
        let extractor = FeatureExtractor::new(256);
        assert_eq!(extractor.vector("KYIVSTAR"), extractor.vector("kyivstar"));
    }
}
