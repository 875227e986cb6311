//! Embedding capability for incident similarity.
//!
//! The metric is deliberately pluggable: the store only needs a
//! fixed-dimension vector per text and cosine similarity between
//! vectors. The default embedder is deterministic feature hashing, so
//! similarity works offline with no model dependency; a real embedding
//! model can be dropped in behind the same trait.

/// Turns text into a fixed-dimension vector.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dimension(&self) -> usize;
}

/// Deterministic bag-of-tokens embedder using feature hashing.
///
/// Tokens are lowercased alphanumeric runs hashed into a fixed number
/// of buckets; the vector is L2-normalized. Same text, same vector,
/// on every platform.
pub struct HashEmbedder {
    dimension: usize,
}

pub const DEFAULT_DIMENSION: usize = 256;

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
        }
    }

    pub fn with_dimension(dimension: usize) -> Self {
        assert!(dimension > 0, "embedding dimension must be positive");
        Self { dimension }
    }

    /// FNV-1a, fixed here so vectors are stable across Rust releases
    /// (std's DefaultHasher makes no such promise).
    fn bucket(&self, token: &str) -> usize {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;

        let mut hash = FNV_OFFSET;
        for byte in token.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        (hash % self.dimension as u64) as usize
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            vector[self.bucket(&token)] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cosine similarity mapped into [0,1]: orthogonal vectors score 0.5,
/// identical ones 1.0. Mismatched or zero vectors score 0.0.
pub fn similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let cosine = f64::from(dot / (norm_a * norm_b));
    ((1.0 + cosine) / 2.0).clamp(0.0, 1.0)
}
