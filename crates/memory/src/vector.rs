//! Vector math shared by the index and the memory ranker.

/// Cosine similarity in `[-1, 1]`.
///
/// A zero-norm vector (on either side) scores `0.0`; that is a degenerate
/// input, not an error. Callers must pass vectors of equal dimension.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "cosine over mismatched dimensions");

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cos = dot / (norm_a.sqrt() * norm_b.sqrt());
    if cos.is_finite() {
        cos.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Map a cosine in `[-1, 1]` onto a similarity in `[0, 1]`.
pub fn normalized_similarity(cosine: f32) -> f32 {
    ((1.0 + cosine) / 2.0).clamp(0.0, 1.0)
}

/// Little-endian `f32` blob, the on-disk vector encoding.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Inverse of [`encode_vector`]; `None` when the blob is not a whole number
/// of `f32`s.
pub fn decode_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}
