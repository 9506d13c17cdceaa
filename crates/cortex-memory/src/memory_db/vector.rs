//! Embedding codec and distance functions

use anyhow::Context;

/// Serialize an embedding for a BLOB column.
pub fn encode(vector: &[f32]) -> anyhow::Result<Vec<u8>> {
    bincode::serialize(vector).context("Failed to encode embedding")
}

pub fn decode(bytes: &[u8]) -> anyhow::Result<Vec<f32>> {
    bincode::deserialize(bytes).context("Failed to decode embedding")
}

pub fn encode_opt(vector: Option<&[f32]>) -> anyhow::Result<Option<Vec<u8>>> {
    vector.map(encode).transpose()
}

pub fn decode_opt(bytes: Option<Vec<u8>>) -> anyhow::Result<Option<Vec<f32>>> {
    bytes.as_deref().map(decode).transpose()
}

/// Cosine similarity; `None` for mismatched lengths, empty or zero vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        None
    } else {
        Some(dot / denom)
    }
}

/// Euclidean distance; `None` when dimensions differ.
pub fn l2_distance(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    Some(
        a.iter()
            .zip(b)
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_roundtrip() {
        let v = vec![0.25f32, -1.0, 3.5];
        let bytes = encode(&v).unwrap();
        assert_eq!(decode(&bytes).unwrap(), v);
        assert_eq!(decode_opt(None).unwrap(), None);
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[], &[]), None);
    }

    #[test]
    fn test_l2_distance() {
        assert_eq!(l2_distance(&[0.0, 0.0], &[3.0, 4.0]), Some(5.0));
        assert_eq!(l2_distance(&[0.0], &[3.0, 4.0]), None);
    }
}
